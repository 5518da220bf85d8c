use std::{fmt, time::Instant};

use bytes::Bytes;
use tokio::{
    sync::{mpsc, oneshot},
    time,
};

use crate::h3::{Framer, VarInt};
use crate::{
    ClientConfig, ClientError, ClientSession, Demux, Pacer, QuinnTransport, Reply, Statistics, Summary, TransportError,
};

// Utility method to resolve a given URL.
pub async fn dial(client: &quinn::Endpoint, uri: &http::Uri) -> Result<quinn::Connecting, quinn::ConnectError> {
    let authority = uri
        .authority()
        .ok_or(quinn::ConnectError::InvalidDnsName("".to_string()))?;

    let host = authority.host();
    let port = authority.port_u16().unwrap_or(443);

    let mut remotes = match tokio::net::lookup_host((host, port)).await {
        Ok(remotes) => remotes,
        Err(_) => return Err(quinn::ConnectError::InvalidDnsName(host.to_string())),
    };

    let remote = match remotes.next() {
        Some(remote) => remote,
        None => return Err(quinn::ConnectError::InvalidDnsName(host.to_string())),
    };

    log::debug!("resolved {} to {}", authority, remote);

    // Bracketed IPv6 literals aren't valid server names.
    let server_name = host.trim_start_matches('[').trim_end_matches(']');
    client.connect(remote, server_name)
}

/// The outcome of a run: whatever statistics were gathered, and why the run ended early if it did.
#[derive(Debug)]
pub struct Report {
    pub summary: Summary,

    /// Every matched round trip in milliseconds, in the order they were measured.
    pub samples: Vec<f64>,
    pub terminated: Option<ClientError>,
}

impl Report {
    pub fn is_complete(&self) -> bool {
        self.terminated.is_none()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.terminated {
            writeln!(f, "Terminated early: {}", err)?;
        }

        write!(f, "{}", self.summary)
    }
}

// Requests from the run loop to the connection driver.
#[derive(Debug)]
enum Command {
    Datagram(Bytes),
    Close,
}

/// Establish a WebTransport session on `conn` and exchange `config.count` messages in lockstep.
///
/// Fails if the session couldn't be established. Once it is, the connection closing or a reply timing out ends the
/// run early, and the statistics gathered so far are still returned.
pub async fn run(conn: quinn::Connection, uri: &http::Uri, config: &ClientConfig) -> Result<Report, ClientError> {
    config.validate()?;
    let stats = Statistics::new(config.alpha)?;

    let authority = uri.authority().map(|a| a.as_str()).unwrap_or_default();
    let path = match uri.path_and_query().map(|p| p.as_str()) {
        Some(path) if path != "/" => path,
        _ => config.path.as_str(),
    };

    let mut transport = QuinnTransport::new(conn.clone());

    let (send, recv) = conn.open_bi().await?;
    let stream_id = transport.register_bi(send, recv);

    let (ready_tx, ready) = oneshot::channel();
    let (replies_tx, mut replies) = mpsc::unbounded_channel();

    let session = ClientSession::new(stream_id, config.strict, ready_tx, replies_tx);
    let mut demux = Demux::new(Framer::new(1), session);

    log::info!("connecting to {}{}", authority, path);

    let ((), transmits) = demux.drive(|framer, session| session.connect(framer, authority, path));
    transport.write_all(transmits).await?;

    let (commands, commands_rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(drive(transport, demux, commands_rx));

    let established = match config.establish_timeout {
        Some(timeout) => time::timeout(timeout, ready).await,
        None => Ok(ready.await),
    };

    let res = match established {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(err.into()),
        Ok(Err(_)) => Err(ClientError::TransportClosed),
        Err(_) => Err(ClientError::EstablishTimeout),
    };

    if let Err(err) = res {
        shutdown(&conn, commands, driver).await;
        return Err(err);
    }

    let mut pacer = Pacer::new(config.count, stats);
    let mut terminated = None;

    while let Some(payload) = pacer.next_message(Instant::now()) {
        log::debug!("sending: {}", String::from_utf8_lossy(&payload));

        if commands.send(Command::Datagram(payload)).is_err() {
            terminated = Some(ClientError::TransportClosed);
            break;
        }

        if let Err(err) = wait_reply(&mut pacer, &mut replies, config).await {
            log::warn!("terminating early: {}", err);
            terminated = Some(err);
            break;
        }
    }

    pacer.abort();
    shutdown(&conn, commands, driver).await;

    let stats = pacer.into_stats();
    let summary = stats.summary();
    log::info!("finished after {} messages", summary.messages);

    Ok(Report {
        summary,
        samples: stats.samples().to_vec(),
        terminated,
    })
}

// Block until the outstanding message is answered, skipping anything that doesn't match.
async fn wait_reply(
    pacer: &mut Pacer,
    replies: &mut mpsc::UnboundedReceiver<Reply>,
    config: &ClientConfig,
) -> Result<(), ClientError> {
    // Unmatched replies don't extend the deadline.
    let deadline = config.reply_timeout.map(|timeout| time::Instant::now() + timeout);

    loop {
        let reply = match deadline {
            Some(deadline) => time::timeout_at(deadline, replies.recv())
                .await
                .map_err(|_| ClientError::ReplyTimeout)?,
            None => replies.recv().await,
        };

        // The session dropped its sender, so it's gone.
        let reply = reply.ok_or(ClientError::TransportClosed)?;

        match pacer.on_reply(&reply.payload, reply.received) {
            Ok(rtt) => {
                log::debug!(
                    "received: {} ({:.3} ms)",
                    String::from_utf8_lossy(&reply.payload),
                    rtt.as_secs_f64() * 1000.0
                );
                return Ok(());
            }
            Err(err) => log::debug!("discarding reply: {}", err),
        }
    }
}

async fn shutdown(
    conn: &quinn::Connection,
    commands: mpsc::UnboundedSender<Command>,
    driver: tokio::task::JoinHandle<Result<(), TransportError>>,
) {
    // The driver may already be gone, in which case there's nothing to finish.
    commands.send(Command::Close).ok();

    match driver.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("connection driver failed: {}", err),
        Err(err) => log::warn!("connection driver panicked: {}", err),
    }

    conn.close(VarInt::from_u32(0), b"");
}

// Own the connection: feed it events and commands, and write whatever comes out.
async fn drive(
    mut transport: QuinnTransport,
    mut demux: Demux<Framer, ClientSession>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> Result<(), TransportError> {
    loop {
        let transmits = tokio::select! {
            event = transport.next_event() => match event {
                Some(event) => demux.handle_event(event),
                None => return Ok(()),
            },
            command = commands.recv() => match command {
                Some(Command::Datagram(payload)) => {
                    let (sent, transmits) = demux.drive(|framer, session| session.send_datagram(framer, payload));
                    if !sent {
                        // The session is gone, which the run loop will notice when its replies stop.
                        log::debug!("session closed before sending");
                    }

                    transmits
                }
                Some(Command::Close) | None => {
                    let ((), transmits) = demux.drive(|framer, session| session.close(framer));
                    return transport.write_all(transmits).await;
                }
            },
        };

        transport.write_all(transmits).await?;
    }
}
