use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::h3::VarInt;
use crate::{TransportEvent, Transmit};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("failed to write: {0}")]
    Write(#[from] quinn::WriteError),

    #[error("failed to send datagram: {0}")]
    Datagram(#[from] quinn::SendDatagramError),
}

// Produced by the reader tasks, in the order they observe things.
enum Incoming {
    Event(TransportEvent),

    // The peer opened a bidirectional stream; we may need to respond on it.
    Bi(VarInt, quinn::SendStream),
}

/// Adapts a [`quinn::Connection`] into an ordered stream of [`TransportEvent`]s, and writes [`Transmit`]s back.
///
/// Reading happens on background tasks that all feed a single channel. Writing only happens through
/// [`QuinnTransport::write`], so whoever owns the transport is the only writer.
pub struct QuinnTransport {
    conn: quinn::Connection,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    tx: mpsc::UnboundedSender<Incoming>,

    // Our side of every bidirectional stream we may write to.
    send: HashMap<VarInt, quinn::SendStream>,

    // Opened on first use.
    control: Option<quinn::SendStream>,

    closed: bool,
}

impl QuinnTransport {
    pub fn new(conn: quinn::Connection) -> Self {
        let (tx, incoming) = mpsc::unbounded_channel();

        tokio::spawn(accept_uni(conn.clone(), tx.clone()));
        tokio::spawn(accept_bi(conn.clone(), tx.clone()));
        tokio::spawn(read_datagrams(conn.clone(), tx.clone()));
        tokio::spawn(closed(conn.clone(), tx.clone()));

        Self {
            conn,
            incoming,
            tx,
            send: HashMap::new(),
            control: None,
            closed: false,
        }
    }

    pub fn connection(&self) -> &quinn::Connection {
        &self.conn
    }

    /// Track a bidirectional stream we opened ourselves, such as the CONNECT stream.
    pub fn register_bi(&mut self, send: quinn::SendStream, recv: quinn::RecvStream) -> VarInt {
        let stream_id = VarInt::from(send.id());
        self.send.insert(stream_id, send);

        tokio::spawn(read_stream(recv, false, self.tx.clone()));

        stream_id
    }

    /// Returns the next event, or `None` once the connection is gone and every event was delivered.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        // Anything still queued after the close is moot.
        if self.closed {
            return None;
        }

        loop {
            match self.incoming.recv().await? {
                Incoming::Event(event) => {
                    self.closed = matches!(event, TransportEvent::Closed { .. });
                    return Some(event);
                }
                Incoming::Bi(stream_id, send) => {
                    self.send.insert(stream_id, send);
                }
            }
        }
    }

    pub async fn write(&mut self, transmit: Transmit) -> Result<(), TransportError> {
        match transmit {
            Transmit::Control(data) => {
                if self.control.is_none() {
                    self.control = Some(self.conn.open_uni().await?);
                }

                if let Some(control) = &mut self.control {
                    control.write_all(&data).await?;
                }
            }
            Transmit::Stream { stream_id, data, fin } => {
                let send = match self.send.get_mut(&stream_id) {
                    Some(send) => send,
                    None => {
                        log::debug!("dropping write to unknown stream {}", stream_id);
                        return Ok(());
                    }
                };

                let res = match fin {
                    true => write_fin(send, &data).await,
                    false => send.write_all(&data).await,
                };

                if fin {
                    self.send.remove(&stream_id);
                }

                match res {
                    // The peer no longer wants this stream, which doesn't affect the rest of the connection.
                    Err(quinn::WriteError::Stopped(code)) => {
                        log::debug!("stream {} stopped by peer: {}", stream_id, code);
                        self.send.remove(&stream_id);
                    }
                    res => res?,
                }
            }
            Transmit::Datagram(data) => match self.conn.send_datagram(data) {
                Err(quinn::SendDatagramError::TooLarge) => log::warn!("dropping datagram: too large"),
                res => res?,
            },
        }

        Ok(())
    }

    /// Write everything from one flush, in order.
    pub async fn write_all(&mut self, transmits: Vec<Transmit>) -> Result<(), TransportError> {
        for transmit in transmits {
            self.write(transmit).await?;
        }

        Ok(())
    }
}

async fn write_fin(send: &mut quinn::SendStream, data: &[u8]) -> Result<(), quinn::WriteError> {
    send.write_all(data).await?;
    send.finish().await
}

async fn accept_uni(conn: quinn::Connection, tx: mpsc::UnboundedSender<Incoming>) {
    while let Ok(recv) = conn.accept_uni().await {
        tokio::spawn(read_stream(recv, true, tx.clone()));
    }
}

async fn accept_bi(conn: quinn::Connection, tx: mpsc::UnboundedSender<Incoming>) {
    while let Ok((send, recv)) = conn.accept_bi().await {
        // Queue the send half first so it's known before any data arrives.
        if tx.send(Incoming::Bi(VarInt::from(send.id()), send)).is_err() {
            return;
        }

        tokio::spawn(read_stream(recv, false, tx.clone()));
    }
}

async fn read_stream(mut recv: quinn::RecvStream, uni: bool, tx: mpsc::UnboundedSender<Incoming>) {
    let stream_id = VarInt::from(recv.id());

    loop {
        let event = match recv.read_chunk(usize::MAX, true).await {
            Ok(Some(chunk)) => TransportEvent::StreamData {
                stream_id,
                uni,
                data: chunk.bytes,
                fin: false,
            },
            Ok(None) => TransportEvent::StreamData {
                stream_id,
                uni,
                data: Default::default(),
                fin: true,
            },
            Err(quinn::ReadError::Reset(code)) => {
                log::debug!("stream {} reset by peer: {}", stream_id, code);
                TransportEvent::StreamReset { stream_id }
            }
            Err(err) => {
                // Connection errors are reported once, by the close watcher.
                log::trace!("stream {} read failed: {}", stream_id, err);
                return;
            }
        };

        let done = !matches!(event, TransportEvent::StreamData { fin: false, .. });

        if tx.send(Incoming::Event(event)).is_err() || done {
            return;
        }
    }
}

async fn read_datagrams(conn: quinn::Connection, tx: mpsc::UnboundedSender<Incoming>) {
    while let Ok(datagram) = conn.read_datagram().await {
        if tx.send(Incoming::Event(TransportEvent::Datagram(datagram))).is_err() {
            return;
        }
    }
}

async fn closed(conn: quinn::Connection, tx: mpsc::UnboundedSender<Incoming>) {
    let err = conn.closed().await;
    tx.send(Incoming::Event(TransportEvent::Closed {
        reason: err.to_string(),
    }))
    .ok();
}
