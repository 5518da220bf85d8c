use crate::h3::Framer;
use crate::{Demux, QuinnTransport, ServerConfig, ServerSessions, TransportError};

/// Accept connections until the endpoint is closed, serving each on its own task.
///
/// A failing connection is logged and never stops the accept loop.
pub async fn serve(endpoint: quinn::Endpoint, config: ServerConfig) {
    while let Some(conn) = endpoint.accept().await {
        let config = config.clone();

        tokio::spawn(async move {
            let remote = conn.remote_address();
            log::debug!("received QUIC connection from {}", remote);

            let conn = match conn.await {
                Ok(conn) => conn,
                Err(err) => {
                    log::warn!("failed to accept connection from {}: {}", remote, err);
                    return;
                }
            };

            log::info!("established QUIC connection with {}", remote);

            match accept(conn, &config).await {
                Ok(()) => log::info!("connection with {} closed", remote),
                Err(err) => log::warn!("connection with {} failed: {}", remote, err),
            }
        });
    }
}

/// Serve WebTransport sessions on a single connection until it closes.
pub async fn accept(conn: quinn::Connection, config: &ServerConfig) -> Result<(), TransportError> {
    let mut transport = QuinnTransport::new(conn);
    let mut demux = Demux::new(
        Framer::new(config.max_sessions),
        ServerSessions::new(config.max_sessions),
    );

    // Our SETTINGS go out right away.
    transport.write_all(demux.flush()).await?;

    while let Some(event) = transport.next_event().await {
        let transmits = demux.handle_event(event);
        transport.write_all(transmits).await?;
    }

    Ok(())
}
