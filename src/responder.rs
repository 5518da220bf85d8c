use std::collections::HashMap;

use bytes::Bytes;

use crate::h3::{Framing, VarInt};
use crate::{message, Handler, HeaderSet, OtherEvent, Role, Session, State};

/// Echoes every datagram back to its session, prefixed with `Received `.
#[derive(Debug, Default, Clone, Copy)]
pub struct Responder;

impl Responder {
    pub fn respond<F: Framing>(&self, framer: &mut F, session_id: VarInt, payload: &[u8]) {
        log::trace!("echoing {} bytes on session {}", payload.len(), session_id);
        framer.send_datagram(session_id, message::reply(payload));
    }
}

/// The server side of a connection: every established session, keyed by its CONNECT stream.
///
/// A session is inserted when its CONNECT is accepted, and removed when that stream ends or the connection closes.
/// Refused requests never get an entry.
#[derive(Debug)]
pub struct ServerSessions {
    max_sessions: usize,
    sessions: HashMap<VarInt, Session>,
    responder: Responder,
}

impl ServerSessions {
    pub fn new(max_sessions: u32) -> Self {
        Self {
            max_sessions: max_sessions as usize,
            sessions: HashMap::new(),
            responder: Responder,
        }
    }

    pub fn get(&self, session_id: VarInt) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn refuse<F: Framing>(&self, framer: &mut F, stream_id: VarInt, status: http::StatusCode) {
        let mut session = Session::new(stream_id, Role::Server);
        session.transition(State::Rejected);

        framer.send_headers(stream_id, &HeaderSet::status(status), true);

        log::info!("rejected session {}: {}", stream_id, status);
        session.transition(State::Closed);
    }
}

impl Handler for ServerSessions {
    fn on_headers<F: Framing>(&mut self, framer: &mut F, stream_id: VarInt, headers: HeaderSet, stream_ended: bool) {
        if self.sessions.contains_key(&stream_id) {
            log::debug!("ignoring repeated HEADERS on session {}", stream_id);
            return;
        }

        if !headers.is_webtransport_connect() {
            return self.refuse(framer, stream_id, http::StatusCode::NOT_FOUND);
        }

        // A session needs the CONNECT stream to stay open.
        if stream_ended {
            return self.refuse(framer, stream_id, http::StatusCode::BAD_REQUEST);
        }

        if self.sessions.len() >= self.max_sessions {
            return self.refuse(framer, stream_id, http::StatusCode::TOO_MANY_REQUESTS);
        }

        framer.send_headers(stream_id, &HeaderSet::accepted(), false);

        let mut session = Session::new(stream_id, Role::Server);
        session.transition(State::Established);

        log::info!(
            "accepted session {}: {}",
            stream_id,
            String::from_utf8_lossy(headers.get(b":path").unwrap_or_default())
        );

        self.sessions.insert(stream_id, session);
    }

    fn on_datagram<F: Framing>(&mut self, framer: &mut F, session_id: VarInt, payload: Bytes) {
        match self.sessions.get(&session_id) {
            Some(session) if session.is_established() => self.responder.respond(framer, session_id, &payload),
            _ => log::debug!("dropping datagram for unknown session {}", session_id),
        }
    }

    fn on_stream_data<F: Framing>(
        &mut self,
        framer: &mut F,
        session_id: VarInt,
        stream_id: VarInt,
        data: Bytes,
        stream_ended: bool,
    ) {
        if stream_id != session_id {
            log::trace!("ignoring {} bytes on webtransport stream {}", data.len(), stream_id);
            return;
        }

        if !stream_ended {
            return;
        }

        if let Some(mut session) = self.sessions.remove(&session_id) {
            framer.finish_stream(session_id);
            session.transition(State::Closed);
            log::info!("closed session {}", session_id);
        }
    }

    fn on_connection<F: Framing>(&mut self, _framer: &mut F, event: OtherEvent) {
        match event {
            OtherEvent::ConnectionClosed { reason } => {
                for (id, mut session) in self.sessions.drain() {
                    session.transition(State::Closed);
                    log::info!("closed session {}: {}", id, reason);
                }
            }
            OtherEvent::SettingsReceived { max_sessions } => {
                log::debug!("client supports {} sessions", max_sessions)
            }
            OtherEvent::StreamReset { .. } => {}
        }
    }

    fn is_registered(&self, session_id: VarInt) -> bool {
        self.sessions.contains_key(&session_id)
    }
}
