use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::h3::{Framing, VarInt};
use crate::{Handler, HeaderSet, OtherEvent, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,

    /// The client sent its CONNECT and awaits the response.
    HeadersSent,

    Established,

    /// The server refused the CONNECT. The session is closed right after.
    Rejected,

    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A WebTransport session, identified by the stream carrying its CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    stream_id: VarInt,
    role: Role,
    state: State,
}

impl Session {
    pub fn new(stream_id: VarInt, role: Role) -> Self {
        Self {
            stream_id,
            role,
            state: State::Init,
        }
    }

    pub fn stream_id(&self) -> VarInt {
        self.stream_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub(crate) fn transition(&mut self, state: State) {
        log::trace!(
            "{:?} session {}: {:?} -> {:?}",
            self.role,
            self.stream_id,
            self.state,
            state
        );
        self.state = state;
    }
}

/// A reply datagram, stamped with the time it was read off the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub payload: Bytes,
    pub received: Instant,
}

/// The client side of a single session.
///
/// Establishment is signalled once through a oneshot, and replies are forwarded over a channel while the session
/// is established. Both are dropped when the session closes, which wakes anybody still waiting on them.
#[derive(Debug)]
pub struct ClientSession {
    session: Session,
    strict: bool,

    ready: Option<oneshot::Sender<Result<(), SessionError>>>,
    replies: Option<mpsc::UnboundedSender<Reply>>,
}

impl ClientSession {
    pub fn new(
        stream_id: VarInt,
        strict: bool,
        ready: oneshot::Sender<Result<(), SessionError>>,
        replies: mpsc::UnboundedSender<Reply>,
    ) -> Self {
        Self {
            session: Session::new(stream_id, Role::Client),
            strict,
            ready: Some(ready),
            replies: Some(replies),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> State {
        self.session.state
    }

    /// Send the CONNECT request for `authority` and `path`.
    pub fn connect<F: Framing>(&mut self, framer: &mut F, authority: &str, path: &str) {
        if self.session.state != State::Init {
            log::debug!("session {} already connecting", self.session.stream_id);
            return;
        }

        let request = HeaderSet::connect_request(authority, path);
        framer.send_headers(self.session.stream_id, &request, false);

        self.session.transition(State::HeadersSent);
    }

    /// Queue an application datagram, dropping it unless the session is established.
    pub fn send_datagram<F: Framing>(&mut self, framer: &mut F, payload: Bytes) -> bool {
        if !self.session.is_established() {
            log::debug!("dropping datagram on {:?} session", self.session.state);
            return false;
        }

        framer.send_datagram(self.session.stream_id, payload);
        true
    }

    /// Finish our side of the CONNECT stream, ending the session.
    pub fn close<F: Framing>(&mut self, framer: &mut F) {
        if self.session.state == State::Closed {
            return;
        }

        if self.session.state != State::Init {
            framer.finish_stream(self.session.stream_id);
        }

        self.teardown(SessionError::Closed("closed locally".to_string()));
    }

    fn teardown(&mut self, err: SessionError) {
        match self.ready.take() {
            Some(ready) => {
                log::info!("session {} failed: {}", self.session.stream_id, err);
                ready.send(Err(err)).ok();
            }
            None => log::debug!("session {} ended: {}", self.session.stream_id, err),
        }

        self.replies = None;
        self.session.transition(State::Closed);
    }
}

impl Handler for ClientSession {
    fn on_headers<F: Framing>(&mut self, framer: &mut F, stream_id: VarInt, headers: HeaderSet, _stream_ended: bool) {
        if stream_id != self.session.stream_id {
            log::debug!("ignoring HEADERS on unknown stream {}", stream_id);
            return;
        }

        // Duplicates and anything after the response change nothing.
        if self.session.state != State::HeadersSent {
            log::debug!("ignoring HEADERS on {:?} session", self.session.state);
            return;
        }

        match headers.status_code() {
            Some(http::StatusCode::OK) => {
                log::info!("session {} established", stream_id);
                self.session.transition(State::Established);

                if let Some(ready) = self.ready.take() {
                    ready.send(Ok(())).ok();
                }
            }
            Some(status) => {
                framer.finish_stream(stream_id);
                self.teardown(SessionError::Rejected(status));
            }
            None => {
                framer.finish_stream(stream_id);
                self.teardown(SessionError::InvalidStatus);
            }
        }
    }

    fn on_datagram<F: Framing>(&mut self, framer: &mut F, session_id: VarInt, payload: Bytes) {
        if session_id != self.session.stream_id {
            log::debug!("dropping datagram for unknown session {}", session_id);
            return;
        }

        match self.session.state {
            State::Established => {
                let reply = Reply {
                    payload,
                    received: Instant::now(),
                };

                if let Some(replies) = &self.replies {
                    replies.send(reply).ok();
                }
            }
            State::HeadersSent if self.strict => {
                framer.finish_stream(session_id);
                self.teardown(SessionError::ProtocolViolation("datagram before the session was established"));
            }
            state => log::debug!("dropping datagram on {:?} session", state),
        }
    }

    fn on_stream_data<F: Framing>(
        &mut self,
        _framer: &mut F,
        session_id: VarInt,
        stream_id: VarInt,
        data: Bytes,
        stream_ended: bool,
    ) {
        if stream_id != session_id {
            log::trace!("ignoring {} bytes on webtransport stream {}", data.len(), stream_id);
            return;
        }

        if stream_ended && self.session.state != State::Closed {
            self.teardown(SessionError::Closed("CONNECT stream ended".to_string()));
        }
    }

    fn on_connection<F: Framing>(&mut self, _framer: &mut F, event: OtherEvent) {
        match event {
            OtherEvent::SettingsReceived { max_sessions: 0 } if self.ready.is_some() => {
                self.teardown(SessionError::WebTransportUnsupported);
            }
            OtherEvent::SettingsReceived { max_sessions } => {
                log::debug!("peer supports {} sessions", max_sessions);
            }
            OtherEvent::ConnectionClosed { reason } => {
                if self.session.state != State::Closed {
                    self.teardown(SessionError::Closed(reason));
                }
            }
            OtherEvent::StreamReset { .. } => {}
        }
    }

    fn is_registered(&self, session_id: VarInt) -> bool {
        session_id == self.session.stream_id && self.session.state != State::Closed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::Transmit;

    // Records what the session queued without encoding anything.
    #[derive(Default)]
    struct Recorder {
        headers: Vec<(VarInt, HeaderSet, bool)>,
        datagrams: Vec<(VarInt, Bytes)>,
        finished: Vec<VarInt>,
        transmits: VecDeque<Transmit>,
    }

    impl Framing for Recorder {
        fn handle_event(&mut self, _event: crate::TransportEvent) -> Vec<crate::H3Event> {
            Vec::new()
        }

        fn send_headers(&mut self, stream_id: VarInt, headers: &HeaderSet, end_stream: bool) {
            self.headers.push((stream_id, headers.clone(), end_stream));
        }

        fn send_datagram(&mut self, session_id: VarInt, payload: Bytes) {
            self.datagrams.push((session_id, payload));
        }

        fn finish_stream(&mut self, stream_id: VarInt) {
            self.finished.push(stream_id);
        }

        fn poll_transmit(&mut self) -> Option<Transmit> {
            self.transmits.pop_front()
        }
    }

    struct Harness {
        framer: Recorder,
        session: ClientSession,
        ready: oneshot::Receiver<Result<(), SessionError>>,
        replies: mpsc::UnboundedReceiver<Reply>,
    }

    const STREAM: VarInt = VarInt::from_u32(0);

    fn harness(strict: bool) -> Harness {
        let (ready_tx, ready) = oneshot::channel();
        let (replies_tx, replies) = mpsc::unbounded_channel();

        let mut framer = Recorder::default();
        let mut session = ClientSession::new(STREAM, strict, ready_tx, replies_tx);
        session.connect(&mut framer, "localhost:4433", "/counter");

        Harness {
            framer,
            session,
            ready,
            replies,
        }
    }

    #[test]
    fn connect_request() {
        let h = harness(false);
        assert_eq!(h.session.state(), State::HeadersSent);

        let (stream_id, headers, end) = &h.framer.headers[0];
        assert_eq!(*stream_id, STREAM);
        assert!(!end);
        assert!(headers.is_webtransport_connect());
        assert_eq!(headers.get(b":authority"), Some(&b"localhost:4433"[..]));
        assert_eq!(headers.get(b":path"), Some(&b"/counter"[..]));
    }

    #[test]
    fn established_once() {
        let mut h = harness(false);

        h.session.on_headers(&mut h.framer, STREAM, HeaderSet::accepted(), false);
        assert_eq!(h.session.state(), State::Established);
        assert_eq!(h.ready.try_recv(), Ok(Ok(())));

        // A duplicate is ignored.
        h.session.on_headers(&mut h.framer, STREAM, HeaderSet::accepted(), false);
        h.session
            .on_headers(&mut h.framer, STREAM, HeaderSet::status(http::StatusCode::NOT_FOUND), false);
        assert_eq!(h.session.state(), State::Established);
        assert!(h.framer.finished.is_empty());
    }

    #[test]
    fn rejected() {
        for status in [http::StatusCode::NOT_FOUND, http::StatusCode::TOO_MANY_REQUESTS, http::StatusCode::CREATED] {
            let mut h = harness(false);

            h.session.on_headers(&mut h.framer, STREAM, HeaderSet::status(status), true);
            assert_eq!(h.session.state(), State::Closed);
            assert_eq!(h.ready.try_recv(), Ok(Err(SessionError::Rejected(status))));
        }
    }

    #[test]
    fn missing_status() {
        let mut h = harness(false);

        h.session.on_headers(&mut h.framer, STREAM, HeaderSet::new(), false);
        assert_eq!(h.ready.try_recv(), Ok(Err(SessionError::InvalidStatus)));
    }

    #[test]
    fn headers_for_other_stream() {
        let mut h = harness(false);

        h.session
            .on_headers(&mut h.framer, VarInt::from_u32(4), HeaderSet::accepted(), false);
        assert_eq!(h.session.state(), State::HeadersSent);
    }

    #[test]
    fn early_datagram_lenient() {
        let mut h = harness(false);

        h.session
            .on_datagram(&mut h.framer, STREAM, Bytes::from_static(b"Received Message 0"));
        assert_eq!(h.session.state(), State::HeadersSent);
        assert!(h.replies.try_recv().is_err());
    }

    #[test]
    fn early_datagram_strict() {
        let mut h = harness(true);

        h.session
            .on_datagram(&mut h.framer, STREAM, Bytes::from_static(b"Received Message 0"));
        assert_eq!(h.session.state(), State::Closed);
        assert_eq!(h.framer.finished, vec![STREAM]);
        assert!(matches!(h.ready.try_recv(), Ok(Err(SessionError::ProtocolViolation(_)))));
    }

    #[test]
    fn replies_forwarded() {
        let mut h = harness(false);
        h.session.on_headers(&mut h.framer, STREAM, HeaderSet::accepted(), false);

        assert!(h.session.send_datagram(&mut h.framer, Bytes::from_static(b"Message 0")));
        assert_eq!(h.framer.datagrams, vec![(STREAM, Bytes::from_static(b"Message 0"))]);

        h.session
            .on_datagram(&mut h.framer, STREAM, Bytes::from_static(b"Received Message 0"));
        h.session
            .on_datagram(&mut h.framer, VarInt::from_u32(8), Bytes::from_static(b"Received Message 9"));

        assert_eq!(h.replies.try_recv().unwrap().payload, &b"Received Message 0"[..]);
        assert!(h.replies.try_recv().is_err());
    }

    #[test]
    fn connection_closed_wakes_waiters() {
        let mut h = harness(false);
        h.session.on_headers(&mut h.framer, STREAM, HeaderSet::accepted(), false);

        h.session.on_connection(
            &mut h.framer,
            OtherEvent::ConnectionClosed {
                reason: "idle timeout".to_string(),
            },
        );

        assert_eq!(h.session.state(), State::Closed);
        assert_eq!(h.replies.try_recv(), Err(mpsc::error::TryRecvError::Disconnected));
        assert!(!h.session.send_datagram(&mut h.framer, Bytes::from_static(b"Message 1")));
    }

    #[test]
    fn closed_before_established() {
        let mut h = harness(false);

        h.session.on_connection(
            &mut h.framer,
            OtherEvent::ConnectionClosed {
                reason: "refused".to_string(),
            },
        );

        assert_eq!(h.ready.try_recv(), Ok(Err(SessionError::Closed("refused".to_string()))));
    }

    #[test]
    fn webtransport_unsupported() {
        let mut h = harness(false);

        h.session
            .on_connection(&mut h.framer, OtherEvent::SettingsReceived { max_sessions: 0 });
        assert_eq!(h.ready.try_recv(), Ok(Err(SessionError::WebTransportUnsupported)));
    }

    #[test]
    fn connect_stream_ended() {
        let mut h = harness(false);
        h.session.on_headers(&mut h.framer, STREAM, HeaderSet::accepted(), false);
        assert!(h.session.is_registered(STREAM));

        h.session
            .on_stream_data(&mut h.framer, STREAM, STREAM, Bytes::new(), true);
        assert_eq!(h.session.state(), State::Closed);
        assert!(!h.session.is_registered(STREAM));
    }

    #[test]
    fn close() {
        let mut h = harness(false);
        h.session.on_headers(&mut h.framer, STREAM, HeaderSet::accepted(), false);

        h.session.close(&mut h.framer);
        h.session.close(&mut h.framer);

        assert_eq!(h.framer.finished, vec![STREAM]);
        assert_eq!(h.session.state(), State::Closed);
    }
}
