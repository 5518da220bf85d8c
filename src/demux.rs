use bytes::Bytes;

use crate::h3::{Framing, VarInt};
use crate::{H3Event, HeaderSet, OtherEvent, TransportEvent, Transmit};

/// Session logic driven by the [`Demux`].
///
/// Every callback gets the framing layer so it can queue responses. Those are flushed once the whole transport
/// event has been processed.
pub trait Handler {
    /// A HEADERS frame arrived on a request stream.
    fn on_headers<F: Framing>(&mut self, framer: &mut F, stream_id: VarInt, headers: HeaderSet, stream_ended: bool);

    /// A datagram arrived for the session with the given id, which may not exist.
    fn on_datagram<F: Framing>(&mut self, framer: &mut F, session_id: VarInt, payload: Bytes);

    /// Data or a FIN for a registered session, either on its CONNECT stream (`stream_id == session_id`) or one of
    /// its WebTransport streams.
    fn on_stream_data<F: Framing>(
        &mut self,
        framer: &mut F,
        session_id: VarInt,
        stream_id: VarInt,
        data: Bytes,
        stream_ended: bool,
    );

    /// A connection level event, such as the peer's SETTINGS or the connection closing.
    fn on_connection<F: Framing>(&mut self, framer: &mut F, event: OtherEvent);

    /// Whether a session is currently registered under the given id.
    fn is_registered(&self, session_id: VarInt) -> bool;
}

/// Routes transport events through the framing layer to a session [`Handler`].
///
/// Each call returns everything queued while processing, so responses to one transport event are written before
/// the next event is looked at.
#[derive(Debug)]
pub struct Demux<F, H> {
    framer: F,
    handler: H,
}

impl<F: Framing, H: Handler> Demux<F, H> {
    pub fn new(framer: F, handler: H) -> Self {
        Self { framer, handler }
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<Transmit> {
        for event in self.framer.handle_event(event) {
            self.dispatch(event);
        }

        self.flush()
    }

    /// Run some logic against the handler outside of an event, such as sending a datagram, then flush.
    pub fn drive<R>(&mut self, f: impl FnOnce(&mut F, &mut H) -> R) -> (R, Vec<Transmit>) {
        let res = f(&mut self.framer, &mut self.handler);
        (res, self.flush())
    }

    /// Drain everything queued by the framing layer.
    pub fn flush(&mut self) -> Vec<Transmit> {
        std::iter::from_fn(|| self.framer.poll_transmit()).collect()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn framer(&self) -> &F {
        &self.framer
    }

    fn dispatch(&mut self, event: H3Event) {
        match event {
            H3Event::HeadersReceived {
                stream_id,
                headers,
                stream_ended,
            } => self.handler.on_headers(&mut self.framer, stream_id, headers, stream_ended),
            H3Event::DatagramReceived { stream_id, data } => {
                self.handler.on_datagram(&mut self.framer, stream_id, data)
            }
            H3Event::StreamDataReceived {
                stream_id,
                session_id,
                data,
                stream_ended,
            } => {
                // Request streams are their own session.
                let session_id = session_id.unwrap_or(stream_id);

                if self.handler.is_registered(session_id) {
                    self.handler
                        .on_stream_data(&mut self.framer, session_id, stream_id, data, stream_ended);
                } else {
                    log::trace!("dropping data for unknown session {} on stream {}", session_id, stream_id);
                }
            }
            H3Event::Other(OtherEvent::StreamReset { stream_id }) => {
                // A reset CONNECT stream ends its session just like a FIN.
                if self.handler.is_registered(stream_id) {
                    self.handler
                        .on_stream_data(&mut self.framer, stream_id, stream_id, Bytes::new(), true);
                }
            }
            H3Event::Other(event) => self.handler.on_connection(&mut self.framer, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    // Emits a fixed list of events for every transport event, and echoes each callback as a datagram.
    struct Scripted {
        events: Vec<H3Event>,
        queued: VecDeque<Transmit>,
    }

    impl Framing for Scripted {
        fn handle_event(&mut self, _event: TransportEvent) -> Vec<H3Event> {
            self.events.clone()
        }

        fn send_headers(&mut self, _stream_id: VarInt, _headers: &HeaderSet, _end_stream: bool) {}

        fn send_datagram(&mut self, _session_id: VarInt, payload: Bytes) {
            self.queued.push_back(Transmit::Datagram(payload));
        }

        fn finish_stream(&mut self, _stream_id: VarInt) {}

        fn poll_transmit(&mut self) -> Option<Transmit> {
            self.queued.pop_front()
        }
    }

    #[derive(Default)]
    struct Calls {
        registered: Option<VarInt>,
    }

    impl Handler for Calls {
        fn on_headers<F: Framing>(&mut self, framer: &mut F, _stream_id: VarInt, _headers: HeaderSet, _ended: bool) {
            framer.send_datagram(VarInt::from_u32(0), Bytes::from_static(b"headers"));
        }

        fn on_datagram<F: Framing>(&mut self, framer: &mut F, _session_id: VarInt, _payload: Bytes) {
            framer.send_datagram(VarInt::from_u32(0), Bytes::from_static(b"datagram"));
        }

        fn on_stream_data<F: Framing>(&mut self, framer: &mut F, _: VarInt, _: VarInt, _: Bytes, _: bool) {
            framer.send_datagram(VarInt::from_u32(0), Bytes::from_static(b"stream"));
        }

        fn on_connection<F: Framing>(&mut self, framer: &mut F, _event: OtherEvent) {
            framer.send_datagram(VarInt::from_u32(0), Bytes::from_static(b"connection"));
        }

        fn is_registered(&self, session_id: VarInt) -> bool {
            self.registered == Some(session_id)
        }
    }

    fn demux(registered: Option<u32>) -> Demux<Scripted, Calls> {
        let framer = Scripted {
            events: vec![
                H3Event::HeadersReceived {
                    stream_id: VarInt::from_u32(0),
                    headers: HeaderSet::new(),
                    stream_ended: false,
                },
                H3Event::StreamDataReceived {
                    stream_id: VarInt::from_u32(4),
                    session_id: Some(VarInt::from_u32(0)),
                    data: Bytes::new(),
                    stream_ended: false,
                },
                H3Event::DatagramReceived {
                    stream_id: VarInt::from_u32(0),
                    data: Bytes::new(),
                },
                H3Event::Other(OtherEvent::StreamReset {
                    stream_id: VarInt::from_u32(0),
                }),
                H3Event::Other(OtherEvent::ConnectionClosed {
                    reason: String::new(),
                }),
            ],
            queued: VecDeque::new(),
        };

        let handler = Calls {
            registered: registered.map(VarInt::from_u32),
        };

        Demux::new(framer, handler)
    }

    fn payloads(transmits: Vec<Transmit>) -> Vec<Bytes> {
        transmits
            .into_iter()
            .map(|transmit| match transmit {
                Transmit::Datagram(payload) => payload,
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    #[test]
    fn dispatch_in_order() {
        let mut demux = demux(Some(0));

        let out = demux.handle_event(TransportEvent::Datagram(Bytes::new()));
        assert_eq!(
            payloads(out),
            vec!["headers", "stream", "datagram", "stream", "connection"]
        );

        // Everything was flushed at once.
        assert!(demux.flush().is_empty());
    }

    #[test]
    fn unregistered_dropped() {
        let mut demux = demux(None);

        let out = demux.handle_event(TransportEvent::Datagram(Bytes::new()));
        assert_eq!(payloads(out), vec!["headers", "datagram", "connection"]);
    }

    #[test]
    fn drive_flushes() {
        let mut demux = demux(None);

        let (res, out) = demux.drive(|framer, _| {
            framer.send_datagram(VarInt::from_u32(0), Bytes::from_static(b"hello"));
            42
        });

        assert_eq!(res, 42);
        assert_eq!(payloads(out), vec!["hello"]);
    }
}
