use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};

use super::{qpack, read_varint, Datagram, Frame, FrameError, Settings, StreamUni, VarInt};
use crate::{H3Event, HeaderSet, OtherEvent, TransportEvent, Transmit};

/// The HTTP/3 framing layer as seen by the [`Demux`](crate::Demux).
///
/// Implementations turn one transport event into zero or more HTTP/3 events, and queue outbound frames until
/// [`Framing::poll_transmit`] drains them. Nothing here performs I/O.
pub trait Framing {
    fn handle_event(&mut self, event: TransportEvent) -> Vec<H3Event>;

    /// Queue a HEADERS frame, optionally finishing the stream after it.
    fn send_headers(&mut self, stream_id: VarInt, headers: &HeaderSet, end_stream: bool);

    /// Queue an HTTP/3 datagram for the session with the given id.
    fn send_datagram(&mut self, session_id: VarInt, payload: Bytes);

    /// Queue a FIN on a stream we can write to.
    fn finish_stream(&mut self, stream_id: VarInt);

    fn poll_transmit(&mut self) -> Option<Transmit>;
}

// What we know about an incoming stream so far.
#[derive(Debug)]
enum Recv {
    // A unidirectional stream before its type arrived.
    UniPending(BytesMut),

    // A bidirectional stream before we know whether it's a request or a WebTransport stream.
    BiPending(BytesMut),

    Control { buf: BytesMut, settings: bool },

    // A request stream, carrying HEADERS and DATA frames.
    Request(BytesMut),

    WebTransport { session_id: Option<VarInt>, buf: BytesMut },

    // QPACK streams, push streams, and anything we don't understand.
    Ignored,
}

/// A minimal sans-IO HTTP/3 connection, just enough for WebTransport.
#[derive(Debug)]
pub struct Framer {
    streams: HashMap<VarInt, Recv>,
    transmits: VecDeque<Transmit>,
    peer_settings: Option<Settings>,
}

impl Framer {
    /// Create a framer and queue our SETTINGS, advertising `max_sessions` WebTransport sessions.
    pub fn new(max_sessions: u32) -> Self {
        let mut settings = Settings::default();
        settings.enable_webtransport(max_sessions);

        let mut buf = BytesMut::new();
        StreamUni::CONTROL.encode(&mut buf);
        settings.encode(&mut buf);

        let mut transmits = VecDeque::new();
        transmits.push_back(Transmit::Control(buf.freeze()));

        Self {
            streams: HashMap::new(),
            transmits,
            peer_settings: None,
        }
    }

    /// The SETTINGS received from the peer, if they have arrived.
    pub fn peer_settings(&self) -> Option<&Settings> {
        self.peer_settings.as_ref()
    }

    fn on_stream_data(&mut self, stream_id: VarInt, uni: bool, data: Bytes, fin: bool) -> Vec<H3Event> {
        let mut state = self.streams.remove(&stream_id).unwrap_or_else(|| match uni {
            true => Recv::UniPending(BytesMut::new()),
            false => Recv::BiPending(BytesMut::new()),
        });

        let mut events = Vec::new();

        if let Err(err) = self.process(stream_id, &mut state, data, fin, &mut events) {
            log::warn!("dropping stream {}: {}", stream_id, err);
            state = Recv::Ignored;
        }

        // Nothing else will arrive on a finished stream.
        if !fin {
            self.streams.insert(stream_id, state);
        }

        events
    }

    fn process(
        &mut self,
        stream_id: VarInt,
        state: &mut Recv,
        data: Bytes,
        fin: bool,
        events: &mut Vec<H3Event>,
    ) -> Result<(), FrameError> {
        match state {
            Recv::UniPending(buf) | Recv::BiPending(buf) | Recv::Request(buf) => buf.extend_from_slice(&data),
            Recv::Control { buf, .. } | Recv::WebTransport { buf, .. } => buf.extend_from_slice(&data),
            Recv::Ignored => return Ok(()),
        }

        // Resolve the stream type first, which may take a few chunks.
        match state {
            Recv::UniPending(buf) => {
                let typ = match read_varint(buf) {
                    Some(typ) => StreamUni(typ),
                    None => return Ok(()),
                };

                let buf = std::mem::take(buf);
                *state = match typ {
                    StreamUni::CONTROL => Recv::Control { buf, settings: false },
                    StreamUni::WEBTRANSPORT => Recv::WebTransport { session_id: None, buf },
                    typ => {
                        log::trace!("ignoring uni stream {} of type {:?}", stream_id, typ);
                        Recv::Ignored
                    }
                };
            }
            Recv::BiPending(buf) => {
                let mut peek = buf.clone();
                let typ = match read_varint(&mut peek) {
                    Some(typ) => Frame(typ),
                    None => return Ok(()),
                };

                *state = match typ {
                    Frame::WEBTRANSPORT => Recv::WebTransport {
                        session_id: None,
                        buf: peek,
                    },
                    _ => Recv::Request(std::mem::take(buf)),
                };
            }
            _ => {}
        }

        match state {
            Recv::Control { buf, settings } => self.process_control(buf, settings, events),
            Recv::Request(buf) => Self::process_request(stream_id, buf, fin, events),
            Recv::WebTransport { session_id, buf } => {
                Self::process_webtransport(stream_id, session_id, buf, fin, events);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn process_control(
        &mut self,
        buf: &mut BytesMut,
        received: &mut bool,
        events: &mut Vec<H3Event>,
    ) -> Result<(), FrameError> {
        while let Some((typ, mut payload)) = Frame::read(buf)? {
            // The first frame on the control stream must be SETTINGS, and only the first.
            match (typ, *received) {
                (Frame::SETTINGS, false) => {
                    let settings = Settings::decode(&mut payload)?;
                    log::debug!("received SETTINGS: {:?}", settings);

                    events.push(H3Event::Other(OtherEvent::SettingsReceived {
                        max_sessions: settings.supports_webtransport(),
                    }));

                    self.peer_settings = Some(settings);
                    *received = true;
                }
                (typ, false) => return Err(FrameError::UnexpectedFrame(typ)),
                (Frame::SETTINGS, true) => return Err(FrameError::UnexpectedFrame(typ)),
                (Frame::GOAWAY, true) => log::debug!("received GOAWAY"),
                (typ, true) => log::trace!("ignoring control frame {:?}", typ),
            }
        }

        Ok(())
    }

    fn process_request(
        stream_id: VarInt,
        buf: &mut BytesMut,
        fin: bool,
        events: &mut Vec<H3Event>,
    ) -> Result<(), FrameError> {
        let mut ended = false;

        while let Some((typ, mut payload)) = Frame::read(buf)? {
            let last = fin && buf.is_empty();

            match typ {
                Frame::HEADERS => {
                    let headers = qpack::decode(&mut payload)?;
                    log::debug!("received HEADERS on stream {}: {:?}", stream_id, headers);

                    events.push(H3Event::HeadersReceived {
                        stream_id,
                        headers,
                        stream_ended: last,
                    });
                    ended = last;
                }
                Frame::DATA => {
                    events.push(H3Event::StreamDataReceived {
                        stream_id,
                        session_id: None,
                        data: payload,
                        stream_ended: last,
                    });
                    ended = last;
                }
                typ => log::trace!("ignoring frame {:?} on stream {}", typ, stream_id),
            }
        }

        if fin && !ended {
            if !buf.is_empty() {
                log::debug!("stream {} finished with a partial frame", stream_id);
            }

            events.push(H3Event::StreamDataReceived {
                stream_id,
                session_id: None,
                data: Bytes::new(),
                stream_ended: true,
            });
        }

        Ok(())
    }

    fn process_webtransport(
        stream_id: VarInt,
        session_id: &mut Option<VarInt>,
        buf: &mut BytesMut,
        fin: bool,
        events: &mut Vec<H3Event>,
    ) {
        if session_id.is_none() {
            *session_id = read_varint(buf);
        }

        let id = match session_id {
            Some(id) => *id,
            None => return,
        };

        if buf.is_empty() && !fin {
            return;
        }

        events.push(H3Event::StreamDataReceived {
            stream_id,
            session_id: Some(id),
            data: buf.split().freeze(),
            stream_ended: fin,
        });
    }
}

impl Framing for Framer {
    fn handle_event(&mut self, event: TransportEvent) -> Vec<H3Event> {
        match event {
            TransportEvent::StreamData {
                stream_id,
                uni,
                data,
                fin,
            } => self.on_stream_data(stream_id, uni, data, fin),
            TransportEvent::StreamReset { stream_id } => {
                self.streams.remove(&stream_id);
                vec![H3Event::Other(OtherEvent::StreamReset { stream_id })]
            }
            TransportEvent::Datagram(data) => match Datagram::decode(data) {
                Ok(datagram) => vec![H3Event::DatagramReceived {
                    stream_id: datagram.stream_id,
                    data: datagram.payload,
                }],
                Err(err) => {
                    log::debug!("dropping datagram: {}", err);
                    Vec::new()
                }
            },
            TransportEvent::Closed { reason } => {
                self.streams.clear();
                vec![H3Event::Other(OtherEvent::ConnectionClosed { reason })]
            }
        }
    }

    fn send_headers(&mut self, stream_id: VarInt, headers: &HeaderSet, end_stream: bool) {
        log::debug!("sending HEADERS on stream {}: {:?}", stream_id, headers);

        let mut tmp = Vec::new();
        qpack::encode(headers, &mut tmp);

        let mut buf = BytesMut::new();
        Frame::HEADERS.write(&tmp, &mut buf);

        self.transmits.push_back(Transmit::Stream {
            stream_id,
            data: buf.freeze(),
            fin: end_stream,
        });
    }

    fn send_datagram(&mut self, session_id: VarInt, payload: Bytes) {
        let datagram = Datagram::new(session_id, payload);
        self.transmits.push_back(Transmit::Datagram(datagram.encode()));
    }

    fn finish_stream(&mut self, stream_id: VarInt) {
        self.transmits.push_back(Transmit::Stream {
            stream_id,
            data: Bytes::new(),
            fin: true,
        });
    }

    fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }
}
