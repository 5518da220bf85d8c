use bytes::Bytes;

use crate::h3::VarInt;
use crate::HeaderSet;

/// A single readiness notification from the QUIC transport.
///
/// The transport produces these in the order it observes them and the framing layer consumes them one at a time.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A chunk of data arrived on a stream, or the stream finished when `fin` is set.
    StreamData {
        stream_id: VarInt,
        uni: bool,
        data: Bytes,
        fin: bool,
    },

    /// The peer reset a stream.
    StreamReset { stream_id: VarInt },

    /// A QUIC datagram arrived, still carrying its HTTP/3 quarter stream id.
    Datagram(Bytes),

    /// The connection is gone; no further events will follow.
    Closed { reason: String },
}

/// An HTTP/3 level event produced by the framing layer.
#[derive(Debug, Clone, PartialEq)]
pub enum H3Event {
    HeadersReceived {
        stream_id: VarInt,
        headers: HeaderSet,
        stream_ended: bool,
    },

    DatagramReceived {
        stream_id: VarInt,
        data: Bytes,
    },

    /// Payload on a request stream or on a WebTransport stream, or just the end of the stream.
    /// `session_id` is only set for WebTransport streams; request streams are matched by `stream_id`.
    StreamDataReceived {
        stream_id: VarInt,
        session_id: Option<VarInt>,
        data: Bytes,
        stream_ended: bool,
    },

    Other(OtherEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtherEvent {
    /// The peer's SETTINGS frame arrived. Zero means WebTransport is unsupported.
    SettingsReceived { max_sessions: u64 },

    StreamReset { stream_id: VarInt },

    ConnectionClosed { reason: String },
}

/// Outbound work queued by the framing layer until the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmit {
    /// Bytes for our unidirectional control stream, opened lazily by the transport.
    Control(Bytes),

    Stream {
        stream_id: VarInt,
        data: Bytes,
        fin: bool,
    },

    Datagram(Bytes),
}
