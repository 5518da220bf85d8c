//! The slice of HTTP/3 needed to negotiate a WebTransport session and exchange datagrams.
//!
//! Everything here is sans-IO: bytes go in, [`H3Event`](crate::H3Event)s come out, and outbound bytes are queued as
//! [`Transmit`](crate::Transmit)s for whoever owns the QUIC connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use quinn_proto::coding::{self, Codec};
pub use quinn_proto::VarInt;

mod datagram;
mod framer;
mod huffman;
mod settings;

pub mod qpack;

pub use datagram::*;
pub use framer::*;
pub use settings::*;

// Sent as the first varint of a unidirectional stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamUni(pub VarInt);

macro_rules! streams_uni {
    {$($name:ident = $val:expr,)*} => {
        impl StreamUni {
            $(pub const $name: StreamUni = StreamUni(VarInt::from_u32($val));)*
        }
    }
}

streams_uni! {
    CONTROL = 0x00,
    QPACK_ENCODER = 0x02,
    QPACK_DECODER = 0x03,
    WEBTRANSPORT = 0x54,
}

impl StreamUni {
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame(pub VarInt);

macro_rules! frames {
    {$($name:ident = $val:expr,)*} => {
        impl Frame {
            $(pub const $name: Frame = Frame(VarInt::from_u32($val));)*
        }
    }
}

frames! {
    DATA = 0x00,
    HEADERS = 0x01,
    SETTINGS = 0x04,
    GOAWAY = 0x07,
    // Not a real frame: the prefix of a bidirectional WebTransport stream.
    WEBTRANSPORT = 0x41,
}

// Frames larger than this are treated as an attack rather than buffered.
const MAX_FRAME_SIZE: u64 = 64 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too large: {0} bytes")]
    TooLarge(u64),

    #[error("unexpected frame {0:?}")]
    UnexpectedFrame(Frame),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("qpack error: {0}")]
    Qpack(#[from] qpack::DecodeError),
}

impl Frame {
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, coding::UnexpectedEnd> {
        Ok(Frame(VarInt::decode(buf)?))
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf)
    }

    /// Write a complete frame: type, length, payload.
    pub fn write<B: BufMut>(&self, payload: &[u8], buf: &mut B) {
        self.encode(buf);
        VarInt::from_u32(payload.len() as u32).encode(buf);
        buf.put_slice(payload);
    }

    /// Split a complete frame off the front of `buf`.
    /// Returns `None` without consuming anything if the frame hasn't fully arrived.
    pub fn read(buf: &mut BytesMut) -> Result<Option<(Frame, Bytes)>, FrameError> {
        let mut peek = &buf[..];

        let (typ, size) = match (Frame::decode(&mut peek), VarInt::decode(&mut peek)) {
            (Ok(typ), Ok(size)) => (typ, size.into_inner()),
            _ => return Ok(None),
        };

        if size > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(size));
        }

        let size = size as usize;
        if peek.len() < size {
            return Ok(None);
        }

        let header = buf.len() - peek.len();
        buf.advance(header);

        Ok(Some((typ, buf.split_to(size).freeze())))
    }
}

/// Split a varint off the front of `buf`, or return `None` without consuming anything if it's incomplete.
pub fn read_varint(buf: &mut BytesMut) -> Option<VarInt> {
    let mut peek = &buf[..];
    let v = VarInt::decode(&mut peek).ok()?;

    let size = buf.len() - peek.len();
    buf.advance(size);

    Some(v)
}
