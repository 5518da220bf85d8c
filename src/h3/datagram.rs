use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use quinn_proto::coding::Codec;
use quinn_proto::VarInt;

/// An HTTP/3 datagram: a quarter stream id followed by the payload.
/// See: <https://www.rfc-editor.org/rfc/rfc9297#section-2.1>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// The id of the client-initiated bidirectional stream the datagram belongs to.
    pub stream_id: VarInt,
    pub payload: Bytes,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatagramError {
    #[error("missing quarter stream id")]
    MissingStreamId,

    #[error("stream id out of range")]
    InvalidStreamId,
}

impl Datagram {
    pub fn new(stream_id: VarInt, payload: Bytes) -> Self {
        Self { stream_id, payload }
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, DatagramError> {
        let quarter = VarInt::decode(&mut buf).map_err(|_| DatagramError::MissingStreamId)?;

        // Quarter ids can exceed what fits back into a varint once multiplied.
        let stream_id = quarter
            .into_inner()
            .checked_mul(4)
            .and_then(|id| VarInt::from_u64(id).ok())
            .ok_or(DatagramError::InvalidStreamId)?;

        Ok(Self {
            stream_id,
            payload: buf,
        })
    }

    pub fn encode(&self) -> Bytes {
        // Session ids are client bidirectional stream ids, which are always a multiple of 4.
        // A quarter of a varint always fits in a varint.
        let quarter = VarInt::from_u64(self.stream_id.into_inner() / 4).unwrap_or(VarInt::from_u32(0));

        let mut buf = BytesMut::with_capacity(8 + self.payload.len());
        quarter.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
