//! The application payloads: `Message <n>` from the client and `Received Message <n>` from the server.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ReplyError;

const REPLY_PREFIX: &[u8] = b"Received ";

/// The payload for message `seq`.
pub fn encode(seq: u64) -> Bytes {
    Bytes::from(format!("Message {}", seq))
}

/// The server's reply to any payload.
pub fn reply(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(REPLY_PREFIX.len() + payload.len());
    buf.put_slice(REPLY_PREFIX);
    buf.put_slice(payload);
    buf.freeze()
}

/// Parse the sequence number out of a payload, which is always its last whitespace separated token.
pub fn decode_seq(payload: &[u8]) -> Result<u64, ReplyError> {
    let text = std::str::from_utf8(payload).map_err(|_| ReplyError::Malformed)?;
    let token = text.split_whitespace().last().ok_or(ReplyError::Malformed)?;

    token.parse().map_err(|_| ReplyError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        assert_eq!(encode(0), &b"Message 0"[..]);
        assert_eq!(reply(&encode(42)), &b"Received Message 42"[..]);
    }

    #[test]
    fn trailing_token() {
        assert_eq!(decode_seq(b"Received Message 7"), Ok(7));
        assert_eq!(decode_seq(b"Message 0"), Ok(0));
        assert_eq!(decode_seq(b"12  \n"), Ok(12));
    }

    #[test]
    fn malformed() {
        assert_eq!(decode_seq(b""), Err(ReplyError::Malformed));
        assert_eq!(decode_seq(b"   "), Err(ReplyError::Malformed));
        assert_eq!(decode_seq(b"Received Message seven"), Err(ReplyError::Malformed));
        assert_eq!(decode_seq(b"Received Message -1"), Err(ReplyError::Malformed));
        assert_eq!(decode_seq(b"Received \xff\xfe"), Err(ReplyError::Malformed));
    }
}
