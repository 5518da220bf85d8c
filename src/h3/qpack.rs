// A minimal QPACK implementation that only supports the static table and literals.
// We never advertise a dynamic table capacity, so a compliant peer can't reference one.
// That is not enough for a general HTTP/3 stack, but plenty for a single CONNECT exchange.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use super::huffman;
use crate::HeaderSet;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("varint bounds exceeded")]
    BoundsExceeded,

    #[error("dynamic references not supported")]
    DynamicEntry,

    #[error("unknown entry")]
    UnknownEntry,

    #[error("huffman decoding error")]
    Huffman(#[from] huffman::Error),
}

pub fn decode<B: Buf>(buf: &mut B) -> Result<HeaderSet, DecodeError> {
    // Encoded field section prefix: required insert count and delta base.
    let (_, insert_count) = decode_prefix(buf, 8)?;
    if insert_count != 0 {
        return Err(DecodeError::DynamicEntry);
    }
    let _ = decode_prefix(buf, 7)?;

    let mut headers = HeaderSet::new();
    while buf.has_remaining() {
        let first = buf.chunk()[0];

        // See: https://www.rfc-editor.org/rfc/rfc9204.html#section-4.5.2
        let (name, value) = if first & 0b1000_0000 != 0 {
            // Indexed field line, the T bit selects the static table.
            if first & 0b0100_0000 == 0 {
                return Err(DecodeError::DynamicEntry);
            }
            decode_index(buf)?
        } else if first & 0b0100_0000 != 0 {
            // Literal with name reference.
            if first & 0b0001_0000 == 0 {
                return Err(DecodeError::DynamicEntry);
            }
            decode_literal_value(buf)?
        } else if first & 0b0010_0000 != 0 {
            decode_literal(buf)?
        } else {
            // Both post-base forms refer to the dynamic table.
            return Err(DecodeError::DynamicEntry);
        };

        headers.push(name, value);
    }

    Ok(headers)
}

fn decode_index<B: Buf>(buf: &mut B) -> Result<(Bytes, Bytes), DecodeError> {
    /*
        0   1   2   3   4   5   6   7
    +---+---+---+---+---+---+---+---+
    | 1 | T |      Index (6+)       |
    +---+---+-----------------------+
    */

    let (_, index) = decode_prefix(buf, 6)?;
    let (name, value) = static_entry(index)?;
    Ok((Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes())))
}

fn decode_literal_value<B: Buf>(buf: &mut B) -> Result<(Bytes, Bytes), DecodeError> {
    /*
      0   1   2   3   4   5   6   7
    +---+---+---+---+---+---+---+---+
    | 0 | 1 | N | T |Name Index (4+)|
    +---+---+---+---+---------------+
    | H |     Value Length (7+)     |
    +---+---------------------------+
    |  Value String (Length bytes)  |
    +-------------------------------+
    */

    let (_, index) = decode_prefix(buf, 4)?;
    let (name, _) = static_entry(index)?;
    let value = decode_string(buf, 8)?;

    Ok((Bytes::from_static(name.as_bytes()), value))
}

fn decode_literal<B: Buf>(buf: &mut B) -> Result<(Bytes, Bytes), DecodeError> {
    /*
      0   1   2   3   4   5   6   7
    +---+---+---+---+---+---+---+---+
    | 0 | 0 | 1 | N | H |NameLen(3+)|
    +---+---+---+---+---+-----------+
    |  Name String (Length bytes)   |
    +---+---------------------------+
    | H |     Value Length (7+)     |
    +---+---------------------------+
    |  Value String (Length bytes)  |
    +-------------------------------+
    */

    let name = decode_string(buf, 4)?;
    let value = decode_string(buf, 8)?;

    Ok((name, value))
}

pub fn encode<B: BufMut>(headers: &HeaderSet, buf: &mut B) {
    // We don't use the dynamic table, so both prefix fields are zero.
    encode_prefix(buf, 8, 0, 0);
    encode_prefix(buf, 7, 0, 0);

    // Pseudo-headers must come first: https://datatracker.ietf.org/doc/html/rfc9114#section-4.3
    // The sort is stable, so the order within each group is preserved.
    let mut fields: Vec<_> = headers.iter().collect();
    fields.sort_by_key(|(name, _)| !name.starts_with(b":"));

    for (name, value) in fields {
        if let Some(index) = find(name, value) {
            // Indexed field line, static table.
            encode_prefix(buf, 6, 0b11, index);
        } else if let Some(index) = find_name(name) {
            // Literal with a static name reference.
            encode_prefix(buf, 4, 0b0101, index);
            encode_prefix(buf, 7, 0b0, value.len());
            buf.put_slice(value);
        } else {
            // Literal name and value, no huffman.
            encode_prefix(buf, 3, 0b00100, name.len());
            buf.put_slice(name);
            encode_prefix(buf, 7, 0b0, value.len());
            buf.put_slice(value);
        }
    }
}

// An integer that uses a fixed number of bits, otherwise a variable number of bytes if it's too large.
// https://www.rfc-editor.org/rfc/rfc7541#section-5.1

// Based on : https://github.com/hyperium/h3/blob/master/h3/src/qpack/prefix_int.rs
// License: MIT

fn decode_prefix<B: Buf>(buf: &mut B, size: u8) -> Result<(u8, usize), DecodeError> {
    debug_assert!(size > 0 && size <= 8);

    if !buf.has_remaining() {
        return Err(DecodeError::UnexpectedEnd);
    }

    let mut first = buf.get_u8();

    // The casts to u8 trim the high bits, which avoids a shift overflow when size == 8.
    let flags = ((first as usize) >> size) as u8;
    let mask = 0xFF >> (8 - size);
    first &= mask;

    if first < mask {
        return Ok((flags, first as usize));
    }

    let mut value = mask as usize;
    let mut power = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(DecodeError::UnexpectedEnd);
        }

        let byte = buf.get_u8();
        let part = (byte & 127) as usize;

        // Any bits shifted out of a usize mean the peer sent an integer we can't represent.
        value = part
            .checked_shl(power)
            .filter(|shifted| shifted >> power == part)
            .and_then(|shifted| value.checked_add(shifted))
            .ok_or(DecodeError::BoundsExceeded)?;
        power += 7;

        if byte & 128 == 0 {
            break;
        }
    }

    Ok((flags, value))
}

fn encode_prefix<B: BufMut>(buf: &mut B, size: u8, flags: u8, value: usize) {
    debug_assert!(size > 0 && size <= 8);

    let mask = !(0xFF << size) as u8;
    let flags = ((flags as usize) << size) as u8;

    if value < (mask as usize) {
        buf.put_u8(flags | value as u8);
        return;
    }

    buf.put_u8(mask | flags);
    let mut remaining = value - mask as usize;

    while remaining >= 128 {
        let rest = (remaining % 128) as u8;
        buf.put_u8(rest + 128);
        remaining /= 128;
    }

    buf.put_u8(remaining as u8);
}

// A string literal whose length prefix has `size - 1` bits, preceded by the huffman flag.
fn decode_string<B: Buf>(buf: &mut B, size: u8) -> Result<Bytes, DecodeError> {
    let (flags, len) = decode_prefix(buf, size - 1)?;
    if buf.remaining() < len {
        return Err(DecodeError::UnexpectedEnd);
    }

    let payload = buf.copy_to_bytes(len);
    if flags & 1 == 0 {
        return Ok(payload);
    }

    Ok(huffman::decode(&payload)?.into())
}

fn static_entry(index: usize) -> Result<(&'static str, &'static str), DecodeError> {
    STATIC_TABLE.get(index).copied().ok_or(DecodeError::UnknownEntry)
}

fn find(name: &[u8], value: &[u8]) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, v)| n.as_bytes() == name && v.as_bytes() == value)
}

fn find_name(name: &[u8]) -> Option<usize> {
    // A 4-bit prefix keeps the first few name references to a single byte, but larger ones still work.
    STATIC_TABLE.iter().position(|(n, _)| n.as_bytes() == name)
}

// https://www.rfc-editor.org/rfc/rfc9204.html#appendix-A
const STATIC_TABLE: [(&str, &str); 99] = [
    (":authority", ""),
    (":path", "/"),
    ("age", "0"),
    ("content-disposition", ""),
    ("content-length", "0"),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("referer", ""),
    ("set-cookie", ""),
    (":method", "CONNECT"),
    (":method", "DELETE"),
    (":method", "GET"),
    (":method", "HEAD"),
    (":method", "OPTIONS"),
    (":method", "POST"),
    (":method", "PUT"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "103"),
    (":status", "200"),
    (":status", "304"),
    (":status", "404"),
    (":status", "503"),
    ("accept", "*/*"),
    ("accept", "application/dns-message"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-ranges", "bytes"),
    ("access-control-allow-headers", "cache-control"),
    ("access-control-allow-headers", "content-type"),
    ("access-control-allow-origin", "*"),
    ("cache-control", "max-age=0"),
    ("cache-control", "max-age=2592000"),
    ("cache-control", "max-age=604800"),
    ("cache-control", "no-cache"),
    ("cache-control", "no-store"),
    ("cache-control", "public, max-age=31536000"),
    ("content-encoding", "br"),
    ("content-encoding", "gzip"),
    ("content-type", "application/dns-message"),
    ("content-type", "application/javascript"),
    ("content-type", "application/json"),
    ("content-type", "application/x-www-form-urlencoded"),
    ("content-type", "image/gif"),
    ("content-type", "image/jpeg"),
    ("content-type", "image/png"),
    ("content-type", "text/css"),
    ("content-type", "text/html; charset=utf-8"),
    ("content-type", "text/plain"),
    ("content-type", "text/plain;charset=utf-8"),
    ("range", "bytes=0-"),
    ("strict-transport-security", "max-age=31536000"),
    ("strict-transport-security", "max-age=31536000; includesubdomains"),
    ("strict-transport-security", "max-age=31536000; includesubdomains; preload"),
    ("vary", "accept-encoding"),
    ("vary", "origin"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (":status", "100"),
    (":status", "204"),
    (":status", "206"),
    (":status", "302"),
    (":status", "400"),
    (":status", "403"),
    (":status", "421"),
    (":status", "425"),
    (":status", "500"),
    ("accept-language", ""),
    ("access-control-allow-credentials", "FALSE"),
    ("access-control-allow-credentials", "TRUE"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "get"),
    ("access-control-allow-methods", "get, post, options"),
    ("access-control-allow-methods", "options"),
    ("access-control-expose-headers", "content-length"),
    ("access-control-request-headers", "content-type"),
    ("access-control-request-method", "get"),
    ("access-control-request-method", "post"),
    ("alt-svc", "clear"),
    ("authorization", ""),
    ("content-security-policy", "script-src 'none'; object-src 'none'; base-uri 'none'"),
    ("early-data", "1"),
    ("expect-ct", ""),
    ("forwarded", ""),
    ("if-range", ""),
    ("origin", ""),
    ("purpose", "prefetch"),
    ("server", ""),
    ("timing-allow-origin", "*"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", ""),
    ("x-forwarded-for", ""),
    ("x-frame-options", "deny"),
    ("x-frame-options", "sameorigin"),
];
