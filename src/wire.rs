//! Client wire message codec (spec section 6).
//!
//! Treated as a pure (de)serialization library: input sources call
//! `decode`, validate the result, then acquire a pool block for the value.
//! Nothing here ever touches the pool, the router, or a socket.

use byteorder::{ByteOrder, LittleEndian};
use constants;
use std::str;
use thiserror::Error;

/// A decoded (but not yet pool-backed) client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Destination topic.
    pub topic: String,
    /// Optional partition key.
    pub partition_key: Option<Vec<u8>>,
    /// Message value.
    pub value: Vec<u8>,
    /// Client-supplied wall-clock timestamp, milliseconds since epoch.
    pub client_timestamp_ms: u64,
}

const FLAG_HAS_PARTITION_KEY: u8 = 0b0000_0001;

/// Errors decoding a client wire frame. Always non-fatal: the caller
/// converts these into a `Malformed`/`TooLarge` discard.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than the minimum possible frame.
    #[error("frame too short: need at least {needed} bytes, have {have}")]
    TooShort {
        /// Minimum bytes required to continue decoding.
        needed: usize,
        /// Bytes actually available.
        have: usize,
    },
    /// The magic byte did not match `constants::WIRE_MAGIC`.
    #[error("bad magic byte: {0:#04x}")]
    BadMagic(u8),
    /// An unsupported version byte.
    #[error("unsupported wire version: {0}")]
    BadVersion(u8),
    /// Topic length outside `[MIN_TOPIC_LEN, MAX_TOPIC_LEN]`.
    #[error("invalid topic length: {0}")]
    BadTopicLen(usize),
    /// Topic bytes were not valid UTF-8, or contained a disallowed
    /// character.
    #[error("invalid topic name")]
    BadTopic,
    /// The frame's declared lengths don't fit inside the provided buffer.
    #[error("truncated frame body")]
    Truncated,
    /// The frame carried trailing bytes past its declared fields.
    #[error("trailing bytes after frame body")]
    TrailingBytes,
    /// Total decoded message size exceeded the configured maximum.
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
}

fn validate_topic(bytes: &[u8]) -> Result<&str, WireError> {
    if bytes.len() < constants::MIN_TOPIC_LEN || bytes.len() > constants::MAX_TOPIC_LEN {
        return Err(WireError::BadTopicLen(bytes.len()));
    }
    let topic = str::from_utf8(bytes).map_err(|_| WireError::BadTopic)?;
    let valid = topic
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-');
    if !valid {
        return Err(WireError::BadTopic);
    }
    Ok(topic)
}

/// Decode one frame. `max_msg_size` bounds the total encoded frame length.
pub fn decode(buf: &[u8], max_msg_size: usize) -> Result<WireMessage, WireError> {
    if buf.len() > max_msg_size {
        return Err(WireError::TooLarge(buf.len()));
    }
    if buf.len() < 5 {
        return Err(WireError::TooShort {
            needed: 5,
            have: buf.len(),
        });
    }
    if buf[0] != constants::WIRE_MAGIC {
        return Err(WireError::BadMagic(buf[0]));
    }
    if buf[1] != constants::WIRE_VERSION {
        return Err(WireError::BadVersion(buf[1]));
    }
    let flags = buf[2];
    let has_key = flags & FLAG_HAS_PARTITION_KEY != 0;

    let mut cursor = 3usize;
    let topic_len = read_u16(buf, cursor)? as usize;
    cursor += 2;
    let topic_bytes = read_slice(buf, cursor, topic_len)?;
    let topic = validate_topic(topic_bytes)?.to_string();
    cursor += topic_len;

    let partition_key = if has_key {
        let key_len = read_u32(buf, cursor)? as usize;
        cursor += 4;
        let key_bytes = read_slice(buf, cursor, key_len)?;
        cursor += key_len;
        Some(key_bytes.to_vec())
    } else {
        None
    };

    let value_len = read_u32(buf, cursor)? as usize;
    cursor += 4;
    let value_bytes = read_slice(buf, cursor, value_len)?;
    cursor += value_len;

    let client_timestamp_ms = read_u64(buf, cursor)?;
    cursor += 8;

    if cursor != buf.len() {
        return Err(WireError::TrailingBytes);
    }

    Ok(WireMessage {
        topic,
        partition_key,
        value: value_bytes.to_vec(),
        client_timestamp_ms,
    })
}

/// Encode a message back to wire format. Primarily used by tests to check
/// the decode/encode bijection; no production code path currently needs to
/// re-encode a client frame.
pub fn encode(msg: &WireMessage) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(constants::WIRE_MAGIC);
    out.push(constants::WIRE_VERSION);
    let flags = if msg.partition_key.is_some() {
        FLAG_HAS_PARTITION_KEY
    } else {
        0
    };
    out.push(flags);

    let mut buf2 = [0u8; 2];
    LittleEndian::write_u16(&mut buf2, msg.topic.len() as u16);
    out.extend_from_slice(&buf2);
    out.extend_from_slice(msg.topic.as_bytes());

    if let Some(ref key) = msg.partition_key {
        let mut buf4 = [0u8; 4];
        LittleEndian::write_u32(&mut buf4, key.len() as u32);
        out.extend_from_slice(&buf4);
        out.extend_from_slice(key);
    }

    let mut buf4 = [0u8; 4];
    LittleEndian::write_u32(&mut buf4, msg.value.len() as u32);
    out.extend_from_slice(&buf4);
    out.extend_from_slice(&msg.value);

    let mut buf8 = [0u8; 8];
    LittleEndian::write_u64(&mut buf8, msg.client_timestamp_ms);
    out.extend_from_slice(&buf8);

    out
}

fn read_slice(buf: &[u8], at: usize, len: usize) -> Result<&[u8], WireError> {
    buf.get(at..at + len).ok_or(WireError::Truncated)
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16, WireError> {
    let slice = read_slice(buf, at, 2)?;
    Ok(LittleEndian::read_u16(slice))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, WireError> {
    let slice = read_slice(buf, at, 4)?;
    Ok(LittleEndian::read_u32(slice))
}

fn read_u64(buf: &[u8], at: usize) -> Result<u64, WireError> {
    let slice = read_slice(buf, at, 8)?;
    Ok(LittleEndian::read_u64(slice))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WireMessage {
        WireMessage {
            topic: "orders".to_string(),
            partition_key: Some(b"user-42".to_vec()),
            value: b"hello world".to_vec(),
            client_timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn encode_decode_is_a_bijection() {
        let msg = sample();
        let encoded = encode(&msg);
        let decoded = decode(&encoded, 64 * 1024).expect("valid frame decodes");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn encode_decode_without_key() {
        let msg = WireMessage {
            partition_key: None,
            ..sample()
        };
        let encoded = encode(&msg);
        let decoded = decode(&encoded, 64 * 1024).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = encode(&sample());
        encoded[0] = 0x00;
        assert_eq!(decode(&encoded, 64 * 1024), Err(WireError::BadMagic(0x00)));
    }

    #[test]
    fn rejects_oversized_frame() {
        let encoded = encode(&sample());
        assert_eq!(
            decode(&encoded, 4),
            Err(WireError::TooLarge(encoded.len()))
        );
    }

    #[test]
    fn rejects_garbage_datagram() {
        let buf = [0xFFu8; 5];
        assert!(decode(&buf, 64 * 1024).is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut encoded = encode(&sample());
        encoded.push(0xAB);
        assert_eq!(decode(&encoded, 64 * 1024), Err(WireError::TrailingBytes));
    }

    #[test]
    fn rejects_invalid_topic_characters() {
        let msg = WireMessage {
            topic: "bad topic!".to_string(),
            ..sample()
        };
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded, 64 * 1024), Err(WireError::BadTopic));
    }
}
