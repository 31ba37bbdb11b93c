//! Hand-rolled Kafka wire protocol codec: Produce v0/v1 and Metadata v0
//! request/response framing (spec section 6).
//!
//! Treated by the rest of the core purely as a (de)serialization library --
//! nothing here touches a socket. The protocol itself is big-endian, which
//! is why this module reaches for `byteorder::BigEndian` rather than the
//! little-endian helpers `wire.rs` uses for the client-facing frame.

use byteorder::{BigEndian, ByteOrder};
use errors::KafkaProtocolError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use kafka::types::{
    BrokerMetadata, Compression, KafkaMessage, MetadataResponse, PartitionAck, PartitionMetadata,
    ProduceResponse, TopicAck, TopicMetadataResponseEntry,
};
use std::io::{Read, Write};

const API_KEY_PRODUCE: i16 = 0;
const API_KEY_METADATA: i16 = 3;

/// Sequential big-endian byte writer, matching the shape of the protocol's
/// size-prefixed, length-prefixed encoding.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Writer {
        Writer { buf: Vec::new() }
    }

    fn i8(&mut self, v: i8) -> &mut Self {
        self.buf.push(v as u8);
        self
    }

    fn i16(&mut self, v: i16) -> &mut Self {
        let mut b = [0u8; 2];
        BigEndian::write_i16(&mut b, v);
        self.buf.extend_from_slice(&b);
        self
    }

    fn i32(&mut self, v: i32) -> &mut Self {
        let mut b = [0u8; 4];
        BigEndian::write_i32(&mut b, v);
        self.buf.extend_from_slice(&b);
        self
    }

    fn i64(&mut self, v: i64) -> &mut Self {
        let mut b = [0u8; 8];
        BigEndian::write_i64(&mut b, v);
        self.buf.extend_from_slice(&b);
        self
    }

    /// A Kafka "string": int16 length prefix, or -1 for null.
    fn string(&mut self, v: &str) -> &mut Self {
        self.i16(v.len() as i16);
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    /// A Kafka "bytes" field: int32 length prefix, or -1 for null.
    fn bytes(&mut self, v: Option<&[u8]>) -> &mut Self {
        match v {
            Some(b) => {
                self.i32(b.len() as i32);
                self.buf.extend_from_slice(b);
            }
            None => {
                self.i32(-1);
            }
        }
        self
    }

    fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential big-endian byte reader over a borrowed buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), KafkaProtocolError> {
        if self.pos + n > self.buf.len() {
            Err(KafkaProtocolError::Truncated {
                needed: self.pos + n,
                have: self.buf.len(),
            })
        } else {
            Ok(())
        }
    }

    fn i8(&mut self) -> Result<i8, KafkaProtocolError> {
        self.need(1)?;
        let v = self.buf[self.pos] as i8;
        self.pos += 1;
        Ok(v)
    }

    fn i16(&mut self) -> Result<i16, KafkaProtocolError> {
        self.need(2)?;
        let v = BigEndian::read_i16(&self.buf[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    fn i32(&mut self) -> Result<i32, KafkaProtocolError> {
        self.need(4)?;
        let v = BigEndian::read_i32(&self.buf[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    fn i64(&mut self) -> Result<i64, KafkaProtocolError> {
        self.need(8)?;
        let v = BigEndian::read_i64(&self.buf[self.pos..]);
        self.pos += 8;
        Ok(v)
    }

    fn string(&mut self) -> Result<String, KafkaProtocolError> {
        let len = self.i16()?;
        if len < 0 {
            return Ok(String::new());
        }
        let len = len as usize;
        self.need(len)?;
        let s = String::from_utf8_lossy(&self.buf[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        Ok(s)
    }

    fn bytes(&mut self) -> Result<Option<Vec<u8>>, KafkaProtocolError> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        self.need(len)?;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(Some(v))
    }
}

fn encode_request_header(buf: &mut Writer, api_key: i16, api_version: i16, correlation_id: i32, client_id: &str) {
    buf.i16(api_key);
    buf.i16(api_version);
    buf.i32(correlation_id);
    buf.string(client_id);
}

fn finish_request(body: Writer) -> Vec<u8> {
    let body = body.into_vec();
    let mut out = Writer::new();
    out.i32(body.len() as i32);
    out.buf.extend_from_slice(&body);
    out.into_vec()
}

fn compress(codec: Compression, payload: &[u8]) -> Result<Vec<u8>, KafkaProtocolError> {
    match codec {
        Compression::None => Ok(payload.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder
                .write_all(payload)
                .map_err(|e| KafkaProtocolError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KafkaProtocolError::Compression(e.to_string()))
        }
        Compression::Snappy => {
            let mut encoder = ::snap::write::FrameEncoder::new(Vec::new());
            encoder
                .write_all(payload)
                .map_err(|e| KafkaProtocolError::Compression(e.to_string()))?;
            encoder
                .into_inner()
                .map_err(|e| KafkaProtocolError::Compression(e.to_string()))
        }
    }
}

fn decompress(codec: Compression, payload: &[u8]) -> Result<Vec<u8>, KafkaProtocolError> {
    match codec {
        Compression::None => Ok(payload.to_vec()),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(payload);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| KafkaProtocolError::Compression(e.to_string()))?;
            Ok(out)
        }
        Compression::Snappy => {
            let mut decoder = ::snap::read::FrameDecoder::new(payload);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| KafkaProtocolError::Compression(e.to_string()))?;
            Ok(out)
        }
    }
}

/// Encode one message (message format v0: crc, magic=0, attributes, key,
/// value) into `out`, including its own 12-byte offset+size framing.
fn encode_message(out: &mut Writer, attributes: i8, key: Option<&[u8]>, value: &[u8]) {
    let mut body = Writer::new();
    body.i8(0); // magic byte 0
    body.i8(attributes);
    body.bytes(key);
    body.bytes(value);
    let body = body.into_vec();
    let crc = ::crc32c::crc32c(&body);

    let mut message = Writer::new();
    message.i32(crc as i32);
    message.buf.extend_from_slice(&body);
    let message = message.into_vec();

    out.i64(0); // offset, ignored by the broker on produce
    out.i32(message.len() as i32);
    out.buf.extend_from_slice(&message);
}

/// Build the message set for one partition's batch, optionally wrapping
/// the whole set in a single compressed "wrapper message" the way Kafka's
/// classic compression scheme works.
fn encode_message_set(codec: Compression, messages: &[KafkaMessage]) -> Result<Vec<u8>, KafkaProtocolError> {
    let mut inner = Writer::new();
    for m in messages {
        encode_message(&mut inner, 0, m.key.as_ref().map(|k| k.as_slice()), &m.value);
    }
    let inner = inner.into_vec();

    if codec == Compression::None {
        return Ok(inner);
    }

    let compressed = compress(codec, &inner)?;
    let mut wrapper = Writer::new();
    encode_message(&mut wrapper, codec.attribute_bits(), None, &compressed);
    Ok(wrapper.into_vec())
}

/// Encode a Produce request for one broker's pending batches, grouped by
/// topic and partition. `api_version` selects Produce v0 or v1 (v1 adds a
/// throttle_time_ms field to the response only).
pub fn encode_produce_request(
    api_version: i16,
    correlation_id: i32,
    client_id: &str,
    required_acks: i16,
    timeout_ms: i32,
    topics: &[(String, Vec<(i32, Compression, Vec<KafkaMessage>)>)],
) -> Result<Vec<u8>, KafkaProtocolError> {
    let mut body = Writer::new();
    encode_request_header(&mut body, API_KEY_PRODUCE, api_version, correlation_id, client_id);
    body.i16(required_acks);
    body.i32(timeout_ms);
    body.i32(topics.len() as i32);

    for (topic, partitions) in topics {
        body.string(topic);
        body.i32(partitions.len() as i32);
        for (partition, codec, messages) in partitions {
            body.i32(*partition);
            let message_set = encode_message_set(*codec, messages)?;
            body.i32(message_set.len() as i32);
            body.buf.extend_from_slice(&message_set);
        }
    }

    Ok(finish_request(body))
}

fn decode_message_set(buf: &[u8]) -> Result<Vec<KafkaMessage>, KafkaProtocolError> {
    let mut reader = Reader::new(buf);
    let mut out = Vec::new();
    while reader.pos < reader.buf.len() {
        if reader.buf.len() - reader.pos < 12 {
            break; // trailing partial message, as Kafka brokers may send
        }
        let _offset = reader.i64()?;
        let size = reader.i32()? as usize;
        reader.need(size)?;
        let message_buf = &reader.buf[reader.pos..reader.pos + size];
        reader.pos += size;

        let mut mr = Reader::new(message_buf);
        let expected_crc = mr.i32()? as u32;
        let crc_body = &message_buf[mr.pos..];
        let computed_crc = ::crc32c::crc32c(crc_body);
        if expected_crc != computed_crc {
            return Err(KafkaProtocolError::CrcMismatch {
                expected: expected_crc,
                computed: computed_crc,
            });
        }
        let _magic = mr.i8()?;
        let attributes = mr.i8()?;
        let key = mr.bytes()?;
        let value = mr.bytes()?.unwrap_or_default();

        let codec = Compression::from_attribute_bits(attributes)?;
        if codec == Compression::None {
            out.push(KafkaMessage { key, value });
        } else {
            let decompressed = decompress(codec, &value)?;
            out.extend(decode_message_set(&decompressed)?);
        }
    }
    Ok(out)
}

/// Decode a Produce response. `api_version` selects whether a leading
/// throttle_time_ms (v1) is present.
pub fn decode_produce_response(buf: &[u8], api_version: i16) -> Result<ProduceResponse, KafkaProtocolError> {
    let mut reader = Reader::new(buf);
    let correlation_id = reader.i32()?;

    let topic_count = reader.i32()?;
    let mut topics = Vec::with_capacity(topic_count.max(0) as usize);
    for _ in 0..topic_count {
        let topic = reader.string()?;
        let partition_count = reader.i32()?;
        let mut partitions = Vec::with_capacity(partition_count.max(0) as usize);
        for _ in 0..partition_count {
            let partition = reader.i32()?;
            let error_code = reader.i16()?;
            let base_offset = reader.i64()?;
            partitions.push(PartitionAck {
                partition,
                error_code,
                base_offset,
            });
        }
        topics.push(TopicAck { topic, partitions });
    }

    if api_version >= 1 {
        let _throttle_time_ms = reader.i32()?;
    }

    Ok(ProduceResponse { correlation_id, topics })
}

/// Encode a Metadata v0 request for `topics` (empty means "all topics").
pub fn encode_metadata_request(correlation_id: i32, client_id: &str, topics: &[String]) -> Vec<u8> {
    let mut body = Writer::new();
    encode_request_header(&mut body, API_KEY_METADATA, 0, correlation_id, client_id);
    body.i32(topics.len() as i32);
    for topic in topics {
        body.string(topic);
    }
    finish_request(body)
}

/// Decode a Metadata v0 response.
pub fn decode_metadata_response(buf: &[u8]) -> Result<MetadataResponse, KafkaProtocolError> {
    let mut reader = Reader::new(buf);
    let correlation_id = reader.i32()?;

    let broker_count = reader.i32()?;
    let mut brokers = Vec::with_capacity(broker_count.max(0) as usize);
    for _ in 0..broker_count {
        let node_id = reader.i32()?;
        let host = reader.string()?;
        let port = reader.i32()?;
        brokers.push(BrokerMetadata { node_id, host, port });
    }

    let topic_count = reader.i32()?;
    let mut topics = Vec::with_capacity(topic_count.max(0) as usize);
    for _ in 0..topic_count {
        let topic_error_code = reader.i16()?;
        let topic = reader.string()?;
        let partition_count = reader.i32()?;
        let mut partitions = Vec::with_capacity(partition_count.max(0) as usize);
        for _ in 0..partition_count {
            let partition_error_code = reader.i16()?;
            let partition_id = reader.i32()?;
            let leader = reader.i32()?;
            let replica_count = reader.i32()?;
            for _ in 0..replica_count {
                reader.i32()?;
            }
            let isr_count = reader.i32()?;
            for _ in 0..isr_count {
                reader.i32()?;
            }
            partitions.push(PartitionMetadata {
                partition_id,
                leader: if leader < 0 { None } else { Some(leader) },
                error_code: partition_error_code,
            });
        }
        topics.push(TopicMetadataResponseEntry {
            topic,
            error_code: topic_error_code,
            partitions,
        });
    }

    Ok(MetadataResponse {
        correlation_id,
        brokers,
        topics,
    })
}

/// Read one big-endian, 4-byte-length-prefixed response frame's *body* out
/// of `buf` (the length prefix itself is the caller's framing concern --
/// see `dispatch::receiver`).
pub fn split_frame(buf: &[u8]) -> Result<(&[u8], &[u8]), KafkaProtocolError> {
    if buf.len() < 4 {
        return Err(KafkaProtocolError::Truncated {
            needed: 4,
            have: buf.len(),
        });
    }
    let len = BigEndian::read_i32(buf) as usize;
    if buf.len() < 4 + len {
        return Err(KafkaProtocolError::Truncated {
            needed: 4 + len,
            have: buf.len(),
        });
    }
    Ok((&buf[4..4 + len], &buf[4 + len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_request_round_trips_through_message_set_decode() {
        let messages = vec![
            KafkaMessage {
                key: None,
                value: b"hello".to_vec(),
            },
            KafkaMessage {
                key: Some(b"k".to_vec()),
                value: b"world".to_vec(),
            },
        ];
        let set = encode_message_set(Compression::None, &messages).unwrap();
        let decoded = decode_message_set(&set).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].value, b"hello");
        assert_eq!(decoded[1].key, Some(b"k".to_vec()));
    }

    #[test]
    fn gzip_message_set_round_trips() {
        let messages = vec![KafkaMessage {
            key: None,
            value: b"compress me".to_vec(),
        }];
        let set = encode_message_set(Compression::Gzip, &messages).unwrap();
        let decoded = decode_message_set(&set).unwrap();
        assert_eq!(decoded[0].value, b"compress me");
    }

    #[test]
    fn snappy_message_set_round_trips() {
        let messages = vec![KafkaMessage {
            key: None,
            value: b"compress me too".to_vec(),
        }];
        let set = encode_message_set(Compression::Snappy, &messages).unwrap();
        let decoded = decode_message_set(&set).unwrap();
        assert_eq!(decoded[0].value, b"compress me too");
    }

    #[test]
    fn produce_response_round_trip() {
        let mut resp = Writer::new();
        resp.i32(42); // correlation id
        resp.i32(1); // one topic
        resp.string("t");
        resp.i32(1); // one partition
        resp.i32(0); // partition id
        resp.i16(0); // error code
        resp.i64(100); // base offset
        resp.i32(0); // throttle time (v1)

        let decoded = decode_produce_response(&resp.into_vec(), 1).unwrap();
        assert_eq!(decoded.correlation_id, 42);
        assert_eq!(decoded.topics[0].partitions[0].base_offset, 100);
    }

    #[test]
    fn corrupted_message_crc_is_detected() {
        let messages = vec![KafkaMessage {
            key: None,
            value: b"hello".to_vec(),
        }];
        let mut set = encode_message_set(Compression::None, &messages).unwrap();
        let last = set.len() - 1;
        set[last] ^= 0xFF;
        assert!(decode_message_set(&set).is_err());
    }

    #[test]
    fn metadata_response_round_trip() {
        let mut resp = Writer::new();
        resp.i32(7); // correlation id
        resp.i32(1); // one broker
        resp.i32(0);
        resp.string("localhost");
        resp.i32(9092);
        resp.i32(1); // one topic
        resp.i16(0); // topic error
        resp.string("t");
        resp.i32(1); // one partition
        resp.i16(0); // partition error
        resp.i32(0); // partition id
        resp.i32(0); // leader
        resp.i32(0); // replica count
        resp.i32(0); // isr count

        let decoded = decode_metadata_response(&resp.into_vec()).unwrap();
        assert_eq!(decoded.brokers[0].host, "localhost");
        assert_eq!(decoded.topics[0].partitions[0].leader, Some(0));
    }

    #[test]
    fn split_frame_reports_truncation() {
        let buf = [0, 0, 0, 10, 1, 2, 3];
        assert!(split_frame(&buf).is_err());
    }
}
