//! Shared Kafka protocol types.

/// Compression codecs carried in a message set's attributes byte.
/// LZ4 is deliberately absent (spec section 1, Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// gzip, via `flate2`.
    Gzip,
    /// Google Snappy, via `snap`.
    Snappy,
}

impl Compression {
    /// The attributes-byte bit pattern for this codec (lower 3 bits).
    pub fn attribute_bits(self) -> i8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Snappy => 2,
        }
    }

    /// Parse the lower 3 bits of a message set's attributes byte.
    pub fn from_attribute_bits(bits: i8) -> Result<Compression, ::errors::KafkaProtocolError> {
        match bits & 0x07 {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Snappy),
            other => Err(::errors::KafkaProtocolError::UnsupportedCompression(other as u8)),
        }
    }
}

impl From<::conf::CompressionCodec> for Compression {
    fn from(codec: ::conf::CompressionCodec) -> Compression {
        match codec {
            ::conf::CompressionCodec::None => Compression::None,
            ::conf::CompressionCodec::Gzip => Compression::Gzip,
            ::conf::CompressionCodec::Snappy => Compression::Snappy,
        }
    }
}

/// One message within a Kafka message set.
#[derive(Debug, Clone)]
pub struct KafkaMessage {
    /// Optional key bytes (we use the partition key here, when present).
    pub key: Option<Vec<u8>>,
    /// Message value bytes.
    pub value: Vec<u8>,
}

/// A decoded per-partition produce acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAck {
    /// Partition id this ack applies to.
    pub partition: i32,
    /// Broker-reported error code; 0 means success.
    pub error_code: i16,
    /// Offset of the first message in the produced set, if successful.
    pub base_offset: i64,
}

/// A decoded per-topic group of partition acks.
#[derive(Debug, Clone)]
pub struct TopicAck {
    /// Topic name.
    pub topic: String,
    /// Per-partition acks.
    pub partitions: Vec<PartitionAck>,
}

/// A fully decoded Produce response.
#[derive(Debug, Clone)]
pub struct ProduceResponse {
    /// Correlation id echoed from the request.
    pub correlation_id: i32,
    /// Per-topic acks.
    pub topics: Vec<TopicAck>,
}

/// A leader/partition pair as reported by a Metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    /// Partition id.
    pub partition_id: i32,
    /// Leader broker id, or `None` if currently leaderless
    /// (`LeaderNotAvailable`).
    pub leader: Option<i32>,
    /// Broker-reported error code for this partition.
    pub error_code: i16,
}

/// One broker as reported by a Metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    /// Broker id.
    pub node_id: i32,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: i32,
}

/// One topic as reported by a Metadata response.
#[derive(Debug, Clone)]
pub struct TopicMetadataResponseEntry {
    /// Topic name.
    pub topic: String,
    /// Broker-reported error code for the topic itself.
    pub error_code: i16,
    /// The topic's partitions.
    pub partitions: Vec<PartitionMetadata>,
}

/// A fully decoded Metadata response.
#[derive(Debug, Clone)]
pub struct MetadataResponse {
    /// Correlation id echoed from the request.
    pub correlation_id: i32,
    /// Brokers in the cluster.
    pub brokers: Vec<BrokerMetadata>,
    /// Topics requested (or all topics, if the request asked for that).
    pub topics: Vec<TopicMetadataResponseEntry>,
}
