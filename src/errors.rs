//! Error taxonomy for dory.
//!
//! Per the propagation policy: only startup errors and internal invariant
//! violations are ever returned as `Result` up to `main`. Message-local and
//! transport errors never escape their originating task as a `Result` --
//! they become a typed value on an outbound queue (see `retry::Reason`,
//! `discard::Reason`) or a counter increment instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that prevent the daemon from starting at all. Fatal: `main`
/// converts these into a single descriptive line on stderr and a non-zero
/// exit code.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Binding the status/admin HTTP surface failed, most likely because
    /// another instance of dory is already running.
    #[error("failed to bind status surface on port {port}: {source}")]
    StatusBind {
        /// Port that could not be bound.
        port: u16,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// None of the configured input sources could be opened.
    #[error("unable to open any input source")]
    NoInputSource,

    /// A bootstrap broker host:port could not be resolved.
    #[error("unable to resolve bootstrap broker {0}")]
    UnresolvableBroker(String),

    /// Failed to bind or open a configured input source.
    #[error("failed to open input source at {path}: {source}")]
    SourceBind {
        /// Path or address of the source that failed to bind.
        path: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Errors encountered while loading or validating `conf::Conf`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be opened or read.
    #[error("could not read config file {path:?}: {source}")]
    Io {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The config file was not valid TOML.
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required section or field was missing or malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from the hand-rolled Kafka wire protocol codec (section 6,
/// "Kafka protocol"). Treated by the rest of the core as a pure
/// (de)serialization library: these never propagate past the dispatcher
/// that invoked the codec, they are converted into a `retry::Reason`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KafkaProtocolError {
    /// The buffer did not contain enough bytes to decode the expected
    /// structure.
    #[error("truncated frame: need at least {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// A string or array length field was implausible (negative-as-unsigned
    /// or larger than the remaining buffer).
    #[error("invalid length field: {0}")]
    InvalidLength(i32),

    /// The CRC embedded in a message set did not match the computed CRC.
    #[error("crc mismatch: expected {expected:08x}, computed {computed:08x}")]
    CrcMismatch {
        /// CRC32C read from the wire.
        expected: u32,
        /// CRC32C computed over the payload.
        computed: u32,
    },

    /// An unsupported or unrecognized compression codec bit pattern.
    #[error("unsupported compression codec: {0}")]
    UnsupportedCompression(u8),

    /// Compressing or decompressing the record batch failed.
    #[error("(de)compression failed: {0}")]
    Compression(String),

    /// The broker returned a non-zero error code for a partition or
    /// request.
    #[error("broker error code {0}")]
    BrokerError(i16),
}
