//! Library level constants.
use mio;

/// MIO token used to distinguish system (shutdown) events from other event
/// sources.
///
/// Note - It is assumed that sources will not hold more than 2048
/// addressable streams, 0 indexed.
pub const SYSTEM: mio::Token = mio::Token(2048);

/// Wire format magic byte (see `wire` module).
pub const WIRE_MAGIC: u8 = 0xDA;

/// Currently supported wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Maximum topic name length in bytes, per the wire format.
pub const MAX_TOPIC_LEN: usize = 249;

/// Minimum topic name length in bytes.
pub const MIN_TOPIC_LEN: usize = 1;

/// Default pool block size: 128 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Default maximum total message size: 64 KiB.
pub const DEFAULT_MAX_MSG_SIZE: usize = 64 * 1024;

/// Default number of discard-tracker entries retained before eviction
/// collapses resolution.
pub const DEFAULT_DISCARD_CAPACITY: usize = 512;

/// Tick resolution for the router's batch-aging scheduler.
pub const ROUTER_TICK_MS: u64 = 10;
