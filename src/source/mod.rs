//! Input sources (spec section 4.C): UNIX datagram, UNIX stream, and local
//! TCP acceptors that parse framed client input into messages.

pub mod framing;
pub mod tcp;
pub mod unix_dgram;
pub mod unix_stream;

use counters;
use discard;
use message::{Message, MessageKind};
use pool::Pool;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use wire;

/// A long-running acceptor, driven by a dedicated thread (see
/// `thread::spawn`). `run` owns the listening socket for the source's
/// entire lifetime and returns only once the shutdown event fires.
pub trait Source {
    /// Accept and process input until shutdown.
    fn run(&mut self, poll: mio::Poll);
}

/// Poll for the shutdown (system) event with `timeout`.  Returns `true`
/// once the shared shutdown registration has fired. Sources that don't
/// otherwise multiplex on `poll` (e.g. those using blocking I/O on their
/// own socket) call this periodically to notice shutdown promptly.
pub fn shutdown_requested(poll: &mio::Poll, timeout: Duration) -> bool {
    let mut events = mio::Events::with_capacity(16);
    match poll.poll(&mut events, Some(timeout)) {
        Ok(n) if n > 0 => true,
        _ => false,
    }
}

/// The collaborators every source needs to turn wire bytes into an
/// admitted message or a recorded discard. Grouped so the three acceptors
/// (`unix_dgram`, `unix_stream`, `tcp`) can share one admission path rather
/// than each re-implementing decode + pool-acquire + discard accounting.
pub struct Admission {
    /// Backing pool for message values.
    pub pool: Arc<Pool>,
    /// Maximum accepted total frame size.
    pub max_msg_size: usize,
    /// Destination for successfully decoded and pool-backed messages.
    pub admit_tx: SyncSender<Message>,
    /// Destination for discard events: (topic, reason, sample bytes).
    pub discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
}

/// Hash partition key bytes down to the `u32` a `MessageKind::PartitionKey`
/// carries. Only needs to be stable, not cryptographic -- the router
/// re-derives the actual partition index from the key bytes at routing
/// time.
pub fn fnv_hash32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl Admission {
    /// Decode one client frame and either admit it or record a discard.
    /// Shared by every source's per-frame handling.
    pub fn handle_frame(&self, buf: &[u8]) {
        let decoded = match wire::decode(buf, self.max_msg_size) {
            Ok(msg) => msg,
            Err(wire::WireError::TooLarge(_)) => {
                self.record_discard("", discard::Reason::TooLarge, buf);
                return;
            }
            Err(_) => {
                self.record_discard("", discard::Reason::Malformed, buf);
                return;
            }
        };

        let kind = match decoded.partition_key {
            Some(ref k) => MessageKind::PartitionKey(fnv_hash32(k)),
            None => MessageKind::AnyPartition,
        };

        let mut block = match self.pool.try_acquire(decoded.value.len()) {
            Some(b) => b,
            None => {
                self.record_discard(&decoded.topic, discard::Reason::PoolExhausted, buf);
                return;
            }
        };
        block.copy_from(&decoded.value);

        let message = Message::new(
            Arc::from(decoded.topic.as_str()),
            decoded.partition_key.map(|k| k.into_boxed_slice()),
            block,
            ::time::monotonic_ms(),
            decoded.client_timestamp_ms,
            kind,
        );

        match self.admit_tx.try_send(message) {
            Ok(()) => counters::record_admitted(1),
            Err(TrySendError::Full(_)) => {
                self.record_discard(&decoded.topic, discard::Reason::BackpressureDiscard, buf);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn record_discard(&self, topic: &str, reason: discard::Reason, sample: &[u8]) {
        let _ = self
            .discard_tx
            .try_send((topic.to_string(), reason, sample.to_vec()));
    }
}
