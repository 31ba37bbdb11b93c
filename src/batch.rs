//! Batches: ordered runs of messages bound for one (broker, topic,
//! partition) (spec section 3, 4.D).

use message::Message;
use std::sync::Arc;

/// Identifies the destination of a batch. Two batches with the same
/// fingerprint are never both open simultaneously; the router maintains at
/// most one open batch per fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Destination broker id.
    pub broker_id: i32,
    /// Destination topic.
    pub topic: Arc<str>,
    /// Destination partition.
    pub partition: i32,
}

/// Whether a batch is still accepting appends or is ready to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting further messages.
    Open,
    /// Sealed; handed (or awaiting hand-off) to a dispatcher.
    Sealed,
}

/// An ordered, growing run of messages for one fingerprint.
pub struct Batch {
    fingerprint: Fingerprint,
    messages: Vec<Message>,
    bytes: usize,
    opened_monotonic_ms: u64,
    state: BatchState,
}

impl Batch {
    /// Open a new, empty batch for `fingerprint` at time `now_ms`.
    pub fn open(fingerprint: Fingerprint, now_ms: u64) -> Batch {
        Batch {
            fingerprint,
            messages: Vec::new(),
            bytes: 0,
            opened_monotonic_ms: now_ms,
            state: BatchState::Open,
        }
    }

    /// The batch's destination.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Append a message. Panics if the batch has already been sealed --
    /// callers must check `is_open()` first.
    pub fn push(&mut self, message: Message) {
        assert!(self.state == BatchState::Open, "cannot append to a sealed batch");
        self.bytes += message.value_len();
        self.messages.push(message);
    }

    /// Number of messages currently in the batch.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Borrow the batch's messages in admission order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True if the batch holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total value bytes across all messages in the batch.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Age of the batch, in milliseconds, relative to `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.opened_monotonic_ms)
    }

    /// True while the batch may still accept appends.
    pub fn is_open(&self) -> bool {
        self.state == BatchState::Open
    }

    /// Decide whether this batch should be sealed given the configured
    /// thresholds and the current time (spec section 4.D).
    pub fn should_seal(&self, max_bytes: usize, max_messages: usize, linger_ms: u64, now_ms: u64) -> bool {
        self.is_open()
            && (self.bytes >= max_bytes
                || self.messages.len() >= max_messages
                || self.age_ms(now_ms) >= linger_ms)
    }

    /// Seal the batch, preventing further appends.
    pub fn seal(&mut self) {
        self.state = BatchState::Sealed;
    }

    /// Consume the batch, yielding its messages in admission order.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message::MessageKind;
    use pool::Pool;

    fn fp() -> Fingerprint {
        Fingerprint {
            broker_id: 0,
            topic: Arc::from("t"),
            partition: 0,
        }
    }

    fn msg(pool: &Arc<Pool>, bytes: &[u8]) -> Message {
        let mut block = pool.try_acquire(bytes.len()).unwrap();
        block.copy_from(bytes);
        Message::new(Arc::from("t"), None, block, 0, 0, MessageKind::AnyPartition)
    }

    #[test]
    fn seals_on_message_count() {
        let pool = Pool::new(1024 * 1024, 4096);
        let mut batch = Batch::open(fp(), 0);
        batch.push(msg(&pool, b"a"));
        assert!(!batch.should_seal(1_000_000, 1, 1_000_000, 0));
        batch.push(msg(&pool, b"b"));
        assert!(batch.should_seal(1_000_000, 2, 1_000_000, 0));
    }

    #[test]
    fn seals_on_age() {
        let batch = Batch::open(fp(), 0);
        assert!(!batch.should_seal(1_000_000, 1_000_000, 100, 50));
        assert!(batch.should_seal(1_000_000, 1_000_000, 100, 150));
    }

    #[test]
    fn push_after_seal_panics() {
        let pool = Pool::new(1024 * 1024, 4096);
        let mut batch = Batch::open(fp(), 0);
        batch.seal();
        let result = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
            batch.push(msg(&pool, b"a"));
        }));
        assert!(result.is_err());
    }
}
