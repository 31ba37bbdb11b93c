//! The message record (spec section 3, 4.B): an owning handle to one
//! admitted message's bytes plus its routing metadata.

use pool::BlockHandle;
use std::sync::Arc;

/// How a message is routed to a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Assigned round-robin over the topic's available partitions.
    AnyPartition,
    /// Hashed to a partition at admission time; the binding sticks across
    /// retries.
    PartitionKey(u32),
}

/// An immutable-after-admission message record. Only `attempt_count` and
/// `routed_partition` may change post-admission.
pub struct Message {
    topic: Arc<str>,
    partition_key: Option<Box<[u8]>>,
    value: BlockHandle,
    created_monotonic_ms: u64,
    created_wall_ms: u64,
    kind: MessageKind,
    attempt_count: u32,
    routed_partition: Option<i32>,
}

impl Message {
    /// Construct a new message record. Called by an input source once the
    /// wire frame has validated and a pool block has been acquired and
    /// filled.
    pub fn new(
        topic: Arc<str>,
        partition_key: Option<Box<[u8]>>,
        value: BlockHandle,
        created_monotonic_ms: u64,
        created_wall_ms: u64,
        kind: MessageKind,
    ) -> Message {
        Message {
            topic,
            partition_key,
            value,
            created_monotonic_ms,
            created_wall_ms,
            kind,
            attempt_count: 0,
            routed_partition: None,
        }
    }

    /// Destination topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Optional partition key bytes, present only for `PartitionKey`
    /// messages.
    pub fn partition_key(&self) -> Option<&[u8]> {
        self.partition_key.as_deref()
    }

    /// The message's value bytes.
    pub fn value(&self) -> &[u8] {
        self.value.as_slice()
    }

    /// Size in bytes of the value payload. Used for batch-sealing
    /// accounting.
    pub fn value_len(&self) -> usize {
        self.value.len()
    }

    /// Monotonic creation timestamp, for aging/deadline comparisons.
    pub fn created_monotonic_ms(&self) -> u64 {
        self.created_monotonic_ms
    }

    /// Wall-clock creation timestamp, echoed on the wire.
    pub fn created_wall_ms(&self) -> u64 {
        self.created_wall_ms
    }

    /// The message's routing kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Number of delivery attempts made so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Increment the attempt counter. Called by retry before re-routing.
    pub fn record_attempt(&mut self) {
        self.attempt_count += 1;
    }

    /// Partition this message has been routed to, if a routing decision has
    /// been made.
    pub fn routed_partition(&self) -> Option<i32> {
        self.routed_partition
    }

    /// Record a routing decision. `PartitionKey` messages keep this value
    /// fixed across retries (the router must not call this again for such
    /// a message once set); `AnyPartition` messages may be re-routed.
    pub fn set_routed_partition(&mut self, partition: i32) {
        self.routed_partition = Some(partition);
    }

    /// Release the underlying pool block. Consumes the message: callers
    /// hold a `Message` exactly until it is acked or discarded, at which
    /// point this returns its memory to the pool.
    pub fn into_block(self) -> BlockHandle {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool::Pool;

    fn test_message(kind: MessageKind) -> Message {
        let pool = Pool::new(4096, 1024);
        let mut block = pool.try_acquire(5).unwrap();
        block.copy_from(b"hello");
        Message::new(Arc::from("t"), None, block, 0, 0, kind)
    }

    #[test]
    fn partition_key_binding_is_sticky_once_set() {
        let mut msg = test_message(MessageKind::PartitionKey(7));
        msg.set_routed_partition(2);
        assert_eq!(msg.routed_partition(), Some(2));
        assert_eq!(msg.kind(), MessageKind::PartitionKey(7));
    }

    #[test]
    fn attempt_count_increments() {
        let mut msg = test_message(MessageKind::AnyPartition);
        assert_eq!(msg.attempt_count(), 0);
        msg.record_attempt();
        msg.record_attempt();
        assert_eq!(msg.attempt_count(), 2);
    }
}
