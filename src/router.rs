//! Router (spec section 4.D): applies topic -> partition policy and groups
//! admitted messages into per-(broker, topic, partition) batches.
//!
//! Runs as a single dedicated thread/task (spec section 5's "single
//! responsibility worker" pipeline), so no internal locking is needed here
//! -- callers serialize access the way the teacher's sinks serialize access
//! to their own per-sink state.

use batch::{Batch, Fingerprint};
use conf::BatchingConf;
use discard;
use message::{Message, MessageKind};
use metadata::MetadataMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Outcome of admitting one message to the router.
pub enum Admit {
    /// The message's batch was sealed as a side effect of this admission.
    Sealed(Batch),
    /// The message was appended to an open batch; nothing to send yet.
    Appended,
    /// No partition leader was known; the message was parked awaiting a
    /// metadata refresh.
    Parked,
    /// The message could not be routed or parked and was discarded.
    Discarded(discard::Reason, Message),
}

/// Batches whose age crossed their linger threshold, or messages whose
/// parked wait exceeded `max_retry_ms`, produced by a scheduler tick.
#[derive(Default)]
pub struct TickOutcome {
    /// Batches sealed purely because they aged out.
    pub sealed: Vec<Batch>,
    /// Messages that waited too long for metadata and are now discarded.
    pub discarded: Vec<(discard::Reason, Message)>,
}

struct Parked {
    message: Message,
    routed_partition: i32,
}

/// Owns the open-batch table and the per-topic round-robin cursors.
pub struct Router {
    metadata: Arc<MetadataMap>,
    batching: BatchingConf,
    open_batches: HashMap<Fingerprint, Batch>,
    round_robin: HashMap<String, usize>,
    awaiting_metadata: HashMap<String, VecDeque<Parked>>,
    awaiting_metadata_capacity: usize,
}

impl Router {
    /// Build a router over `metadata`, using `batching` thresholds and a
    /// per-topic "awaiting metadata" queue capped at
    /// `awaiting_metadata_capacity` entries.
    pub fn new(metadata: Arc<MetadataMap>, batching: BatchingConf, awaiting_metadata_capacity: usize) -> Router {
        Router {
            metadata,
            batching,
            open_batches: HashMap::new(),
            round_robin: HashMap::new(),
            awaiting_metadata: HashMap::new(),
            awaiting_metadata_capacity,
        }
    }

    /// Admit one message, applying the topic->partition policy and
    /// batch-sealing thresholds (spec section 4.D).
    pub fn admit(&mut self, mut message: Message, now_ms: u64) -> Admit {
        let snapshot = self.metadata.snapshot();
        let topic = message.topic().to_string();

        let partition = match message.kind() {
            MessageKind::AnyPartition => self.pick_round_robin_partition(&topic, &snapshot),
            MessageKind::PartitionKey(_) => {
                if let Some(already) = message.routed_partition() {
                    Some(already)
                } else {
                    self.pick_key_partition(&topic, &message, &snapshot)
                }
            }
        };

        let partition = match partition {
            Some(p) => p,
            None => return self.park_or_discard(&topic, message),
        };
        message.set_routed_partition(partition);

        let topic_meta = match snapshot.topics.get(&topic) {
            Some(t) => t,
            None => return self.park_or_discard(&topic, message),
        };
        let leader = topic_meta.partitions.get(&partition).and_then(|p| p.leader_broker_id);
        let broker_id = match leader {
            Some(b) => b,
            None => return self.park_or_discard(&topic, message),
        };

        let fingerprint = Fingerprint {
            broker_id,
            topic: Arc::from(topic.as_str()),
            partition,
        };
        self.append_and_maybe_seal(fingerprint, message, now_ms)
    }

    fn append_and_maybe_seal(&mut self, fingerprint: Fingerprint, message: Message, now_ms: u64) -> Admit {
        let thresholds = self.batching.for_topic(&fingerprint.topic).clone();
        let batch = self
            .open_batches
            .entry(fingerprint.clone())
            .or_insert_with(|| Batch::open(fingerprint.clone(), now_ms));
        batch.push(message);

        if batch.should_seal(thresholds.max_bytes, thresholds.max_messages, thresholds.linger_ms, now_ms) {
            let mut sealed = self.open_batches.remove(&fingerprint).expect("just inserted");
            sealed.seal();
            Admit::Sealed(sealed)
        } else {
            Admit::Appended
        }
    }

    fn pick_round_robin_partition(
        &mut self,
        topic: &str,
        snapshot: &::metadata::MetadataSnapshot,
    ) -> Option<i32> {
        let topic_meta = snapshot.topics.get(topic)?;
        let mut available: Vec<i32> = topic_meta
            .partitions
            .iter()
            .filter(|(_, meta)| meta.leader_broker_id.is_some())
            .map(|(id, _)| *id)
            .collect();
        if available.is_empty() {
            return None;
        }
        available.sort_unstable();

        let cursor = self.round_robin.entry(topic.to_string()).or_insert(0);
        let partition = available[*cursor % available.len()];
        *cursor = cursor.wrapping_add(1);
        Some(partition)
    }

    fn pick_key_partition(
        &self,
        topic: &str,
        message: &Message,
        snapshot: &::metadata::MetadataSnapshot,
    ) -> Option<i32> {
        let topic_meta = snapshot.topics.get(topic)?;
        let mut all_partitions: Vec<i32> = topic_meta.partitions.keys().cloned().collect();
        if all_partitions.is_empty() {
            return None;
        }
        all_partitions.sort_unstable();

        let mut hasher = DefaultHasher::new();
        message.partition_key().unwrap_or(&[]).hash(&mut hasher);
        let index = (hasher.finish() as usize) % all_partitions.len();
        Some(all_partitions[index])
    }

    fn park_or_discard(&mut self, topic: &str, mut message: Message) -> Admit {
        let routed = message.routed_partition();
        let queue = self
            .awaiting_metadata
            .entry(topic.to_string())
            .or_insert_with(VecDeque::new);
        if queue.len() >= self.awaiting_metadata_capacity {
            return Admit::Discarded(discard::Reason::NoLeader, message);
        }
        // AnyPartition messages may park without a fixed partition; re-pick
        // on the next metadata refresh. PartitionKey messages keep theirs.
        let routed_partition = routed.unwrap_or(-1);
        if routed.is_none() {
            message.set_routed_partition(-1);
        }
        queue.push_back(Parked {
            message,
            routed_partition,
        });
        Admit::Parked
    }

    /// Walk open batches and parked messages, sealing age-expired batches
    /// and discarding parked messages that exceeded `max_retry_ms`.
    pub fn tick(&mut self, now_ms: u64, max_retry_ms: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let mut sealed_keys = Vec::new();
        for (fp, batch) in &self.open_batches {
            let thresholds = self.batching.for_topic(&fp.topic);
            if batch.should_seal(thresholds.max_bytes, thresholds.max_messages, thresholds.linger_ms, now_ms) {
                sealed_keys.push(fp.clone());
            }
        }
        for key in sealed_keys {
            if let Some(mut batch) = self.open_batches.remove(&key) {
                batch.seal();
                outcome.sealed.push(batch);
            }
        }

        for queue in self.awaiting_metadata.values_mut() {
            let mut still_waiting = VecDeque::new();
            while let Some(parked) = queue.pop_front() {
                if now_ms.saturating_sub(parked.message.created_monotonic_ms()) >= max_retry_ms {
                    outcome.discarded.push((discard::Reason::NoLeader, parked.message));
                } else {
                    still_waiting.push_back(parked);
                }
            }
            *queue = still_waiting;
        }

        outcome
    }

    /// Re-attempt routing for every message parked awaiting metadata for
    /// `topic`, following a metadata refresh that may now know its leader.
    /// Returns any batches sealed as a side effect.
    pub fn retry_parked(&mut self, topic: &str, now_ms: u64) -> Vec<Batch> {
        let queue = match self.awaiting_metadata.remove(topic) {
            Some(q) => q,
            None => return Vec::new(),
        };
        let mut sealed = Vec::new();
        for parked in queue {
            let mut message = parked.message;
            if parked.routed_partition >= 0 {
                message.set_routed_partition(parked.routed_partition);
            }
            match self.admit(message, now_ms) {
                Admit::Sealed(batch) => sealed.push(batch),
                _ => {}
            }
        }
        sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conf::{BatchThresholds, BatchingConf};
    use message::MessageKind;
    use metadata::{MetadataSnapshot, PartitionMeta, TopicMeta};
    use pool::Pool;
    use std::sync::Arc;

    fn msg(topic: &str, kind: MessageKind) -> Message {
        let pool = Pool::new(4096, 1024);
        let mut block = pool.try_acquire(3).unwrap();
        block.copy_from(b"abc");
        Message::new(Arc::from(topic), None, block, 0, 0, kind)
    }

    fn snapshot_with_two_partitions(topic: &str, broker_id: i32) -> MetadataSnapshot {
        let mut meta = TopicMeta::default();
        meta.partitions.insert(
            0,
            PartitionMeta {
                leader_broker_id: Some(broker_id),
                generation: 1,
            },
        );
        meta.partitions.insert(
            1,
            PartitionMeta {
                leader_broker_id: Some(broker_id),
                generation: 1,
            },
        );
        let mut snap = MetadataSnapshot::default();
        snap.topics.insert(topic.to_string(), meta);
        snap
    }

    fn router_with_snapshot(topic: &str, broker_id: i32) -> Router {
        let map = Arc::new(MetadataMap::new());
        map.publish(Arc::new(snapshot_with_two_partitions(topic, broker_id)));
        Router::new(map, BatchingConf::default(), 16)
    }

    #[test]
    fn any_partition_round_robins() {
        let mut batching = BatchingConf::default();
        batching.default = BatchThresholds {
            max_bytes: 1_000_000,
            max_messages: 1_000_000,
            linger_ms: 1_000_000,
        };
        let map = Arc::new(MetadataMap::new());
        map.publish(Arc::new(snapshot_with_two_partitions("t", 0)));
        let mut router = Router::new(map, batching, 16);

        for _ in 0..4 {
            router.admit(msg("t", MessageKind::AnyPartition), 0);
        }
        let mut partitions: Vec<i32> = router.open_batches.keys().map(|fp| fp.partition).collect();
        partitions.sort_unstable();
        assert_eq!(partitions, vec![0, 1]);
    }

    #[test]
    fn partition_key_sticks_across_admissions() {
        let mut router = router_with_snapshot("t", 0);
        let first = msg("t", MessageKind::PartitionKey(1));
        let outcome = router.admit(first, 0);
        assert!(matches_appended_or_sealed(&outcome));

        let chosen_partition = router
            .open_batches
            .keys()
            .next()
            .map(|fp| fp.partition)
            .unwrap();

        let mut second = msg("t", MessageKind::PartitionKey(1));
        second.set_routed_partition(chosen_partition);
        router.admit(second, 0);

        assert_eq!(router.open_batches.len(), 1);
    }

    fn matches_appended_or_sealed(outcome: &Admit) -> bool {
        match outcome {
            Admit::Appended | Admit::Sealed(_) => true,
            _ => false,
        }
    }

    #[test]
    fn no_leader_parks_then_discards_after_deadline() {
        let map = Arc::new(MetadataMap::new());
        let mut router = Router::new(map, BatchingConf::default(), 16);

        let outcome = router.admit(msg("unknown-topic", MessageKind::AnyPartition), 0);
        assert!(if let Admit::Parked = outcome { true } else { false });

        let tick = router.tick(10_000, 5_000);
        assert_eq!(tick.discarded.len(), 1);
        assert_eq!(tick.discarded[0].0, discard::Reason::NoLeader);
    }

    #[test]
    fn awaiting_metadata_queue_overflow_discards_immediately() {
        let map = Arc::new(MetadataMap::new());
        let mut router = Router::new(map, BatchingConf::default(), 1);

        router.admit(msg("unknown-topic", MessageKind::AnyPartition), 0);
        let outcome = router.admit(msg("unknown-topic", MessageKind::AnyPartition), 0);
        match outcome {
            Admit::Discarded(discard::Reason::NoLeader, _) => {}
            _ => panic!("expected immediate NoLeader discard on queue overflow"),
        }
    }

    #[test]
    fn batch_seals_on_age_via_tick() {
        let mut batching = BatchingConf::default();
        batching.default = BatchThresholds {
            max_bytes: 1_000_000,
            max_messages: 1_000_000,
            linger_ms: 100,
        };
        let map = Arc::new(MetadataMap::new());
        map.publish(Arc::new(snapshot_with_two_partitions("t", 0)));
        let mut router = Router::new(map, batching, 16);

        router.admit(msg("t", MessageKind::AnyPartition), 0);
        let tick = router.tick(50, 30_000);
        assert!(tick.sealed.is_empty());

        let tick = router.tick(200, 30_000);
        assert_eq!(tick.sealed.len(), 1);
    }
}
