//! Cluster metadata map and fetcher (spec section 4.F).
//!
//! The map is published as a copy-on-write snapshot: routing decisions take
//! an `Arc` clone under a read lock held only long enough to clone the
//! pointer, so no routing decision ever observes a partially-updated map.
//! Only the metadata fetcher ever publishes a new snapshot.

use broker::Broker;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A single partition's leadership as last observed from the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMeta {
    /// Current leader broker id, if known.
    pub leader_broker_id: Option<i32>,
    /// The leader broker's connection generation at last observation.
    pub generation: u64,
}

/// One topic's full partition map.
#[derive(Debug, Clone, Default)]
pub struct TopicMeta {
    /// Partition id -> leadership info.
    pub partitions: HashMap<i32, PartitionMeta>,
    /// Broker-reported error code for this topic, if any.
    pub error_code: Option<i16>,
    /// Monotonic ms timestamp of the refresh that produced this entry.
    pub last_refresh_ms: u64,
}

impl TopicMeta {
    /// Number of partitions currently known to have a leader.
    pub fn available_partition_count(&self) -> usize {
        self.partitions
            .values()
            .filter(|p| p.leader_broker_id.is_some())
            .count()
    }
}

/// An immutable, fully-formed view of cluster metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    /// Topic name -> topic metadata.
    pub topics: HashMap<String, TopicMeta>,
    /// Known brokers, keyed by broker id.
    pub brokers: HashMap<i32, Broker>,
    /// Monotonic ms this snapshot was assembled.
    pub fetched_at_ms: u64,
}

/// Copy-on-write holder for the current metadata snapshot.
pub struct MetadataMap {
    inner: RwLock<Arc<MetadataSnapshot>>,
}

impl MetadataMap {
    /// Build a map with an empty initial snapshot.
    pub fn new() -> MetadataMap {
        MetadataMap {
            inner: RwLock::new(Arc::new(MetadataSnapshot::default())),
        }
    }

    /// Take a consistent, shared-read snapshot for one routing decision.
    pub fn snapshot(&self) -> Arc<MetadataSnapshot> {
        Arc::clone(&self.inner.read().expect("metadata map lock poisoned"))
    }

    /// Atomically publish a newly-fetched snapshot.
    pub fn publish(&self, snapshot: Arc<MetadataSnapshot>) {
        *self.inner.write().expect("metadata map lock poisoned") = snapshot;
    }
}

impl Default for MetadataMap {
    fn default() -> Self {
        MetadataMap::new()
    }
}

/// The result of diffing two snapshots, used to drive dispatcher and
/// router reactions (spec section 4.F).
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Diff {
    /// Brokers present in the new snapshot but not the old one.
    pub added_brokers: Vec<i32>,
    /// Brokers present in the old snapshot but not the new one; their
    /// dispatchers should begin draining.
    pub removed_brokers: Vec<i32>,
    /// (topic, partition, old_leader, new_leader) for partitions whose
    /// leader changed.
    pub leadership_changes: Vec<(String, i32, Option<i32>, Option<i32>)>,
}

/// Compute the diff from `old` to `new`, driving dispatcher/router
/// reactions without requiring either snapshot to be mutated.
pub fn diff(old: &MetadataSnapshot, new: &MetadataSnapshot) -> Diff {
    let mut out = Diff::default();

    for id in new.brokers.keys() {
        if !old.brokers.contains_key(id) {
            out.added_brokers.push(*id);
        }
    }
    for id in old.brokers.keys() {
        if !new.brokers.contains_key(id) {
            out.removed_brokers.push(*id);
        }
    }

    for (topic, new_meta) in &new.topics {
        let old_meta = old.topics.get(topic);
        for (partition, new_partition_meta) in &new_meta.partitions {
            let old_leader = old_meta.and_then(|m| m.partitions.get(partition)).and_then(|p| p.leader_broker_id);
            if old_leader != new_partition_meta.leader_broker_id {
                out.leadership_changes.push((
                    topic.clone(),
                    *partition,
                    old_leader,
                    new_partition_meta.leader_broker_id,
                ));
            }
        }
    }

    out
}

/// Tracks which bootstrap/metadata broker to contact next, and how long to
/// back off after consecutive failures.
pub struct Fetcher {
    bootstrap: Vec<String>,
    cursor: usize,
    consecutive_failures: u32,
}

impl Fetcher {
    /// Build a fetcher that rotates through `bootstrap` (`host:port`
    /// strings) on failure.
    pub fn new(bootstrap: Vec<String>) -> Fetcher {
        Fetcher {
            bootstrap,
            cursor: 0,
            consecutive_failures: 0,
        }
    }

    /// The broker address to try next.
    pub fn current_target(&self) -> &str {
        &self.bootstrap[self.cursor % self.bootstrap.len()]
    }

    /// Record a successful fetch, resetting backoff state.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failed fetch attempt against `current_target`, rotate to
    /// the next bootstrap broker, and return how long to wait before
    /// retrying.
    pub fn record_failure(&mut self) -> ::std::time::Duration {
        self.cursor = (self.cursor + 1) % self.bootstrap.len();
        self.consecutive_failures += 1;
        ::time::backoff_with_jitter(self.consecutive_failures, 200, 30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn broker(id: i32) -> Broker {
        let addr: SocketAddr = "127.0.0.1:9092".parse().unwrap();
        Broker::new(id, addr, "127.0.0.1".into(), 9092)
    }

    #[test]
    fn diff_detects_added_and_removed_brokers() {
        let mut old = MetadataSnapshot::default();
        old.brokers.insert(0, broker(0));
        let mut new = MetadataSnapshot::default();
        new.brokers.insert(1, broker(1));

        let d = diff(&old, &new);
        assert_eq!(d.added_brokers, vec![1]);
        assert_eq!(d.removed_brokers, vec![0]);
    }

    #[test]
    fn diff_detects_leadership_change() {
        let mut old = MetadataSnapshot::default();
        let mut old_topic = TopicMeta::default();
        old_topic.partitions.insert(
            0,
            PartitionMeta {
                leader_broker_id: Some(0),
                generation: 1,
            },
        );
        old.topics.insert("t".to_string(), old_topic);

        let mut new = MetadataSnapshot::default();
        let mut new_topic = TopicMeta::default();
        new_topic.partitions.insert(
            0,
            PartitionMeta {
                leader_broker_id: Some(1),
                generation: 1,
            },
        );
        new.topics.insert("t".to_string(), new_topic);

        let d = diff(&old, &new);
        assert_eq!(
            d.leadership_changes,
            vec![("t".to_string(), 0, Some(0), Some(1))]
        );
    }

    #[test]
    fn snapshot_publish_is_visible_to_subsequent_reads() {
        let map = MetadataMap::new();
        assert!(map.snapshot().brokers.is_empty());

        let mut snap = MetadataSnapshot::default();
        snap.brokers.insert(0, broker(0));
        map.publish(Arc::new(snap));

        assert_eq!(map.snapshot().brokers.len(), 1);
    }

    #[test]
    fn fetcher_rotates_bootstrap_list_on_failure() {
        let mut fetcher = Fetcher::new(vec!["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(fetcher.current_target(), "a:1");
        fetcher.record_failure();
        assert_eq!(fetcher.current_target(), "b:2");
        fetcher.record_failure();
        assert_eq!(fetcher.current_target(), "a:1");
    }
}
