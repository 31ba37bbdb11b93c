//! Discard tracker (spec section 4.H): a bounded, single-writer record of
//! recent discards plus monotonic global counters by reason.
//!
//! Grounded in the teacher's self-telemetry pattern in `source/internal.rs`
//! (a lazy_static queue drained by a single dedicated task) -- here the
//! queue carries `Event`s from every discard site in the process to one
//! tracker thread, keeping aggregation single-writer as the spec requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

lazy_static! {
    static ref GLOBAL_COUNTERS: Mutex<HashMap<&'static str, AtomicU64>> = Mutex::new(HashMap::new());
}

/// Why a message was discarded. Mirrors spec section 3's discard kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The message pool had no free blocks.
    PoolExhausted,
    /// No known partition leader within `max_retry_ms`.
    NoLeader,
    /// The in-flight batch's deadline expired.
    SendTimeout,
    /// The broker rejected the batch with a terminal error code.
    BrokerRejected(i16),
    /// The message exceeded the configured maximum size.
    TooLarge,
    /// The wire frame's message kind was not recognized.
    UnsupportedMsgKind,
    /// Remaining messages at the end of a deadline-bounded shutdown drain.
    ShutdownDrainFailed,
    /// The wire frame failed to decode.
    Malformed,
    /// The router's admission queue was full.
    BackpressureDiscard,
}

impl Reason {
    fn as_str(&self) -> &'static str {
        match *self {
            Reason::PoolExhausted => "pool_exhausted",
            Reason::NoLeader => "no_leader",
            Reason::SendTimeout => "send_timeout",
            Reason::BrokerRejected(_) => "broker_rejected",
            Reason::TooLarge => "too_large",
            Reason::UnsupportedMsgKind => "unsupported_msg_kind",
            Reason::ShutdownDrainFailed => "shutdown_drain_failed",
            Reason::Malformed => "malformed",
            Reason::BackpressureDiscard => "backpressure_discard",
        }
    }
}

/// One aggregated discard record, keyed by (topic, reason).
#[derive(Debug, Clone)]
pub struct Entry {
    /// Topic the discarded messages belonged to. `None` once resolution
    /// has collapsed past the topic component (see `Tracker::record`).
    pub topic: Option<String>,
    /// The discard reason.
    pub reason: Reason,
    /// Number of discards aggregated into this entry.
    pub count: u64,
    /// Monotonic ms of the first discard aggregated here.
    pub first_seen_ms: u64,
    /// Monotonic ms of the most recent discard aggregated here.
    pub last_seen_ms: u64,
    /// Prefix of the bytes of the first discarded message of this class.
    pub sample_bytes_prefix: Vec<u8>,
}

const SAMPLE_PREFIX_LEN: usize = 64;

/// A bounded tracker holding at most `capacity` entries. Single-writer by
/// convention: callers are expected to serialize access to one tracker
/// through a dedicated task fed by a channel, per spec section 5.
pub struct Tracker {
    capacity: usize,
    entries: HashMap<(Option<String>, Reason), Entry>,
}

impl Tracker {
    /// Build an empty tracker with room for `capacity` distinct entries.
    pub fn new(capacity: usize) -> Tracker {
        Tracker {
            capacity,
            entries: HashMap::new(),
        }
    }

    /// Record one discard of `reason` for `topic`, at time `now_ms`, with
    /// `sample` as the message bytes (used only if this is the first
    /// occurrence of this class).
    pub fn record(&mut self, topic: &str, reason: Reason, now_ms: u64, sample: &[u8]) {
        bump_global_counter(reason.as_str());

        let key = (Some(topic.to_string()), reason.clone());
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.count += 1;
            entry.last_seen_ms = now_ms;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.collapse_one();
        }

        if self.entries.len() >= self.capacity {
            // Still full after attempting to collapse: fold straight into
            // the reason-only bucket rather than growing past capacity.
            self.fold_into_reason_only(reason, now_ms, sample);
            return;
        }

        let prefix_len = sample.len().min(SAMPLE_PREFIX_LEN);
        self.entries.insert(
            key.clone(),
            Entry {
                topic: key.0,
                reason: key.1,
                count: 1,
                first_seen_ms: now_ms,
                last_seen_ms: now_ms,
                sample_bytes_prefix: sample[..prefix_len].to_vec(),
            },
        );
    }

    /// Collapse one (topic, reason) entry into its reason-only bucket,
    /// dropping the topic component to free a slot without losing the
    /// aggregated count.
    fn collapse_one(&mut self) {
        let victim_key = self
            .entries
            .iter()
            .filter(|(k, _)| k.0.is_some())
            .min_by_key(|(_, v)| v.last_seen_ms)
            .map(|(k, _)| k.clone());

        if let Some(key) = victim_key {
            if let Some(entry) = self.entries.remove(&key) {
                self.fold_into_reason_only(entry.reason, entry.last_seen_ms, &entry.sample_bytes_prefix);
                let reason_key = (None, key.1);
                if let Some(target) = self.entries.get_mut(&reason_key) {
                    target.count = target.count.saturating_add(entry.count.saturating_sub(1));
                    target.first_seen_ms = target.first_seen_ms.min(entry.first_seen_ms);
                }
            }
        }
    }

    fn fold_into_reason_only(&mut self, reason: Reason, now_ms: u64, sample: &[u8]) {
        let key = (None, reason.clone());
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.count += 1;
            entry.last_seen_ms = now_ms;
        } else {
            let prefix_len = sample.len().min(SAMPLE_PREFIX_LEN);
            self.entries.insert(
                key,
                Entry {
                    topic: None,
                    reason,
                    count: 1,
                    first_seen_ms: now_ms,
                    last_seen_ms: now_ms,
                    sample_bytes_prefix: sample[..prefix_len].to_vec(),
                },
            );
        }
    }

    /// Number of distinct entries currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sum of all entries' counts -- the total number of discards since the
    /// tracker was created or last reset.
    pub fn total_count(&self) -> u64 {
        self.entries.values().map(|e| e.count).sum()
    }

    /// Snapshot the current report, sorted for stable output.
    pub fn report(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.reason.as_str().cmp(b.reason.as_str()).then(a.topic.cmp(&b.topic)));
        entries
    }

    /// Clear the report. Global counters (exposed separately) are
    /// untouched, per spec section 4.H ("counters remain cumulative").
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

fn bump_global_counter(reason: &'static str) {
    let mut counters = GLOBAL_COUNTERS.lock().expect("discard counters mutex poisoned");
    counters
        .entry(reason)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of the cumulative, never-reset global counters by reason.
pub fn global_counters() -> HashMap<&'static str, u64> {
    let counters = GLOBAL_COUNTERS.lock().expect("discard counters mutex poisoned");
    counters
        .iter()
        .map(|(k, v)| (*k, v.load(Ordering::Relaxed)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity() {
        let mut tracker = Tracker::new(2);
        tracker.record("t1", Reason::TooLarge, 0, b"a");
        tracker.record("t2", Reason::TooLarge, 1, b"b");
        tracker.record("t3", Reason::TooLarge, 2, b"c");
        assert!(tracker.len() <= 2);
    }

    #[test]
    fn collapse_preserves_total_count() {
        let mut tracker = Tracker::new(1);
        tracker.record("t1", Reason::NoLeader, 0, b"a");
        tracker.record("t2", Reason::NoLeader, 1, b"b");
        tracker.record("t3", Reason::NoLeader, 2, b"c");
        assert_eq!(tracker.total_count(), 3);
    }

    #[test]
    fn reset_clears_report_not_global_counters() {
        let mut tracker = Tracker::new(8);
        tracker.record("t1", Reason::Malformed, 0, b"x");
        assert_eq!(tracker.total_count(), 1);
        tracker.reset();
        assert_eq!(tracker.total_count(), 0);
        assert!(global_counters().get("malformed").copied().unwrap_or(0) >= 1);
    }

    #[test]
    fn repeat_reset_is_idempotent() {
        let mut tracker = Tracker::new(8);
        tracker.record("t1", Reason::Malformed, 0, b"x");
        tracker.reset();
        tracker.reset();
        assert_eq!(tracker.total_count(), 0);
    }
}
