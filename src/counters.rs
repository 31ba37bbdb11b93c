//! Process-wide cumulative counters surfaced at `/sys/counters` (spec
//! section 4.I): how many messages were admitted, acked, and handed back
//! for another delivery attempt.
//!
//! Grounded in the same lazy_static atomic pattern `discard.rs` uses for
//! its own per-reason counters; these three are named directly rather than
//! keyed by a string because every caller already knows which one it means.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

lazy_static! {
    static ref ADMITTED: AtomicU64 = AtomicU64::new(0);
    static ref ACKED: AtomicU64 = AtomicU64::new(0);
    static ref RETRIED: AtomicU64 = AtomicU64::new(0);
}

/// Count `n` messages as successfully admitted onto the router queue.
pub fn record_admitted(n: u64) {
    ADMITTED.fetch_add(n, Ordering::Relaxed);
}

/// Count `n` messages as acked by their broker.
pub fn record_acked(n: u64) {
    ACKED.fetch_add(n, Ordering::Relaxed);
}

/// Count `n` messages as handed back for another delivery attempt.
pub fn record_retried(n: u64) {
    RETRIED.fetch_add(n, Ordering::Relaxed);
}

/// Snapshot of every counter tracked here, merged by the status surface
/// with `discard::global_counters` into one `/sys/counters` response.
pub fn snapshot() -> HashMap<&'static str, u64> {
    let mut out = HashMap::new();
    out.insert("admitted", ADMITTED.load(Ordering::Relaxed));
    out.insert("acked", ACKED.load(Ordering::Relaxed));
    out.insert("retried", RETRIED.load(Ordering::Relaxed));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let before = snapshot();
        record_admitted(3);
        record_acked(2);
        record_retried(1);
        let after = snapshot();
        assert_eq!(after["admitted"], before["admitted"] + 3);
        assert_eq!(after["acked"], before["acked"] + 2);
        assert_eq!(after["retried"], before["retried"] + 1);
    }
}
