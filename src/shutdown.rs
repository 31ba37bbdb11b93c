//! Shutdown coordination (spec section 4.H): catches SIGINT/SIGTERM, flips
//! a shared flag every long-running task polls, and bounds how long the
//! daemon waits for in-flight batches to drain before forcing the rest out
//! as discards.
//!
//! Grounded in the teacher's `thread::Stoppable`/`ThreadHandle` cooperative
//! shutdown model: tasks don't get killed, they notice a flag and return.

use discard;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared shutdown state. Cloned (via `Arc`) into every long-running task.
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    drain_deadline_ms: u64,
}

impl Shutdown {
    /// A fresh, not-yet-requested shutdown coordinator. `drain_max_delay_ms`
    /// bounds how long `wait_for_drain` blocks before giving up.
    pub fn new(drain_max_delay_ms: u64) -> Shutdown {
        Shutdown {
            requested: Arc::new(AtomicBool::new(false)),
            drain_deadline_ms: drain_max_delay_ms,
        }
    }

    /// Has shutdown been requested?
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Flip the shared flag. Idempotent.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    /// A clone of the underlying flag, suitable for handing to a thread
    /// that only needs to observe it (`AtomicBool::load`), not request it.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.requested)
    }

    /// Block, polling `remaining` every 20ms, until either it reports zero
    /// in-flight work or `drain_max_delay_ms` elapses. Returns `true` if
    /// drain completed cleanly, `false` if the deadline was hit with work
    /// still outstanding -- the caller is then responsible for discarding
    /// the remainder with `discard::Reason::ShutdownDrainFailed`.
    pub fn wait_for_drain<F>(&self, mut remaining: F) -> bool
    where
        F: FnMut() -> usize,
    {
        let deadline = Instant::now() + Duration::from_millis(self.drain_deadline_ms);
        loop {
            let left = remaining();
            if left == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("shutdown drain deadline hit with {} items still outstanding", left);
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Block the calling thread until SIGINT or SIGTERM arrives, then call
/// `Shutdown::request`. Intended to run on its own thread for the life of
/// the process; grounded in `chan_signal`'s standard blocking-receive
/// pattern.
pub fn wait_for_signal(shutdown: &Shutdown) {
    let signal = chan_signal::notify(&[chan_signal::Signal::INT, chan_signal::Signal::TERM]);
    signal.recv();
    info!("shutdown signal received, beginning drain");
    shutdown.request();
}

/// Discard every remaining queued item after a failed drain, tallying each
/// one under `discard::Reason::ShutdownDrainFailed`. `count` is consumed
/// destructively by the caller's drain loop, so this just needs to know
/// how many items were left and which topic (if known) to attribute them
/// to.
pub fn discard_undrained(tracker: &mut discard::Tracker, topic: &str, count: usize, now_ms: u64) {
    for _ in 0..count {
        tracker.record(topic, discard::Reason::ShutdownDrainFailed, now_ms, &[]);
    }
}

/// Counts outstanding work across the dispatcher pool, used as the
/// `remaining` closure for `Shutdown::wait_for_drain`.
#[derive(Default)]
pub struct DrainCounter {
    count: AtomicUsize,
}

impl DrainCounter {
    /// A fresh counter starting at zero.
    pub fn new() -> DrainCounter {
        DrainCounter::default()
    }

    /// Increment by one, e.g. when a batch is admitted into a dispatcher's
    /// send queue.
    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by one, e.g. when a batch is acked or discarded.
    pub fn dec(&self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current outstanding count.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_drain_returns_true_once_remaining_hits_zero() {
        let shutdown = Shutdown::new(1_000);
        let mut calls = 0;
        let ok = shutdown.wait_for_drain(|| {
            calls += 1;
            if calls < 3 {
                1
            } else {
                0
            }
        });
        assert!(ok);
    }

    #[test]
    fn wait_for_drain_gives_up_at_deadline() {
        let shutdown = Shutdown::new(30);
        let ok = shutdown.wait_for_drain(|| 1);
        assert!(!ok);
    }

    #[test]
    fn request_is_idempotent_and_observable_via_flag() {
        let shutdown = Shutdown::new(100);
        let flag = shutdown.flag();
        assert!(!flag.load(Ordering::Relaxed));
        shutdown.request();
        shutdown.request();
        assert!(flag.load(Ordering::Relaxed));
        assert!(shutdown.is_requested());
    }

    #[test]
    fn drain_counter_tracks_in_flight_work() {
        let counter = DrainCounter::new();
        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
        counter.dec();
        assert_eq!(counter.get(), 1);
    }
}
