//! Collection of time utilities for dory.
//!
//! Time is not based strictly on wall-clock. We keep a global clock and
//! update it ourselves periodically; see `update_time` for details. This
//! keeps per-message and per-batch timestamp reads lock-free and cheap.

use chrono::offset::Utc;
use chrono::DateTime;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use std::{thread, time};

lazy_static! {
    static ref NOW: AtomicUsize = AtomicUsize::new(Utc::now().timestamp() as usize);
    static ref EPOCH: Instant = Instant::now();
    static ref NOW_MS: AtomicU64 = AtomicU64::new(0);
}

/// Return the current time in epoch seconds.
pub fn now() -> i64 {
    NOW.load(Ordering::Relaxed) as i64
}

/// Return the current time in epoch milliseconds, suitable for the wire
/// format's `client_timestamp_ms` field.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Return the current wall-clock time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Return a monotonic timestamp, in milliseconds since this process's
/// `EPOCH`. Used for deadlines (request timeouts, batch aging) which must
/// never be perturbed by clock adjustments.
pub fn monotonic_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// Update dory's view of time every 500ms. Time is in UTC.
pub fn update_time() {
    let dur = time::Duration::from_millis(500);
    loop {
        thread::sleep(dur);
        let now = Utc::now().timestamp() as usize;
        NOW.store(now, Ordering::Relaxed);
        NOW_MS.store(monotonic_ms(), Ordering::Relaxed);
    }
}

/// Pause a thread of execution.
///
/// This function pauses the thread of execution for a fixed number of
/// attempts. That input, attempts, is used to exponentially increase the
/// length of delay, from 0 milliseconds to 512. A delay attempt of X will
/// pause the thread of execution for:
///
/// - 0 = 0 ms
/// - x, x >= 9 = 512 ms
/// - x, x < 9 = 2**x ms
#[inline]
pub fn delay(attempts: u32) {
    let delay = match attempts {
        0 => return,
        1 => 1,
        2 => 4,
        3 => 8,
        4 => 16,
        5 => 32,
        6 => 64,
        7 => 128,
        8 => 256,
        _ => 512,
    };
    let sleep_time = time::Duration::from_millis(delay as u64);
    thread::sleep(sleep_time);
}

/// Exponential backoff with jitter, capped at `cap_ms`. Used by the metadata
/// fetcher after consecutive failures (spec section 4.F).
pub fn backoff_with_jitter(attempts: u32, base_ms: u64, cap_ms: u64) -> time::Duration {
    use rand::Rng;
    let exp = base_ms.saturating_mul(1u64 << attempts.min(20));
    let capped = exp.min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0, capped / 2 + 1);
    time::Duration::from_millis(capped / 2 + jitter)
}
