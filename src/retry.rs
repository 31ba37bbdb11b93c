//! Retry / rerouter policy (spec section 4.G).
//!
//! Takes a failed batch's reason and the message's attempt history and
//! decides what happens next. Backoff is computed per-message (not
//! per-batch): retried messages are expected to coalesce into whatever
//! fresh batch the router is building when their backoff expires.

use discard;
use std::time::Duration;

/// Why a batch (or one of its messages) failed to deliver, as reported by
/// the dispatcher after reading a Produce response or hitting a transport
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Broker reports it is no longer leader for the partition.
    NotLeaderForPartition,
    /// Broker reports the partition currently has no leader.
    LeaderNotAvailable,
    /// Broker rejects the message as corrupt (failed CRC check, say).
    CorruptMessage,
    /// Broker rejects the message for exceeding its configured max size.
    MessageSizeTooLarge,
    /// The in-flight deadline for this batch expired.
    RequestTimedOut,
    /// A transient network error (connection reset, broken pipe, ...).
    TransientNetworkError,
    /// Any other broker-reported error code.
    BrokerError(i16),
}

/// What the retry/rerouter decided to do with a failed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Request (or wait for) a metadata refresh, holding the message until
    /// refresh completes or `held_for_ms` exceeds `max_retry_ms`.
    AwaitMetadataRefresh,
    /// Re-enqueue for a fresh routing decision after `backoff` passes.
    Requeue {
        /// How long to wait before the message may be re-routed.
        backoff: Duration,
    },
    /// Give up and hand the message to the discard tracker.
    Discard(discard::Reason),
}

/// Decide the fate of one failed message.
///
/// `attempt_count` is the message's attempt count *before* this failure is
/// accounted for; `held_for_ms` is how long it has already been parked
/// awaiting metadata (zero the first time a `NotLeaderForPartition`/
/// `LeaderNotAvailable` failure is seen).
pub fn decide(
    reason: FailureReason,
    attempt_count: u32,
    max_attempts: u32,
    held_for_ms: u64,
    max_retry_ms: u64,
) -> Decision {
    match reason {
        FailureReason::CorruptMessage => Decision::Discard(discard::Reason::Malformed),
        FailureReason::MessageSizeTooLarge => Decision::Discard(discard::Reason::TooLarge),

        FailureReason::NotLeaderForPartition | FailureReason::LeaderNotAvailable => {
            if held_for_ms >= max_retry_ms {
                Decision::Discard(discard::Reason::NoLeader)
            } else {
                Decision::AwaitMetadataRefresh
            }
        }

        FailureReason::RequestTimedOut | FailureReason::TransientNetworkError => {
            if attempt_count + 1 >= max_attempts {
                let terminal_reason = if reason == FailureReason::RequestTimedOut {
                    discard::Reason::SendTimeout
                } else {
                    discard::Reason::BrokerRejected(-1)
                };
                Decision::Discard(terminal_reason)
            } else {
                Decision::Requeue {
                    backoff: ::time::backoff_with_jitter(attempt_count, 50, 10_000),
                }
            }
        }

        FailureReason::BrokerError(code) => {
            if attempt_count + 1 >= max_attempts {
                Decision::Discard(discard::Reason::BrokerRejected(code))
            } else {
                Decision::Requeue {
                    backoff: ::time::backoff_with_jitter(attempt_count, 50, 10_000),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_message_discards_immediately_regardless_of_attempts() {
        let decision = decide(FailureReason::CorruptMessage, 0, 8, 0, 30_000);
        assert_eq!(decision, Decision::Discard(discard::Reason::Malformed));
    }

    #[test]
    fn no_leader_awaits_refresh_until_deadline() {
        let decision = decide(FailureReason::NotLeaderForPartition, 0, 8, 100, 30_000);
        assert_eq!(decision, Decision::AwaitMetadataRefresh);

        let expired = decide(FailureReason::NotLeaderForPartition, 0, 8, 30_000, 30_000);
        assert_eq!(expired, Decision::Discard(discard::Reason::NoLeader));
    }

    #[test]
    fn transient_errors_requeue_until_attempts_exhausted() {
        let decision = decide(FailureReason::RequestTimedOut, 0, 3, 0, 30_000);
        assert!(if let Decision::Requeue { .. } = decision { true } else { false });

        let exhausted = decide(FailureReason::RequestTimedOut, 2, 3, 0, 30_000);
        assert_eq!(exhausted, Decision::Discard(discard::Reason::SendTimeout));
    }

    #[test]
    fn broker_error_discards_with_code_once_attempts_exhausted() {
        let decision = decide(FailureReason::BrokerError(7), 7, 8, 0, 30_000);
        assert_eq!(decision, Decision::Discard(discard::Reason::BrokerRejected(7)));
    }
}
