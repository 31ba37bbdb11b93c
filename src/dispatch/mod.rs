//! Per-broker dispatcher (spec section 4.E): one connection state machine
//! plus the in-flight correlation_id -> batch bookkeeping shared between
//! the sender and receiver tasks.
//!
//! The actual socket I/O loops (`sender::run`, `receiver::run`) are thin
//! wrappers around this bookkeeping, grounded in the teacher's per-
//! connection thread pattern (`source/tcp.rs`); what's unit-tested here is
//! the state machine and deadline accounting, which is where the real
//! bugs would hide.

pub mod receiver;
pub mod sender;
pub mod state;

use batch::Batch;
use broker::Broker;
use dispatch::state::{is_valid_transition, ConnectionState};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

struct InFlight {
    batch: Batch,
    deadline_ms: u64,
}

/// An error raised when code attempts an illegal connection-state
/// transition. Always an internal invariant violation (spec section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    /// The state the dispatcher was in.
    pub from: ConnectionState,
    /// The state that was requested.
    pub to: ConnectionState,
}

/// Owns one broker's connection state and in-flight batch bookkeeping.
pub struct Dispatcher {
    broker: Broker,
    state: ConnectionState,
    next_correlation_id: i32,
    in_flight: HashMap<i32, InFlight>,
    deadlines: BinaryHeap<Reverse<(u64, i32)>>,
}

impl Dispatcher {
    /// Build a dispatcher for `broker`, starting `Disconnected`.
    pub fn new(broker: Broker) -> Dispatcher {
        Dispatcher {
            broker,
            state: ConnectionState::Disconnected,
            next_correlation_id: 0,
            in_flight: HashMap::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    /// The broker this dispatcher owns a connection to.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempt to move to `to`. Fails if the transition isn't legal from
    /// the current state (spec section 4.E's transition table).
    pub fn transition(&mut self, to: ConnectionState) -> Result<(), IllegalTransition> {
        if !is_valid_transition(self.state, to) {
            return Err(IllegalTransition { from: self.state, to });
        }
        if to == ConnectionState::Disconnected {
            self.broker.next_generation();
        }
        self.state = to;
        Ok(())
    }

    /// True while sealed batches may be handed to this dispatcher. Batches
    /// arriving while `Draining`/`Disconnected` belong to the
    /// retry/rerouter instead (spec section 4.E).
    pub fn accepts_batches(&self) -> bool {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Connecting | ConnectionState::Ready => true,
            ConnectionState::Draining => false,
        }
    }

    /// Record `batch` as sent, assigning it a fresh correlation id and a
    /// deadline of `now_ms + request_timeout_ms`. Returns the assigned
    /// correlation id for the sender to put on the wire.
    pub fn begin_send(&mut self, batch: Batch, now_ms: u64, request_timeout_ms: u64) -> i32 {
        let correlation_id = self.next_correlation_id;
        self.next_correlation_id = self.next_correlation_id.wrapping_add(1);
        let deadline_ms = now_ms + request_timeout_ms;
        self.in_flight.insert(correlation_id, InFlight { batch, deadline_ms });
        self.deadlines.push(Reverse((deadline_ms, correlation_id)));
        correlation_id
    }

    /// Number of batches currently awaiting an ack or timeout.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolve `correlation_id` as acked, returning its batch. `None` if
    /// the id is unknown (already timed out, or a stale/duplicate ack --
    /// spec section 7 treats an unknown correlation_id as an invariant
    /// violation at the call site, not here).
    pub fn complete(&mut self, correlation_id: i32) -> Option<Batch> {
        self.in_flight.remove(&correlation_id).map(|f| f.batch)
    }

    /// Pop every in-flight batch whose deadline has passed as of `now_ms`.
    /// The sender's min-heap-by-deadline (spec section 4.E).
    pub fn pop_expired(&mut self, now_ms: u64) -> Vec<Batch> {
        let mut expired = Vec::new();
        while let Some(&Reverse((deadline_ms, correlation_id))) = self.deadlines.peek() {
            if deadline_ms > now_ms {
                break;
            }
            self.deadlines.pop();
            if let Some(f) = self.in_flight.remove(&correlation_id) {
                expired.push(f.batch);
            }
            // else: already completed normally; a stale heap entry, skip.
        }
        expired
    }

    /// True once `Draining` has no more in-flight batches to wait for --
    /// the point at which the dispatcher can close its socket and move to
    /// `Disconnected`.
    pub fn drained(&self) -> bool {
        self.state == ConnectionState::Draining && self.in_flight.is_empty()
    }

    /// The connection itself died (write/read error, EOF). No further acks
    /// can arrive, so every in-flight batch is pulled out immediately
    /// rather than waiting on its deadline, and the dispatcher is driven
    /// straight through `Draining` to `Disconnected` (bumping the
    /// generation) so the registry reconnects on the next send. Safe to
    /// call from both the sender and receiver threads: idempotent once the
    /// dispatcher is already `Disconnected`.
    pub fn fail_connection(&mut self) -> Vec<Batch> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        if self.state != ConnectionState::Draining {
            let _ = self.transition(ConnectionState::Draining);
        }
        let drained: Vec<Batch> = self.in_flight.drain().map(|(_, f)| f.batch).collect();
        self.deadlines.clear();
        let _ = self.transition(ConnectionState::Disconnected);
        drained
    }

    /// Pull every in-flight batch destined for `(topic, partition)` out of
    /// this dispatcher, for hand-off to the new leader after a metadata
    /// refresh reports the partition moved (spec section 4.F). Leaves
    /// batches for the dispatcher's other partitions untouched.
    pub fn take_in_flight_for(&mut self, topic: &str, partition: i32) -> Vec<Batch> {
        let matching: Vec<i32> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.batch.fingerprint().topic.as_ref() == topic && f.batch.fingerprint().partition == partition)
            .map(|(cid, _)| *cid)
            .collect();
        matching
            .into_iter()
            .filter_map(|cid| self.in_flight.remove(&cid).map(|f| f.batch))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch::Fingerprint;
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        let addr: SocketAddr = "127.0.0.1:9092".parse().unwrap();
        Dispatcher::new(Broker::new(0, addr, "127.0.0.1".into(), 9092))
    }

    fn empty_batch() -> Batch {
        Batch::open(
            Fingerprint {
                broker_id: 0,
                topic: Arc::from("t"),
                partition: 0,
            },
            0,
        )
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut d = dispatcher();
        assert!(d.transition(ConnectionState::Ready).is_err());
        assert_eq!(d.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn generation_bumps_on_return_to_disconnected() {
        let mut d = dispatcher();
        d.transition(ConnectionState::Connecting).unwrap();
        d.transition(ConnectionState::Ready).unwrap();
        d.transition(ConnectionState::Draining).unwrap();
        assert_eq!(d.broker().generation, 0);
        d.transition(ConnectionState::Disconnected).unwrap();
        assert_eq!(d.broker().generation, 1);
    }

    #[test]
    fn expired_batches_are_evicted_from_in_flight() {
        let mut d = dispatcher();
        let cid = d.begin_send(empty_batch(), 0, 100);
        assert_eq!(d.in_flight_count(), 1);

        let expired = d.pop_expired(50);
        assert!(expired.is_empty());
        assert_eq!(d.in_flight_count(), 1);

        let expired = d.pop_expired(200);
        assert_eq!(expired.len(), 1);
        assert_eq!(d.in_flight_count(), 0);
        assert!(d.complete(cid).is_none());
    }

    #[test]
    fn completed_batches_are_not_also_expired() {
        let mut d = dispatcher();
        let cid = d.begin_send(empty_batch(), 0, 100);
        assert!(d.complete(cid).is_some());
        let expired = d.pop_expired(1_000);
        assert!(expired.is_empty());
    }

    #[test]
    fn draining_refuses_new_batches_but_ready_accepts() {
        let mut d = dispatcher();
        assert!(d.accepts_batches());
        d.transition(ConnectionState::Connecting).unwrap();
        d.transition(ConnectionState::Ready).unwrap();
        assert!(d.accepts_batches());
        d.transition(ConnectionState::Draining).unwrap();
        assert!(!d.accepts_batches());
    }

    #[test]
    fn drained_true_only_once_in_flight_is_empty() {
        let mut d = dispatcher();
        d.transition(ConnectionState::Connecting).unwrap();
        d.transition(ConnectionState::Ready).unwrap();
        let cid = d.begin_send(empty_batch(), 0, 100);
        d.transition(ConnectionState::Draining).unwrap();
        assert!(!d.drained());
        d.complete(cid);
        assert!(d.drained());
    }

    #[test]
    fn fail_connection_drains_in_flight_and_disconnects() {
        let mut d = dispatcher();
        d.transition(ConnectionState::Connecting).unwrap();
        d.transition(ConnectionState::Ready).unwrap();
        d.begin_send(empty_batch(), 0, 100);
        assert_eq!(d.in_flight_count(), 1);

        let drained = d.fail_connection();
        assert_eq!(drained.len(), 1);
        assert_eq!(d.in_flight_count(), 0);
        assert_eq!(d.state(), ConnectionState::Disconnected);
        assert_eq!(d.broker().generation, 1);
    }

    #[test]
    fn fail_connection_is_idempotent_once_disconnected() {
        let mut d = dispatcher();
        d.transition(ConnectionState::Connecting).unwrap();
        d.transition(ConnectionState::Ready).unwrap();
        assert!(d.fail_connection().is_empty());
        assert_eq!(d.fail_connection().len(), 0);
        assert_eq!(d.broker().generation, 1);
    }

    #[test]
    fn take_in_flight_for_only_pulls_matching_partition() {
        let mut d = dispatcher();
        let fp_a = Fingerprint {
            broker_id: 0,
            topic: Arc::from("t"),
            partition: 0,
        };
        let fp_b = Fingerprint {
            broker_id: 0,
            topic: Arc::from("t"),
            partition: 1,
        };
        d.begin_send(Batch::open(fp_a, 0), 0, 100);
        d.begin_send(Batch::open(fp_b, 0), 0, 100);
        assert_eq!(d.in_flight_count(), 2);

        let moved = d.take_in_flight_for("t", 0);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].fingerprint().partition, 0);
        assert_eq!(d.in_flight_count(), 1);
    }
}
