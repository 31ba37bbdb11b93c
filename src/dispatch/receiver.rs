//! The per-broker receiver task: reads framed Produce responses, matches
//! correlation_id, and dispatches per-partition outcomes to retry.

use batch::Batch;
use byteorder::{BigEndian, ByteOrder};
use counters;
use dispatch::Dispatcher;
use kafka::protocol;
use kafka::types::ProduceResponse;
use retry::FailureReason;
use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

/// One partition's produce outcome, handed to the retry/rerouter or
/// treated as an ack by the caller.
pub enum Outcome {
    /// The broker accepted the batch.
    Acked,
    /// The broker rejected it; `reason` selects the retry policy.
    Failed(FailureReason),
}

/// Map a Kafka error code (as would appear in a Produce response) to a
/// `retry::FailureReason`. Pure and thus directly testable, unlike the
/// socket loop around it.
pub fn classify_error_code(code: i16) -> Outcome {
    match code {
        0 => Outcome::Acked,
        6 => Outcome::Failed(FailureReason::NotLeaderForPartition),
        5 => Outcome::Failed(FailureReason::LeaderNotAvailable),
        2 => Outcome::Failed(FailureReason::CorruptMessage),
        10 => Outcome::Failed(FailureReason::MessageSizeTooLarge),
        7 => Outcome::Failed(FailureReason::RequestTimedOut),
        other => Outcome::Failed(FailureReason::BrokerError(other)),
    }
}

/// A failed batch pulled out of in-flight bookkeeping, queued for the
/// retry/rerouter to act on. Carries the batch itself (not just its
/// correlation id) because the receiver is the only place already holding
/// the dispatcher lock needed to pull it out of `in_flight`.
pub struct RetrySignal {
    /// The batch the broker rejected or that otherwise failed.
    pub batch: Batch,
    /// Why it needs rerouting.
    pub reason: FailureReason,
}

/// Read one length-prefixed response frame from `stream` into an owned
/// buffer. Blocks until a full frame is available or the socket closes.
fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = BigEndian::read_i32(&len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    let mut framed = Vec::with_capacity(4 + len);
    framed.extend_from_slice(&len_buf);
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Drive the receiver side of one broker's connection until the socket
/// closes or shutdown is requested. Every decoded partition ack is either
/// completed against `dispatcher` or forwarded on `retry_tx`.
pub fn run(
    dispatcher: Arc<Mutex<Dispatcher>>,
    mut stream: TcpStream,
    api_version: i16,
    retry_tx: SyncSender<RetrySignal>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let framed = match read_frame(&mut stream) {
            Ok(f) => f,
            Err(_) => {
                let failed = dispatcher.lock().expect("dispatcher mutex poisoned").fail_connection();
                for batch in failed {
                    let _ = retry_tx.try_send(RetrySignal {
                        batch,
                        reason: FailureReason::TransientNetworkError,
                    });
                }
                break;
            }
        };
        let (body, _rest) = match protocol::split_frame(&framed) {
            Ok(parts) => parts,
            Err(_) => continue,
        };
        let response: ProduceResponse = match protocol::decode_produce_response(body, api_version) {
            Ok(r) => r,
            Err(_) => continue,
        };

        // All partitions in one Produce request share a single correlation
        // id and thus a single in-flight batch; the first non-success code
        // decides the batch's fate, matching the one-batch-per-request
        // wiring in `dispatch::sender`.
        let outcome = response
            .topics
            .iter()
            .flat_map(|t| &t.partitions)
            .map(|p| classify_error_code(p.error_code))
            .find(|o| if let Outcome::Failed(_) = o { true } else { false });

        let mut d = dispatcher.lock().expect("dispatcher mutex poisoned");
        match outcome {
            Some(Outcome::Failed(reason)) => {
                if let Some(batch) = d.complete(response.correlation_id) {
                    let _ = retry_tx.try_send(RetrySignal { batch, reason });
                }
            }
            _ => {
                if let Some(batch) = d.complete(response.correlation_id) {
                    counters::record_acked(batch.len() as u64);
                }
            }
        }
    }
}
