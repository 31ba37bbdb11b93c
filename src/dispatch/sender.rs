//! The per-broker sender task: pops sealed batches FIFO, serializes a
//! Produce request per flush, and writes it to the broker socket.
//!
//! `run` is the thread body, structured the way the teacher's
//! `source/tcp.rs` owns a connection for the life of a thread; it is not
//! itself unit tested (it needs a live socket), but the pure framing logic
//! it calls into -- `batch_to_wire` -- is.

use batch::Batch;
use dispatch::receiver::RetrySignal;
use dispatch::state::ConnectionState;
use dispatch::Dispatcher;
use kafka::protocol;
use kafka::types::{Compression, KafkaMessage};
use message::Message;
use retry::FailureReason;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Convert one sealed batch's messages into the `(topic, partition,
/// messages)` shape `kafka::protocol::encode_produce_request` expects.
/// Borrows the batch so the caller can still consume it afterwards to keep
/// it parked in the dispatcher's in-flight table.
pub fn batch_to_wire(batch: &Batch, _codec: Compression) -> (String, i32, Vec<KafkaMessage>) {
    let fp = batch.fingerprint().clone();
    let messages = messages_to_kafka(batch.messages());
    (fp.topic.to_string(), fp.partition, messages)
}

fn messages_to_kafka(messages: &[Message]) -> Vec<KafkaMessage> {
    messages
        .iter()
        .map(|m| KafkaMessage {
            key: m.partition_key().map(|k| k.to_vec()),
            value: m.value().to_vec(),
        })
        .collect()
}

/// Resolve the compression codec configured for a topic. Kept as a
/// closure type so `run` doesn't need to depend on `conf` directly.
pub type CodecForTopic = Arc<dyn Fn(&str) -> Compression + Send + Sync>;

/// Drive the sender side of one broker's connection until shutdown.
/// Batches are popped from `queue`; each flush becomes one Produce
/// request written to `stream`. `request_timeout_ms` seeds the deadline
/// `dispatch::Dispatcher::begin_send` records; this loop is also the one
/// that sweeps that deadline heap, since it already wakes on a short
/// `recv_timeout` cadence.
pub fn run(
    dispatcher: Arc<Mutex<Dispatcher>>,
    queue: Receiver<Batch>,
    mut stream: TcpStream,
    client_id: String,
    api_version: i16,
    codec_for_topic: CodecForTopic,
    request_timeout_ms: u64,
    retry_tx: SyncSender<RetrySignal>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        sweep_expired(&dispatcher, &retry_tx);

        let batch = match queue.recv_timeout(Duration::from_millis(100)) {
            Ok(batch) => batch,
            Err(_) => continue,
        };

        let fingerprint = batch.fingerprint().clone();
        let codec = codec_for_topic(&fingerprint.topic);
        let (topic, partition, kafka_messages) = batch_to_wire(&batch, codec);
        // Re-open a batch purely to preserve it in the dispatcher's
        // in-flight table until acked or timed out.
        let rebuilt = rebuild_batch(fingerprint.clone(), batch.into_messages());

        let now_ms = ::time::monotonic_ms();
        let correlation_id = {
            let mut d = dispatcher.lock().expect("dispatcher mutex poisoned");
            if d.state() == ConnectionState::Draining {
                // Dropped on the floor here; in production wiring this
                // batch's messages are instead handed back to the router
                // before reaching this queue (spec section 4.E).
                continue;
            }
            d.begin_send(rebuilt, now_ms, request_timeout_ms)
        };

        let request = match protocol::encode_produce_request(
            api_version,
            correlation_id,
            &client_id,
            1,
            request_timeout_ms as i32,
            &[(topic, vec![(partition, codec, kafka_messages)])],
        ) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };

        if let Err(e) = write_all_or_suspend(&mut stream, &request, &shutdown) {
            warn!("dispatcher send to broker {} failed: {}", fingerprint.broker_id, e);
            let failed = dispatcher.lock().expect("dispatcher mutex poisoned").fail_connection();
            for batch in failed {
                let _ = retry_tx.try_send(RetrySignal {
                    batch,
                    reason: FailureReason::TransientNetworkError,
                });
            }
            break;
        }
    }
}

/// Pop every batch whose request-timeout deadline has passed and hand it
/// to retry as `RequestTimedOut`, rather than waiting on a response that
/// will never come (spec section 4.E, "Timeouts").
fn sweep_expired(dispatcher: &Arc<Mutex<Dispatcher>>, retry_tx: &SyncSender<RetrySignal>) {
    let now_ms = ::time::monotonic_ms();
    let expired = dispatcher.lock().expect("dispatcher mutex poisoned").pop_expired(now_ms);
    for batch in expired {
        let _ = retry_tx.try_send(RetrySignal {
            batch,
            reason: FailureReason::RequestTimedOut,
        });
    }
}

fn rebuild_batch(fingerprint: ::batch::Fingerprint, messages: Vec<Message>) -> Batch {
    let mut batch = Batch::open(fingerprint, ::time::monotonic_ms());
    for m in messages {
        batch.push(m);
    }
    batch.seal();
    batch
}

/// Write `buf` in full, retrying on `WouldBlock` (the sender is a
/// cooperative task: it suspends rather than drops when the send buffer
/// fills) until shutdown is requested.
fn write_all_or_suspend(stream: &mut TcpStream, buf: &[u8], shutdown: &AtomicBool) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        if shutdown.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "shutdown requested"));
        }
        match stream.write(&buf[written..]) {
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use message::MessageKind;
    use pool::Pool;
    use std::sync::Arc as StdArc;

    #[test]
    fn messages_to_kafka_carries_value_and_key() {
        let pool = Pool::new(4096, 1024);
        let mut block = pool.try_acquire(3).unwrap();
        block.copy_from(b"abc");
        let msg = Message::new(StdArc::from("t"), Some(b"k".to_vec().into_boxed_slice()), block, 0, 0, MessageKind::PartitionKey(1));
        let kafka_msgs = messages_to_kafka(&[msg]);
        assert_eq!(kafka_msgs[0].value, b"abc");
        assert_eq!(kafka_msgs[0].key, Some(b"k".to_vec()));
    }

    #[test]
    fn batch_to_wire_uses_batch_fingerprint() {
        let fp = ::batch::Fingerprint {
            broker_id: 0,
            topic: StdArc::from("t"),
            partition: 3,
        };
        let batch = Batch::open(fp, 0);
        let (topic, partition, _messages) = batch_to_wire(&batch, Compression::None);
        assert_eq!(topic, "t");
        assert_eq!(partition, 3);
    }
}
