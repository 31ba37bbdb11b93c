//! Entry point: wires configuration, the message pool, cluster metadata,
//! the router, per-broker dispatchers, retry, the discard tracker, input
//! sources, and the status surface together, then blocks until
//! SIGINT/SIGTERM triggers a graceful drain (spec section 5).

extern crate dory;
#[macro_use]
extern crate log;
extern crate byteorder;
extern crate chan_signal;

use byteorder::{BigEndian, ByteOrder};
use dory::batch::{Batch, Fingerprint};
use dory::broker::Broker;
use dory::cli;
use dory::conf::{self, CompressionConf, Conf};
use dory::constants;
use dory::counters;
use dory::discard;
use dory::dispatch::receiver::RetrySignal;
use dory::dispatch::state::ConnectionState;
use dory::dispatch::{self, Dispatcher};
use dory::errors::StartupError;
use dory::kafka::protocol;
use dory::kafka::types::{Compression, MetadataResponse};
use dory::logging;
use dory::message::Message;
use dory::metadata::{self as metadata_mod, Diff, Fetcher, MetadataMap, MetadataSnapshot, PartitionMeta, TopicMeta};
use dory::pool::Pool;
use dory::retry::{self, FailureReason};
use dory::router::{Admit, Router};
use dory::shutdown::{self, wait_for_signal, Shutdown};
use dory::source::{self, Source};
use dory::status;
use dory::thread::{self as dthread, Stoppable};
use dory::util::ScopeGuard;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Produce API version we speak. v1 adds a throttle_time_ms field to the
/// response only, which `kafka::protocol` already accounts for.
const PRODUCE_API_VERSION: i16 = 1;

fn main() {
    let args = cli::parse();
    if args.daemon {
        cli::daemonize();
    }

    let conf = match conf::load(&args.config_path) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("dory: {}", e);
            ::std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&conf.logging, args.verbose) {
        eprintln!("dory: failed to initialize logging: {}", e);
        ::std::process::exit(1);
    }

    if let Err(e) = run(conf, &args) {
        error!("fatal startup error: {}", e);
        ::std::process::exit(1);
    }
}

fn run(conf: Conf, args: &cli::Args) -> Result<(), StartupError> {
    info!("dory starting up");

    let msg_buffer_max_kb = args.msg_buffer_max_kb.unwrap_or(conf.msg_buffer_max_kb);
    let pool = Pool::new(
        (msg_buffer_max_kb * 1024) as usize,
        (conf.pool_block_size_kb * 1024) as usize,
    );

    let metadata = Arc::new(MetadataMap::new());
    let discard_tracker = Arc::new(Mutex::new(discard::Tracker::new(conf.discard_reporting.capacity)));
    let shutdown = Shutdown::new(conf.msg_delivery.shutdown_max_delay_ms);

    let (admit_tx, admit_rx) = sync_channel::<Message>(8_192);
    let (discard_tx, discard_rx) = sync_channel::<(String, discard::Reason, Vec<u8>)>(8_192);
    let (retry_tx, retry_rx) = sync_channel::<RetrySignal>(1_024);

    let mut worker_handles = Vec::new();

    {
        let tracker = Arc::clone(&discard_tracker);
        let log_discards = conf.logging.log_discards;
        let flag = shutdown.flag();
        worker_handles.push(thread::spawn(move || {
            run_discard_tracker(discard_rx, tracker, log_discards, flag);
        }));
    }

    thread::spawn(watch_for_sighup);

    let registry = Arc::new(DispatcherRegistry::new(
        Arc::clone(&metadata),
        conf.compression.clone(),
        "dory".to_string(),
        PRODUCE_API_VERSION,
        conf.msg_delivery.request_timeout_ms,
        retry_tx.clone(),
    ));

    {
        let metadata = Arc::clone(&metadata);
        let fetcher = Fetcher::new(conf.initial_brokers.clone());
        let refresh_interval = Duration::from_millis(conf.msg_delivery.metadata_refresh_interval_ms);
        let registry = Arc::clone(&registry);
        let flag = shutdown.flag();
        worker_handles.push(thread::spawn(move || {
            run_metadata_refresh(metadata, fetcher, "dory".to_string(), refresh_interval, registry, flag);
        }));
    }

    {
        let admit_tx = admit_tx.clone();
        let discard_tx = discard_tx.clone();
        let discard_tracker = Arc::clone(&discard_tracker);
        let max_attempts = conf.msg_delivery.max_attempts;
        let max_retry_ms = conf.msg_delivery.max_retry_ms;
        let flag = shutdown.flag();
        worker_handles.push(thread::spawn(move || {
            run_retry(retry_rx, admit_tx, discard_tx, discard_tracker, max_attempts, max_retry_ms, flag);
        }));
    }

    {
        let router = Router::new(Arc::clone(&metadata), conf.batching.clone(), 4_096);
        let registry = Arc::clone(&registry);
        let discard_tx = discard_tx.clone();
        let discard_tracker = Arc::clone(&discard_tracker);
        let max_retry_ms = conf.msg_delivery.max_retry_ms;
        let flag = shutdown.flag();
        worker_handles.push(thread::spawn(move || {
            run_router(router, admit_rx, registry, discard_tx, discard_tracker, max_retry_ms, flag);
        }));
    }

    let mut source_handles = bind_sources(&conf, Arc::clone(&pool), admit_tx, discard_tx)?;

    let status_handler = status::StatusHandler::new(Arc::clone(&metadata), Arc::clone(&discard_tracker));
    let status_server = status::Server::bind(format!("127.0.0.1:{}", conf.http_interface.port), status_handler)
        .map_err(|source| StartupError::StatusBind {
            port: conf.http_interface.port,
            source,
        })?;

    info!("dory ready, {} bootstrap broker(s) configured", conf.initial_brokers.len());
    wait_for_signal(&shutdown);

    info!("shutting down input sources");
    while let Some(handle) = source_handles.pop() {
        handle.shutdown();
    }

    info!("waiting up to {}ms for in-flight batches to drain", conf.msg_delivery.shutdown_max_delay_ms);
    let drained = shutdown.wait_for_drain(|| registry.in_flight_count());
    if !drained {
        let remaining = registry.drain_all_in_flight();
        warn!(
            "shutdown drain deadline exceeded; moving {} in-flight batch(es) to the discard tracker",
            remaining.len()
        );
        let now = dory::time::monotonic_ms();
        let mut tracker = discard_tracker.lock().expect("discard tracker mutex poisoned");
        for batch in remaining {
            let topic = batch.fingerprint().topic.to_string();
            shutdown::discard_undrained(&mut tracker, &topic, batch.len(), now);
        }
    }

    for handle in worker_handles {
        let _ = handle.join();
    }
    status_server.shutdown();

    info!("dory stopped");
    Ok(())
}

/// Bind every input source named in `conf.input_sources`, spawning each on
/// its own mio-driven thread. Fails the whole startup if none are
/// configured or any configured one cannot bind, per spec section 5.
fn bind_sources(
    conf: &Conf,
    pool: Arc<Pool>,
    admit_tx: SyncSender<Message>,
    discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
) -> Result<Vec<dthread::ThreadHandle>, StartupError> {
    let mut handles = Vec::new();

    if let Some(ref c) = conf.input_sources.unix_dgram {
        let mut src = source::unix_dgram::UnixDgram::bind(
            &c.path,
            c.max_msg_size,
            Arc::clone(&pool),
            admit_tx.clone(),
            discard_tx.clone(),
        )
        .map_err(|source| StartupError::SourceBind {
            path: c.path.display().to_string(),
            source,
        })?;
        handles.push(dthread::spawn(move |poll| src.run(poll)));
    }

    if let Some(ref c) = conf.input_sources.unix_stream {
        let mut src = source::unix_stream::UnixStream::bind(
            &c.path,
            c.max_msg_size,
            Arc::clone(&pool),
            admit_tx.clone(),
            discard_tx.clone(),
        )
        .map_err(|source| StartupError::SourceBind {
            path: c.path.display().to_string(),
            source,
        })?;
        handles.push(dthread::spawn(move |poll| src.run(poll)));
    }

    if let Some(ref c) = conf.input_sources.tcp {
        let mut src = source::tcp::Tcp::bind(
            &c.host,
            c.port,
            c.max_msg_size,
            Arc::clone(&pool),
            admit_tx.clone(),
            discard_tx.clone(),
        )
        .map_err(|source| StartupError::SourceBind {
            path: format!("{}:{}", c.host, c.port),
            source,
        })?;
        handles.push(dthread::spawn(move |poll| src.run(poll)));
    }

    if handles.is_empty() {
        return Err(StartupError::NoInputSource);
    }

    Ok(handles)
}

/// Drains the router's sealed batches onto the right broker connection,
/// reconnecting lazily as metadata reveals new brokers.
struct DispatcherRegistry {
    handles: Mutex<HashMap<i32, DispatcherHandle>>,
    metadata: Arc<MetadataMap>,
    compression: CompressionConf,
    client_id: String,
    api_version: i16,
    request_timeout_ms: u64,
    retry_tx: SyncSender<RetrySignal>,
}

struct DispatcherHandle {
    dispatcher: Arc<Mutex<Dispatcher>>,
    batch_tx: SyncSender<Batch>,
    conn_shutdown: Arc<AtomicBool>,
}

impl DispatcherRegistry {
    fn new(
        metadata: Arc<MetadataMap>,
        compression: CompressionConf,
        client_id: String,
        api_version: i16,
        request_timeout_ms: u64,
        retry_tx: SyncSender<RetrySignal>,
    ) -> DispatcherRegistry {
        DispatcherRegistry {
            handles: Mutex::new(HashMap::new()),
            metadata,
            compression,
            client_id,
            api_version,
            request_timeout_ms,
            retry_tx,
        }
    }

    /// Hand a sealed batch to its destination broker's send queue,
    /// establishing the connection on first use.
    fn dispatch(&self, batch: Batch) {
        let broker_id = batch.fingerprint().broker_id;
        match self.get_or_connect(broker_id) {
            Some(tx) => {
                if tx.try_send(batch).is_err() {
                    warn!("dropping batch for broker {}: send queue full", broker_id);
                }
            }
            None => warn!("dropping batch for broker {}: no known address", broker_id),
        }
    }

    /// Total batches currently in flight, summed across every broker --
    /// the drain predicate graceful shutdown waits on.
    fn in_flight_count(&self) -> usize {
        let handles = self.handles.lock().expect("dispatcher registry mutex poisoned");
        handles
            .values()
            .map(|h| h.dispatcher.lock().expect("dispatcher mutex poisoned").in_flight_count())
            .sum()
    }

    fn get_or_connect(&self, broker_id: i32) -> Option<SyncSender<Batch>> {
        {
            let mut handles = self.handles.lock().expect("dispatcher registry mutex poisoned");
            if let Some(h) = handles.get(&broker_id) {
                let state = h.dispatcher.lock().expect("dispatcher mutex poisoned").state();
                if state != ConnectionState::Disconnected {
                    return Some(h.batch_tx.clone());
                }
                // The connection died underneath us (fail_connection already
                // ran in the sender/receiver thread); drop the stale entry
                // and fall through to reconnect.
                handles.remove(&broker_id);
            }
        }

        let broker = {
            let snapshot = self.metadata.snapshot();
            snapshot.brokers.get(&broker_id)?.clone()
        };

        let sender_stream = TcpStream::connect(broker.addr).ok()?;
        let receiver_stream = sender_stream.try_clone().ok()?;

        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(broker.clone())));

        // Bring-up is multi-step (state transitions, channel, two threads,
        // registry insert); if any step fails partway, this guard logs and
        // unwinds rather than leaving a half-registered broker behind.
        let rollback = ScopeGuard::new(|| {
            warn!("aborting dispatcher bring-up for broker {}", broker_id);
        });

        {
            let mut d = dispatcher.lock().expect("dispatcher mutex poisoned");
            let connecting_ok = d.transition(ConnectionState::Connecting).is_ok();
            let ready_ok = connecting_ok && d.transition(ConnectionState::Ready).is_ok();
            if !ready_ok {
                return None;
            }
        }

        let (batch_tx, batch_rx) = sync_channel::<Batch>(256);
        let conn_shutdown = Arc::new(AtomicBool::new(false));

        let compression = self.compression.clone();
        let codec_for_topic: dispatch::sender::CodecForTopic =
            Arc::new(move |topic: &str| Compression::from(compression.for_topic(topic)));

        {
            let dispatcher = Arc::clone(&dispatcher);
            let conn_shutdown = Arc::clone(&conn_shutdown);
            let client_id = self.client_id.clone();
            let api_version = self.api_version;
            let request_timeout_ms = self.request_timeout_ms;
            let retry_tx = self.retry_tx.clone();
            thread::spawn(move || {
                dispatch::sender::run(
                    dispatcher,
                    batch_rx,
                    sender_stream,
                    client_id,
                    api_version,
                    codec_for_topic,
                    request_timeout_ms,
                    retry_tx,
                    conn_shutdown,
                );
            });
        }

        {
            let dispatcher = Arc::clone(&dispatcher);
            let conn_shutdown = Arc::clone(&conn_shutdown);
            let api_version = self.api_version;
            let retry_tx = self.retry_tx.clone();
            thread::spawn(move || {
                dispatch::receiver::run(dispatcher, receiver_stream, api_version, retry_tx, conn_shutdown);
            });
        }

        let mut handles = self.handles.lock().expect("dispatcher registry mutex poisoned");
        handles.insert(
            broker_id,
            DispatcherHandle {
                dispatcher,
                batch_tx: batch_tx.clone(),
                conn_shutdown,
            },
        );
        rollback.dismiss();
        Some(batch_tx)
    }

    /// A broker dropped out of the cluster metadata (spec section 4.F,
    /// "Removed brokers -> Draining"). Stop its connection threads, pull its
    /// in-flight batches out, and hand each back to retry so it re-routes
    /// once metadata names the new owner.
    fn drain_removed_broker(&self, broker_id: i32) {
        let handle = {
            let mut handles = self.handles.lock().expect("dispatcher registry mutex poisoned");
            match handles.remove(&broker_id) {
                Some(h) => h,
                None => return,
            }
        };
        handle.conn_shutdown.store(true, Ordering::Relaxed);
        let drained = handle
            .dispatcher
            .lock()
            .expect("dispatcher mutex poisoned")
            .fail_connection();
        for batch in drained {
            let _ = self.retry_tx.try_send(RetrySignal {
                batch,
                reason: FailureReason::NotLeaderForPartition,
            });
        }
    }

    /// A partition's leader changed (spec section 4.F). Pull any batches
    /// still in flight to the old leader for this partition and either
    /// re-dispatch them to the new leader or, if none is known yet, hand
    /// them to retry to await the next metadata refresh.
    fn reroute_leadership_change(&self, topic: &str, partition: i32, old_leader: Option<i32>, new_leader: Option<i32>) {
        let old_leader = match old_leader {
            Some(id) => id,
            None => return,
        };
        let dispatcher = {
            let handles = self.handles.lock().expect("dispatcher registry mutex poisoned");
            match handles.get(&old_leader) {
                Some(h) => Arc::clone(&h.dispatcher),
                None => return,
            }
        };
        let moved = dispatcher
            .lock()
            .expect("dispatcher mutex poisoned")
            .take_in_flight_for(topic, partition);
        for batch in moved {
            match new_leader {
                Some(new_broker_id) => {
                    let fp = Fingerprint {
                        broker_id: new_broker_id,
                        topic: Arc::from(topic),
                        partition,
                    };
                    self.dispatch(rebuild_batch(fp, batch.into_messages()));
                }
                None => {
                    let _ = self.retry_tx.try_send(RetrySignal {
                        batch,
                        reason: FailureReason::LeaderNotAvailable,
                    });
                }
            }
        }
    }

    /// React to a metadata diff: drain removed brokers and re-route batches
    /// caught by a leadership change (spec section 4.F).
    fn apply_metadata_diff(&self, diff: &Diff) {
        for &broker_id in &diff.removed_brokers {
            self.drain_removed_broker(broker_id);
        }
        for &(ref topic, partition, old_leader, new_leader) in &diff.leadership_changes {
            if old_leader != new_leader {
                self.reroute_leadership_change(topic, partition, old_leader, new_leader);
            }
        }
    }

    /// Pull every dispatcher's in-flight batches out, for the shutdown
    /// drain-deadline fallback (spec section 4.J).
    fn drain_all_in_flight(&self) -> Vec<Batch> {
        let mut handles = self.handles.lock().expect("dispatcher registry mutex poisoned");
        handles
            .drain()
            .flat_map(|(_, h)| h.dispatcher.lock().expect("dispatcher mutex poisoned").fail_connection())
            .collect()
    }
}

/// Rebuild a sealed batch under a new fingerprint, e.g. after its partition
/// moved to a different leader. Mirrors `dispatch::sender`'s own
/// rebuild-for-bookkeeping helper.
fn rebuild_batch(fingerprint: Fingerprint, messages: Vec<Message>) -> Batch {
    let mut batch = Batch::open(fingerprint, dory::time::monotonic_ms());
    for m in messages {
        batch.push(m);
    }
    batch.seal();
    batch
}

/// The router's own thread: admits messages off `admit_rx`, forwarding
/// sealed batches to `registry` and discards to `discard_tx`, ticking on a
/// fixed cadence to age out lingering batches and parked messages.
fn run_router(
    mut router: Router,
    admit_rx: Receiver<Message>,
    registry: Arc<DispatcherRegistry>,
    discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
    discard_tracker: Arc<Mutex<discard::Tracker>>,
    max_retry_ms: u64,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match admit_rx.recv_timeout(Duration::from_millis(constants::ROUTER_TICK_MS)) {
            Ok(message) => match router.admit(message, dory::time::monotonic_ms()) {
                Admit::Sealed(batch) => registry.dispatch(batch),
                Admit::Appended | Admit::Parked => {}
                Admit::Discarded(reason, msg) => send_discard(&discard_tx, &msg, reason),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = dory::time::monotonic_ms();
        let outcome = router.tick(now, max_retry_ms);
        for batch in outcome.sealed {
            registry.dispatch(batch);
        }
        for (reason, msg) in outcome.discarded {
            send_discard(&discard_tx, &msg, reason);
        }
    }

    // Shutdown was requested; anything still sitting on the admit queue
    // never reached a dispatcher and is recorded as an undrained discard
    // rather than silently dropped (spec section 4.J).
    let now = dory::time::monotonic_ms();
    let mut tracker = discard_tracker.lock().expect("discard tracker mutex poisoned");
    while let Ok(message) = admit_rx.try_recv() {
        shutdown::discard_undrained(&mut tracker, message.topic(), 1, now);
    }
}

fn send_discard(discard_tx: &SyncSender<(String, discard::Reason, Vec<u8>)>, msg: &Message, reason: discard::Reason) {
    let _ = discard_tx.try_send((msg.topic().to_string(), reason, msg.value().to_vec()));
}

/// Applies retry/rerouter policy to every message of a failed batch,
/// feeding survivors back into `admit_tx` (immediately for a metadata
/// wait, after a backoff for a transient failure) and the rest to
/// `discard_tx`.
fn run_retry(
    retry_rx: Receiver<RetrySignal>,
    admit_tx: SyncSender<Message>,
    discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
    discard_tracker: Arc<Mutex<discard::Tracker>>,
    max_attempts: u32,
    max_retry_ms: u64,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let signal = match retry_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(s) => s,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        for mut message in signal.batch.into_messages() {
            let attempt_count = message.attempt_count();
            message.record_attempt();

            match retry::decide(signal.reason, attempt_count, max_attempts, 0, max_retry_ms) {
                retry::Decision::AwaitMetadataRefresh => {
                    counters::record_retried(1);
                    let _ = admit_tx.try_send(message);
                }
                retry::Decision::Requeue { backoff } => {
                    counters::record_retried(1);
                    let tx = admit_tx.clone();
                    thread::spawn(move || {
                        thread::sleep(backoff);
                        let _ = tx.try_send(message);
                    });
                }
                retry::Decision::Discard(reason) => send_discard(&discard_tx, &message, reason),
            }
        }
    }

    // Shutdown was requested; anything still awaiting a retry decision is
    // recorded as an undrained discard rather than silently dropped (spec
    // section 4.J).
    let now = dory::time::monotonic_ms();
    let mut tracker = discard_tracker.lock().expect("discard tracker mutex poisoned");
    while let Ok(signal) = retry_rx.try_recv() {
        let topic = signal.batch.fingerprint().topic.to_string();
        shutdown::discard_undrained(&mut tracker, &topic, signal.batch.len(), now);
    }
}

/// Drains discard events onto the shared tracker, optionally echoing each
/// one to the log (`logging.log_discards`).
fn run_discard_tracker(
    discard_rx: Receiver<(String, discard::Reason, Vec<u8>)>,
    tracker: Arc<Mutex<discard::Tracker>>,
    log_discards: bool,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match discard_rx.recv_timeout(Duration::from_millis(200)) {
            Ok((topic, reason, sample)) => {
                if log_discards {
                    debug!("discarding message on topic {}: {:?}", topic, reason);
                }
                let now = dory::time::monotonic_ms();
                tracker
                    .lock()
                    .expect("discard tracker mutex poisoned")
                    .record(&topic, reason, now, &sample);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Periodically fetches cluster metadata from the current bootstrap
/// target, publishing a fresh snapshot on success and rotating to the next
/// bootstrap broker (with backoff) on failure (spec section 4.F).
fn run_metadata_refresh(
    metadata: Arc<MetadataMap>,
    mut fetcher: Fetcher,
    client_id: String,
    refresh_interval: Duration,
    registry: Arc<DispatcherRegistry>,
    shutdown: Arc<AtomicBool>,
) {
    let mut correlation_id: i32 = 0;
    let mut generation: u64 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let target = fetcher.current_target().to_string();
        match fetch_metadata(&target, &client_id, correlation_id) {
            Ok(response) => {
                fetcher.record_success();
                correlation_id = correlation_id.wrapping_add(1);
                generation += 1;

                let snapshot = build_snapshot(&response, generation);
                let old = metadata.snapshot();
                let diff = metadata_mod::diff(&old, &snapshot);
                if !diff.added_brokers.is_empty() || !diff.removed_brokers.is_empty() || !diff.leadership_changes.is_empty() {
                    debug!(
                        "metadata refresh: {} broker(s) added, {} removed, {} leadership change(s)",
                        diff.added_brokers.len(),
                        diff.removed_brokers.len(),
                        diff.leadership_changes.len()
                    );
                }
                metadata.publish(Arc::new(snapshot));
                registry.apply_metadata_diff(&diff);
                sleep_in_chunks(refresh_interval, &shutdown);
            }
            Err(e) => {
                warn!("metadata refresh against {} failed: {}", target, e);
                let backoff = fetcher.record_failure();
                sleep_in_chunks(backoff, &shutdown);
            }
        }
    }
}

/// Sleep `total`, checking `shutdown` every 200ms so a long refresh
/// interval or backoff doesn't delay process exit.
fn sleep_in_chunks(total: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(200);
    let mut elapsed = Duration::from_millis(0);
    while elapsed < total {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(step.min(total - elapsed));
        elapsed += step;
    }
}

fn fetch_metadata(target: &str, client_id: &str, correlation_id: i32) -> io::Result<MetadataResponse> {
    let mut stream = TcpStream::connect(target)?;
    stream.set_read_timeout(Some(Duration::from_millis(5_000)))?;
    stream.set_write_timeout(Some(Duration::from_millis(5_000)))?;

    let request = protocol::encode_metadata_request(correlation_id, client_id, &[]);
    stream.write_all(&request)?;

    let framed = read_length_prefixed_frame(&mut stream)?;
    let (body, _rest) = protocol::split_frame(&framed).map_err(to_io_error)?;
    protocol::decode_metadata_response(body).map_err(to_io_error)
}

fn read_length_prefixed_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
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

fn to_io_error(e: dory::errors::KafkaProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Build a `MetadataSnapshot` from a decoded wire response. Unresolvable
/// broker addresses are logged and dropped rather than failing the whole
/// refresh.
fn build_snapshot(response: &MetadataResponse, generation: u64) -> MetadataSnapshot {
    let mut brokers = HashMap::new();
    for b in &response.brokers {
        let host_port = format!("{}:{}", b.host, b.port);
        let addr = match host_port.to_socket_addrs().ok().and_then(|mut it| it.next()) {
            Some(addr) => addr,
            None => {
                warn!("unable to resolve broker address {}", host_port);
                continue;
            }
        };
        brokers.insert(b.node_id, Broker::new(b.node_id, addr, b.host.clone(), b.port as u16));
    }

    let now = dory::time::monotonic_ms();
    let mut topics = HashMap::new();
    for t in &response.topics {
        let mut partitions = HashMap::new();
        for p in &t.partitions {
            partitions.insert(
                p.partition_id,
                PartitionMeta {
                    leader_broker_id: p.leader,
                    generation,
                },
            );
        }
        topics.insert(
            t.topic.clone(),
            TopicMeta {
                partitions,
                error_code: if t.error_code == 0 { None } else { Some(t.error_code) },
                last_refresh_ms: now,
            },
        );
    }

    MetadataSnapshot {
        topics,
        brokers,
        fetched_at_ms: now,
    }
}

/// Reopen the log file on SIGHUP, for rotation tools that rename it out
/// from under the process (see `logging::reopen`).
fn watch_for_sighup() {
    let hup = chan_signal::notify(&[chan_signal::Signal::HUP]);
    loop {
        hup.recv();
        logging::reopen();
    }
}
