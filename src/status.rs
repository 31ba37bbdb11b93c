//! Status/admin HTTP surface (spec section 7): read-only introspection plus
//! one mutating endpoint to reset the discard report.
//!
//! Grounded in the teacher's `http.rs` `Handler`/`Server` split over
//! `tiny_http`, generalized from a single-purpose handler into a router
//! over a handful of fixed paths.

use counters;
use discard;
use metadata::MetadataMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thread as dory_thread;

/// HTTP response, matching `tiny_http::Response`'s expected body type.
pub type Response = tiny_http::Response<Cursor<Vec<u8>>>;

/// Handles one HTTP request against a fixed set of status paths.
pub trait Handler: Sync + Send {
    /// Produce a response for `request`.
    fn handle(&self, request: tiny_http::Request);
}

/// The status surface's routes, backed by shared process state. Cloneable:
/// every field is already behind `Arc`/shared synchronization.
#[derive(Clone)]
pub struct StatusHandler {
    version: &'static str,
    metadata: Arc<MetadataMap>,
    discards: Arc<Mutex<discard::Tracker>>,
}

impl StatusHandler {
    /// Build a handler over the given shared metadata map and discard
    /// tracker.
    pub fn new(metadata: Arc<MetadataMap>, discards: Arc<Mutex<discard::Tracker>>) -> StatusHandler {
        StatusHandler {
            version: env!("CARGO_PKG_VERSION"),
            metadata,
            discards,
        }
    }

    fn route(&self, method: &tiny_http::Method, url: &str) -> (tiny_http::StatusCode, String) {
        use tiny_http::Method;
        match (method, url) {
            (Method::Get, "/sys/version") => (200.into(), json!({ "version": self.version }).to_string()),
            (Method::Get, "/sys/counters") => {
                let cumulative = counters::snapshot();
                let discards_by_reason = discard::global_counters();
                let discarded: u64 = discards_by_reason.values().sum();
                (
                    200.into(),
                    json!({
                        "admitted": cumulative["admitted"],
                        "acked": cumulative["acked"],
                        "retried": cumulative["retried"],
                        "discarded": discarded,
                        "discards_by_reason": discards_by_reason,
                    })
                    .to_string(),
                )
            }
            (Method::Get, "/sys/discards") => {
                let report = self.discards.lock().expect("discard tracker mutex poisoned").report();
                let entries: Vec<_> = report
                    .iter()
                    .map(|e| {
                        json!({
                            "topic": e.topic,
                            "reason": format!("{:?}", e.reason),
                            "count": e.count,
                            "first_seen_ms": e.first_seen_ms,
                            "last_seen_ms": e.last_seen_ms,
                        })
                    })
                    .collect();
                (200.into(), json!({ "entries": entries }).to_string())
            }
            (Method::Post, "/sys/discards/reset") => {
                self.discards.lock().expect("discard tracker mutex poisoned").reset();
                (200.into(), json!({ "ok": true }).to_string())
            }
            (Method::Get, "/sys/metadata") => {
                let snapshot = self.metadata.snapshot();
                let topics: Vec<_> = snapshot
                    .topics
                    .keys()
                    .cloned()
                    .collect();
                (200.into(), json!({ "topics": topics, "broker_count": snapshot.brokers.len() }).to_string())
            }
            _ => (404.into(), json!({ "error": "not found" }).to_string()),
        }
    }
}

impl Handler for StatusHandler {
    fn handle(&self, request: tiny_http::Request) {
        let (status, body) = self.route(request.method(), request.url());
        let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
            .expect("static header is valid");
        let response = tiny_http::Response::from_string(body)
            .with_status_code(status)
            .with_header(header);
        let _ = request.respond(response);
    }
}

/// A running status server, paired with the thread serving it.
pub struct Server {
    thread: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind `host:port` and serve `handler` until `shutdown` fires.
    pub fn bind<H: Handler + 'static>(host_port: String, handler: H) -> ::std::io::Result<Server> {
        let http = tiny_http::Server::http(&host_port).map_err(|e| {
            ::std::io::Error::new(::std::io::ErrorKind::AddrInUse, e.to_string())
        })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            while !thread_shutdown.load(Ordering::Relaxed) {
                match http.recv_timeout(Duration::from_millis(200)) {
                    Ok(Some(request)) => handler.handle(request),
                    Ok(None) => continue,
                    Err(_) => break,
                }
            }
        });
        Ok(Server {
            thread: Some(handle),
            shutdown,
        })
    }
}

impl dory_thread::Stoppable for Server {
    fn join(mut self) {
        if let Some(h) = self.thread.take() {
            h.join().expect("status server thread panicked");
        }
    }

    fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }
}
