//! UNIX stream input source: one thread per accepted connection, frames
//! delimited by a 4-byte big-endian length prefix (spec section 4.C).

use discard;
use message::Message;
use pool::Pool;
use source::framing::FrameBuffer;
use source::{shutdown_requested, Admission, Source};
use std::io::Read;
use std::os::unix::net::{UnixListener, UnixStream as StdUnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The UNIX stream acceptor. Owns the listening socket; each accepted
/// connection is handed to its own thread, the way the teacher's
/// `source/tcp.rs` owns one thread per connection rather than multiplexing
/// them on a single `mio::Poll`.
pub struct UnixStream {
    listener: UnixListener,
    max_msg_size: usize,
    pool: Arc<Pool>,
    admit_tx: SyncSender<Message>,
    discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
}

impl UnixStream {
    /// Bind a stream listener at `path`, removing a stale socket file left
    /// behind by an unclean shutdown.
    pub fn bind(
        path: &Path,
        max_msg_size: usize,
        pool: Arc<Pool>,
        admit_tx: SyncSender<Message>,
        discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
    ) -> ::std::io::Result<UnixStream> {
        let _ = ::std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        Ok(UnixStream {
            listener,
            max_msg_size,
            pool,
            admit_tx,
            discard_tx,
        })
    }
}

/// Drain complete frames off one connection until it closes or `shutdown`
/// fires, handing each to `admission`. Shared by the accept loop and
/// directly unit-testable against an in-memory byte source; also reused
/// by the local TCP source since both speak the same length-prefixed
/// framing.
pub fn drain_connection<R: Read>(mut conn: R, admission: &Admission, max_msg_size: usize, shutdown: &AtomicBool) {
    let mut fb = FrameBuffer::new();
    let mut chunk = [0u8; 8192];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        loop {
            match fb.pop_frame(max_msg_size) {
                Ok(Some(frame)) => admission.handle_frame(&frame),
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match conn.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => fb.feed(&chunk[..n]),
            Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return,
        }
    }
}

impl Source for UnixStream {
    fn run(&mut self, poll: mio::Poll) {
        let shutdown = Arc::new(AtomicBool::new(false));
        loop {
            if shutdown_requested(&poll, Duration::from_millis(1)) {
                shutdown.store(true, Ordering::Relaxed);
                return;
            }
            match self.listener.accept() {
                Ok((conn, _addr)) => {
                    let admission = Admission {
                        pool: Arc::clone(&self.pool),
                        max_msg_size: self.max_msg_size,
                        admit_tx: self.admit_tx.clone(),
                        discard_tx: self.discard_tx.clone(),
                    };
                    let max_msg_size = self.max_msg_size;
                    let conn_shutdown = Arc::clone(&shutdown);
                    let _ = conn.set_nonblocking(true);
                    thread::spawn(move || {
                        drain_connection(conn, &admission, max_msg_size, &conn_shutdown);
                    });
                }
                Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!("unix stream source accept error: {}", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn drains_back_to_back_frames_from_a_reader() {
        let pool = Pool::new(4096, 1024);
        let (admit_tx, admit_rx) = sync_channel(8);
        let (discard_tx, _discard_rx) = sync_channel(8);
        let admission = Admission {
            pool,
            max_msg_size: 64 * 1024,
            admit_tx,
            discard_tx,
        };

        let msg = ::wire::WireMessage {
            topic: "orders".to_string(),
            partition_key: None,
            value: b"hello".to_vec(),
            client_timestamp_ms: 1,
        };
        let encoded = ::wire::encode(&msg);
        let mut framed = Vec::new();
        framed.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        framed.extend_from_slice(&encoded);
        framed.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        framed.extend_from_slice(&encoded);

        let shutdown = AtomicBool::new(false);
        drain_connection(&framed[..], &admission, 64 * 1024, &shutdown);

        assert_eq!(admit_rx.try_recv().unwrap().topic(), "orders");
        assert_eq!(admit_rx.try_recv().unwrap().topic(), "orders");
        assert!(admit_rx.try_recv().is_err());
    }

    #[test]
    fn oversized_frame_closes_connection_without_panicking() {
        let pool = Pool::new(4096, 1024);
        let (admit_tx, _admit_rx) = sync_channel(8);
        let (discard_tx, _discard_rx) = sync_channel(8);
        let admission = Admission {
            pool,
            max_msg_size: 64 * 1024,
            admit_tx,
            discard_tx,
        };
        let mut framed = Vec::new();
        framed.extend_from_slice(&(1_000_000u32).to_be_bytes());
        let shutdown = AtomicBool::new(false);
        drain_connection(&framed[..], &admission, 64 * 1024, &shutdown);
    }
}
