//! Local TCP input source: same length-prefixed framing as the UNIX
//! stream source, bound to a configured loopback host:port (spec section
//! 4.C).

use discard;
use message::Message;
use pool::Pool;
use source::unix_stream::drain_connection;
use source::{shutdown_requested, Admission, Source};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The local TCP acceptor.
pub struct Tcp {
    listener: TcpListener,
    max_msg_size: usize,
    pool: Arc<Pool>,
    admit_tx: SyncSender<Message>,
    discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
}

impl Tcp {
    /// Bind a TCP listener at `host:port`.
    pub fn bind(
        host: &str,
        port: u16,
        max_msg_size: usize,
        pool: Arc<Pool>,
        admit_tx: SyncSender<Message>,
        discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
    ) -> ::std::io::Result<Tcp> {
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        Ok(Tcp {
            listener,
            max_msg_size,
            pool,
            admit_tx,
            discard_tx,
        })
    }
}

impl Source for Tcp {
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
                    let _ = conn.set_nodelay(true);
                    thread::spawn(move || {
                        drain_connection(conn, &admission, max_msg_size, &conn_shutdown);
                    });
                }
                Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!("tcp source accept error: {}", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_to_an_ephemeral_loopback_port() {
        let pool = Pool::new(4096, 1024);
        let (admit_tx, _admit_rx) = ::std::sync::mpsc::sync_channel(8);
        let (discard_tx, _discard_rx) = ::std::sync::mpsc::sync_channel(8);
        let tcp = Tcp::bind("127.0.0.1", 0, 64 * 1024, pool, admit_tx, discard_tx);
        assert!(tcp.is_ok());
    }
}
