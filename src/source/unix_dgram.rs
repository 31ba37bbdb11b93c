//! UNIX datagram input source: one datagram = one message (spec section
//! 4.C).

use discard;
use message::Message;
use pool::Pool;
use source::{shutdown_requested, Admission, Source};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

/// Inspect the kernel's default socket receive buffer against the
/// configured maximum datagram size and return a human-readable warning if
/// clients would need to raise `SO_SNDBUF` to send a max-sized datagram.
///
/// Grounded in the original's startup `CheckUnixDgSize` diagnostic: it's a
/// one-shot advisory, not a hard failure, because a client can always set
/// its own `SO_SNDBUF` regardless of our receive-side default.
pub fn check_sndbuf_warning(socket: &UnixDatagram, max_msg_size: usize) -> Option<String> {
    let mut rcvbuf: libc::c_int = 0;
    let mut len = ::std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &mut rcvbuf as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return None;
    }
    if (rcvbuf as usize) < max_msg_size {
        Some(format!(
            "kernel default SO_RCVBUF ({} bytes) is smaller than the configured maximum \
             datagram size ({} bytes); clients sending max-sized messages must raise \
             SO_SNDBUF explicitly",
            rcvbuf, max_msg_size
        ))
    } else {
        None
    }
}

/// The UNIX datagram acceptor.
pub struct UnixDgram {
    socket: UnixDatagram,
    max_msg_size: usize,
    admission: Admission,
}

impl UnixDgram {
    /// Bind a datagram socket at `path`. Removes a stale socket file left
    /// behind by an unclean shutdown before binding, the way most UNIX
    /// datagram servers do.
    pub fn bind(
        path: &Path,
        max_msg_size: usize,
        pool: Arc<Pool>,
        admit_tx: SyncSender<Message>,
        discard_tx: SyncSender<(String, discard::Reason, Vec<u8>)>,
    ) -> ::std::io::Result<UnixDgram> {
        let _ = ::std::fs::remove_file(path);
        let socket = UnixDatagram::bind(path)?;
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        if let Some(warning) = check_sndbuf_warning(&socket, max_msg_size) {
            warn!("{}", warning);
        }
        Ok(UnixDgram {
            socket,
            max_msg_size,
            admission: Admission {
                pool,
                max_msg_size,
                admit_tx,
                discard_tx,
            },
        })
    }
}

impl Source for UnixDgram {
    fn run(&mut self, poll: mio::Poll) {
        let mut buf = vec![0u8; self.max_msg_size + 4096];
        loop {
            if shutdown_requested(&poll, Duration::from_millis(1)) {
                return;
            }
            match self.socket.recv(&mut buf) {
                Ok(n) => self.admission.handle_frame(&buf[..n]),
                Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => continue,
                Err(ref e) if e.kind() == ::std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    error!("unix datagram source read error: {}", e);
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
    fn sndbuf_warning_fires_when_default_is_too_small() {
        let socket = UnixDatagram::unbound().unwrap();
        let warning = check_sndbuf_warning(&socket, 1024 * 1024 * 1024);
        assert!(warning.is_some());
    }

    #[test]
    fn sndbuf_warning_silent_when_default_is_sufficient() {
        let socket = UnixDatagram::unbound().unwrap();
        let warning = check_sndbuf_warning(&socket, 1);
        assert!(warning.is_none());
    }
}
