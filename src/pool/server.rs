use super::queue::WorkQueue;
use super::worker::WorkerPool;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::net::TcpListener;

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after an accept failure that would otherwise repeat at once,
/// such as `EMFILE`.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long to wait before accepting again after `error`.
fn accept_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

/// Thread-per-connection server: a blocking acceptor feeding a worker pool.
///
/// The acceptor pushes every accepted connection into a bounded queue
/// and blocks while the queue is full, so at most `queue_capacity`
/// connections wait for a free worker.
pub struct PoolServer {
    listener: TcpListener,
    queue: Arc<WorkQueue<TcpStream>>,
    pool: WorkerPool,
}

impl PoolServer {
    /// Binds the listener and starts the workers.
    pub fn bind(addr: &str, config: PoolConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let queue = Arc::new(WorkQueue::new(config.queue_capacity));
        let pool = WorkerPool::start(
            config.workers,
            queue.clone(),
            config.transform,
            config.read_chunk,
        )?;

        info!(
            addr = %listener.local_addr()?,
            queue_capacity = config.queue_capacity,
            "listening"
        );

        Ok(Self {
            listener,
            queue,
            pool,
        })
    }

    /// Accepts connections forever.
    ///
    /// Accept failures are logged and skipped; persistent ones such as
    /// descriptor exhaustion back off before the next attempt. Returns
    /// only if the queue is closed underneath the acceptor.
    pub fn run(&self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    if let Some(backoff) = accept_backoff(&e) {
                        warn!(error = %e, ?backoff, "accept failed");
                        thread::sleep(backoff);
                    }
                    continue;
                }
            };

            info!(%peer, "connection accepted");
            self.queue.push(stream)?;
            debug!(%peer, queued = self.queue.len(), "connection queued");
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connections served so far by each worker.
    pub fn handled(&self) -> Vec<u64> {
        self.pool.handled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_accept_errors_retry_at_once() {
        for kind in [io::ErrorKind::Interrupted, io::ErrorKind::ConnectionAborted] {
            assert_eq!(accept_backoff(&io::Error::from(kind)), None);
        }
    }

    #[test]
    fn test_descriptor_exhaustion_backs_off() {
        let emfile = io::Error::from_raw_os_error(libc::EMFILE);
        assert_eq!(accept_backoff(&emfile), Some(ACCEPT_BACKOFF));

        let enfile = io::Error::from_raw_os_error(libc::ENFILE);
        assert_eq!(accept_backoff(&enfile), Some(ACCEPT_BACKOFF));
    }
}
