use super::queue::WorkQueue;
use crate::error::Result;
use crate::transform::Transform;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Fixed set of threads serving connections popped from a [`WorkQueue`].
///
/// Each worker owns a popped connection until the peer closes it, then
/// goes back to the queue. A failing connection is logged and dropped;
/// the worker keeps running.
pub struct WorkerPool {
    queue: Arc<WorkQueue<TcpStream>>,
    handles: Vec<JoinHandle<()>>,

    /// Connections served, per worker.
    handled: Arc<Vec<AtomicU64>>,
}

impl WorkerPool {
    /// Spawns `workers` threads named `evloop-worker-{id}`.
    ///
    /// # Panics
    ///
    /// Panics if `workers == 0`.
    pub fn start(
        workers: usize,
        queue: Arc<WorkQueue<TcpStream>>,
        transform: Transform,
        read_chunk: usize,
    ) -> Result<Self> {
        assert!(workers > 0, "workers must be > 0");

        let handled: Arc<Vec<AtomicU64>> =
            Arc::new((0..workers).map(|_| AtomicU64::new(0)).collect());

        let mut pool = Self {
            queue,
            handles: Vec::with_capacity(workers),
            handled,
        };

        for id in 0..workers {
            let queue = pool.queue.clone();
            let handled = pool.handled.clone();

            let spawned = thread::Builder::new()
                .name(format!("evloop-worker-{id}"))
                .spawn(move || work(id, &queue, transform, read_chunk, &handled[id]));

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e.into());
                }
            }
        }

        info!(workers, %transform, "worker pool started");
        Ok(pool)
    }

    pub fn workers(&self) -> usize {
        self.handled.len()
    }

    /// Connections served so far by each worker, indexed by worker id.
    pub fn handled(&self) -> Vec<u64> {
        self.handled
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    /// Closes the queue and waits for every worker to exit.
    ///
    /// Workers finish the connection they are serving first.
    pub fn shutdown(&mut self) {
        self.queue.close();

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(
    id: usize,
    queue: &WorkQueue<TcpStream>,
    transform: Transform,
    read_chunk: usize,
    handled: &AtomicU64,
) {
    debug!(worker = id, "worker started");

    while let Some(mut stream) = queue.pop() {
        let peer = stream.peer_addr().ok();
        debug!(worker = id, ?peer, "serving connection");

        match serve_connection(&mut stream, transform, read_chunk) {
            Ok(bytes) => debug!(worker = id, ?peer, bytes, "connection finished"),
            Err(e) => warn!(worker = id, ?peer, error = %e, "connection failed"),
        }

        handled.fetch_add(1, Ordering::Relaxed);
    }

    debug!(worker = id, "worker exiting");
}

/// Echoes a blocking stream through `transform` until the peer closes it.
///
/// Returns the number of bytes echoed. A reset from the peer counts as
/// a normal end of stream.
pub fn serve_connection<S: Read + Write>(
    stream: &mut S,
    transform: Transform,
    read_chunk: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; read_chunk.max(1)];
    let mut total = 0;

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Ok(total),
            Err(e) => return Err(e),
        };

        transform.apply(&mut buf[..n]);
        stream.write_all(&buf[..n])?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TcpListener;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_serve_connection_applies_transform() {
        let (mut client, mut server) = UnixStream::pair().unwrap();

        client.write_all(b"Hello").unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let bytes = serve_connection(&mut server, Transform::Rot13, 2).unwrap();
        assert_eq!(bytes, 5);

        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        assert_eq!(reply, "Uryyb");
    }

    #[test]
    fn test_pool_counts_handled_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let queue = Arc::new(WorkQueue::new(4));
        let mut pool = WorkerPool::start(2, queue.clone(), Transform::Echo, 64).unwrap();
        assert_eq!(pool.workers(), 2);

        for _ in 0..3 {
            let mut client = std::net::TcpStream::connect(addr).unwrap();
            let (stream, _) = listener.accept().unwrap();
            queue.push(stream).unwrap();

            client.write_all(b"ping").unwrap();
            let mut reply = [0u8; 4];
            client.read_exact(&mut reply).unwrap();
            assert_eq!(&reply, b"ping");
        }

        pool.shutdown();
        assert_eq!(pool.handled().iter().sum::<u64>(), 3);
    }

    #[test]
    fn test_worker_threads_are_named() {
        let queue: Arc<WorkQueue<TcpStream>> = Arc::new(WorkQueue::new(1));
        let pool = WorkerPool::start(1, queue, Transform::Echo, 16).unwrap();

        let names: Vec<_> = pool
            .handles
            .iter()
            .map(|h| h.thread().name().map(str::to_owned))
            .collect();
        assert_eq!(names, vec![Some("evloop-worker-0".to_string())]);
    }
}
