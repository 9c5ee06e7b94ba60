use super::core::EventLoop;
use super::poller::Backend;
use crate::config::{DEFAULT_EVENTS_CAPACITY, DEFAULT_MAX_CONNECTIONS, DEFAULT_READ_CHUNK};
use crate::error::Result;
use crate::handler::ConnectionHandler;

/// Builder for configuring and creating an event loop.
///
/// # Examples
///
/// ```rust,no_run
/// use evloop::{Backend, EventLoopBuilder, Transform, TransformHandler};
///
/// let mut event_loop = EventLoopBuilder::new()
///     .backend(Backend::Poll)
///     .max_connections(64)
///     .build(TransformHandler::new(Transform::Rot13))?;
///
/// event_loop.bind("127.0.0.1:43211")?;
/// event_loop.run()?;
/// # Ok::<(), evloop::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct EventLoopBuilder {
    backend: Backend,
    max_connections: usize,
    events_capacity: usize,
    read_chunk: usize,
}

impl EventLoopBuilder {
    /// Creates a builder with the platform's default backend and the
    /// crate's default limits.
    pub fn new() -> Self {
        Self {
            backend: Backend::platform_default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets how many connections may be live at once.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_connections(mut self, n: usize) -> Self {
        assert!(n > 0, "max_connections must be > 0");

        self.max_connections = n;
        self
    }

    /// Sets how many events a single `wait` may report.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn events_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "events_capacity must be > 0");

        self.events_capacity = n;
        self
    }

    /// Sets the number of bytes requested by each read.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn read_chunk(mut self, n: usize) -> Self {
        assert!(n > 0, "read_chunk must be > 0");

        self.read_chunk = n;
        self
    }

    /// Builds the event loop.
    ///
    /// Fails if the demultiplexer or the waker cannot be created.
    pub fn build<H: ConnectionHandler>(self, handler: H) -> Result<EventLoop<H>> {
        EventLoop::new(
            self.backend,
            handler,
            self.max_connections,
            self.events_capacity,
            self.read_chunk,
        )
    }
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TransformHandler;
    use crate::reactor::poller::Trigger;

    #[test]
    fn test_builder_applies_backend() {
        let event_loop = EventLoopBuilder::new()
            .backend(Backend::Select)
            .build(TransformHandler::default())
            .unwrap();

        assert_eq!(event_loop.backend(), Backend::Select);
        assert_eq!(event_loop.trigger(), Trigger::Level);
        assert_eq!(event_loop.connection_count(), 0);
    }

    #[test]
    #[should_panic(expected = "max_connections must be > 0")]
    fn test_zero_connections_panics() {
        let _ = EventLoopBuilder::new().max_connections(0);
    }
}
