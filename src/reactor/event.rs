/// An I/O event reported by a demultiplexer.
///
/// An `Event` carries readiness information for one registered
/// descriptor. Errors and hang-ups are folded into `readable` so that
/// the owner discovers them through its next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Token supplied when the descriptor was registered.
    pub token: usize,

    /// The descriptor is readable, at end of stream, or in error.
    pub readable: bool,

    /// The descriptor is writable.
    pub writable: bool,
}
