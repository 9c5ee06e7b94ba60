//! The single-threaded reactor: readiness backends and the event loop.

mod builder;
mod core;
mod event;

pub mod poller;

pub use builder::EventLoopBuilder;
pub use core::{EventLoop, LoopHandle};
pub use event::Event;
