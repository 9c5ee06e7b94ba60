//! Internal data structures.
//!
//! This module provides a [`Slab`] used by the event loop to map
//! demultiplexer tokens to live connections.

mod slab;

pub(crate) use slab::Slab;
