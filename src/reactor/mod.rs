//! Readiness reactor.
//!
//! - [`core`]: Task store and turn loop, installed once per thread
//! - [`event`]: `poll(2)` readiness set and the self-pipe notifier
//! - [`future`]: Read, write, accept and connect futures over raw descriptors
//! - [`handle`]: Shared handle to the current thread's core

pub(crate) mod core;
pub(crate) mod event;
pub(crate) mod future;
pub(crate) mod handle;
