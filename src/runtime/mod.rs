//! Runtime subsystem modules.

pub(crate) mod callback;
pub(crate) mod context;
mod core;
mod event_loop;
pub(crate) mod queue;
pub(crate) mod waker;

pub use core::Reactor;
pub use event_loop::Loop;
