//! Fluent builder for Reactor construction.
//!
//! Provides a builder pattern interface for creating and configuring the
//! per-thread [`Reactor`].

use crate::runtime::Reactor;

use std::io;

/// Default upper bound for a single read request.
pub const DEFAULT_MAX_READ_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings fixed for the lifetime of a reactor.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    /// Initial capacity of the poll set and task slab.
    pub(crate) event_capacity: usize,

    /// Largest buffer a single read request may ask for.
    pub(crate) max_read_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_read_size: DEFAULT_MAX_READ_SIZE,
        }
    }
}

/// Builder for constructing Reactor instances with fluent API.
///
/// # Example
/// ```ignore
/// let reactor = ReactorBuilder::new().max_read_size(1 << 20).build()?;
/// ```
#[derive(Debug, Default)]
pub struct ReactorBuilder {
    config: Config,
}

impl ReactorBuilder {
    /// Creates a new reactor builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial number of descriptor and task slots.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Sets the largest size a `read_exact`/`read_some` request may ask for.
    ///
    /// Larger requests complete with [`Error::NoMemory`](crate::Error::NoMemory).
    pub fn max_read_size(mut self, bytes: usize) -> Self {
        self.config.max_read_size = bytes;
        self
    }

    /// Builds the reactor and installs it on the calling thread.
    ///
    /// # Returns
    /// The reactor, or the error from creating its wakeup pipe
    ///
    /// # Panics
    /// If a reactor is already installed on this thread.
    ///
    /// # Example
    /// ```ignore
    /// let reactor = ReactorBuilder::new().build()?;
    /// ```
    pub fn build(self) -> io::Result<Reactor> {
        Reactor::with_config(self.config)
    }
}
