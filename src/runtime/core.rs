//! The per-thread reactor that drives every socket task.
//!
//! A [`Reactor`] is installed on the thread that builds it. Sockets, tasks and
//! relays created on that thread register with it implicitly. The thread
//! drives completions by calling [`Reactor::turn`], [`Reactor::run_until`] or
//! by starting a [`Loop`](crate::Loop).

use crate::builder::{Config, ReactorBuilder};
use crate::reactor::core::{self, Core};

use std::io;
use std::rc::Rc;

/// Single-threaded completion reactor.
///
/// Dropping the reactor uninstalls it and drops every armed task future.
/// Wakeups sent afterwards, from any thread, are discarded.
pub struct Reactor {
    core: Rc<Core>,
}

impl Reactor {
    /// Creates a reactor with default settings and installs it on this thread.
    ///
    /// # Panics
    /// If a reactor is already installed on this thread.
    ///
    /// # Example
    /// ```ignore
    /// let reactor = Reactor::new()?;
    /// ```
    pub fn new() -> io::Result<Self> {
        ReactorBuilder::new().build()
    }

    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> io::Result<Self> {
        let core = Rc::new(Core::new(config)?);
        core::install(&core);

        tracing::debug!(thread = ?std::thread::current().id(), "reactor installed");

        Ok(Self { core })
    }

    /// Runs one turn, blocking until some task can make progress.
    ///
    /// Completion callbacks run inside this call.
    ///
    /// # Returns
    /// `true` while any task is still armed
    pub fn turn(&self) -> io::Result<bool> {
        self.core.turn(true)
    }

    /// Runs one turn without waiting for readiness.
    pub fn try_turn(&self) -> io::Result<bool> {
        self.core.turn(false)
    }

    /// Runs turns until `done` returns `true`.
    ///
    /// # Returns
    /// An error of kind `WouldBlock` if every task finished while `done` was
    /// still `false`; nothing could ever make it true.
    ///
    /// # Example
    /// ```ignore
    /// let done = Rc::new(Cell::new(false));
    /// reactor.run_until(|| done.get())?;
    /// ```
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> io::Result<()> {
        while !done() {
            if !self.core.turn(true)? && !done() {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "reactor has no armed task left",
                ));
            }
        }

        Ok(())
    }

    /// Runs turns until no task is armed.
    pub fn run(&self) -> io::Result<()> {
        while self.core.turn(true)? {}
        Ok(())
    }

    /// Number of armed task futures.
    pub fn outstanding(&self) -> usize {
        self.core.outstanding()
    }

    /// Number of timer deadlines the reactor is waiting for.
    pub fn pending_timers(&self) -> usize {
        self.core.timers()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        core::uninstall(&self.core);
        self.core.shutdown();

        tracing::debug!("reactor shut down");
    }
}
