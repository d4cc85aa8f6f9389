//! Nested reactor loops.
//!
//! A [`Loop`] runs reactor turns until it is stopped. It is the way to wait
//! for a completion from inside code that is itself running in a completion
//! callback: start a loop, and stop it from the callback you are waiting for.

use crate::reactor::handle::ReactorHandle;

use std::cell::Cell;
use std::io;
use std::rc::Rc;

struct LoopState {
    running: Cell<bool>,
    stop_requested: Cell<bool>,
}

/// A stoppable run of the current thread's reactor.
///
/// Clones share the same loop, so a clone can be moved into a callback and
/// used to stop it.
///
/// # Example
/// ```ignore
/// let wait = Loop::new();
/// let stopper = wait.clone();
/// socket.read_some(64, move |result, _| { stopper.stop(); }, ());
/// wait.start()?;
/// ```
#[derive(Clone)]
pub struct Loop {
    reactor: ReactorHandle,
    state: Rc<LoopState>,
}

impl Loop {
    /// Creates a stopped loop on this thread's reactor.
    ///
    /// # Panics
    /// If no reactor is installed on this thread.
    pub fn new() -> Self {
        Self {
            reactor: ReactorHandle::current(),
            state: Rc::new(LoopState {
                running: Cell::new(false),
                stop_requested: Cell::new(false),
            }),
        }
    }

    /// Runs reactor turns until [`stop`](Self::stop) is called.
    ///
    /// Returns immediately if `stop` was called before `start`.
    ///
    /// # Returns
    /// An error of kind `WouldBlock` if every task finished without anyone
    /// stopping the loop.
    pub fn start(&self) -> io::Result<()> {
        if self.state.stop_requested.replace(false) {
            return Ok(());
        }

        self.state.running.set(true);
        tracing::trace!("loop started");

        let result = loop {
            if self.state.stop_requested.get() {
                break Ok(());
            }

            match self.reactor.turn(true) {
                Ok(true) => {}
                Ok(false) if self.state.stop_requested.get() => break Ok(()),
                Ok(false) => {
                    tracing::warn!("loop has nothing left to wait for");
                    break Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "loop has no armed task left",
                    ));
                }
                Err(error) => break Err(error),
            }
        };

        self.state.running.set(false);
        self.state.stop_requested.set(false);
        tracing::trace!("loop stopped");

        result
    }

    /// Asks the loop to return after the current turn.
    pub fn stop(&self) {
        self.state.stop_requested.set(true);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.get()
    }
}

impl Default for Loop {
    fn default() -> Self {
        Self::new()
    }
}
