//! Cancellable asynchronous task bound to one reactor thread.
//!
//! An [`AsyncTask`] is the unit every socket operation is built from. It is
//! armed with an operation future and a completion handler; the reactor polls
//! the future and runs the handler once with the result.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start--> Pending --operation resolves--> Completed --handler returns--> Idle
//!                    \------------cancel---------> Cancelled --handler returns--> Idle
//! ```
//!
//! - Starting a Pending task is a fatal contract violation.
//! - Cancelling an Idle task does nothing.
//! - Cancelling a Pending task drops the operation and runs the handler with
//!   [`Error::Cancelled`] before `cancel` returns.
//! - Each start gets exactly one handler call.
//! - Dropping a Pending task cancels it.
//!
//! The handler may start the task again; the new request is not affected by
//! the completion that is being delivered.

use crate::error::{Error, Violation, fatal};
use crate::reactor::handle::ReactorHandle;
use crate::utils::slab::Key;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

/// Observable state of an [`AsyncTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Pending,
    Completed,
    Cancelled,
}

type Handler<T> = Box<dyn FnOnce(Result<T, Error>)>;

struct Slot<T> {
    name: &'static str,
    state: Cell<TaskState>,
    handler: RefCell<Option<Handler<T>>>,
    running: Cell<Option<Key>>,
}

impl<T> Slot<T> {
    /// Delivers `result` unless the task is no longer Pending.
    fn finish(&self, result: Result<T, Error>, terminal: TaskState) {
        if self.state.get() != TaskState::Pending {
            return;
        }

        self.state.set(terminal);
        self.running.set(None);

        tracing::trace!(task = self.name, state = ?terminal, "task finished");

        let handler = self.handler.borrow_mut().take();
        if let Some(handler) = handler {
            handler(result);
        }

        if self.state.get() == terminal {
            self.state.set(TaskState::Idle);
        }
    }
}

/// A cancellable request whose completion is delivered on the reactor thread.
///
/// # Example
/// ```ignore
/// let task = AsyncTask::new("answer");
/// task.start(async { Ok(42) }, |result| assert_eq!(result, Ok(42)));
/// reactor.run()?;
/// ```
pub struct AsyncTask<T> {
    reactor: ReactorHandle,
    slot: Rc<Slot<T>>,
}

impl<T: 'static> AsyncTask<T> {
    /// Creates an idle task on this thread's reactor.
    ///
    /// # Arguments
    /// * `name` - Label used in log records
    ///
    /// # Panics
    /// If no reactor is installed on this thread.
    #[track_caller]
    pub fn new(name: &'static str) -> Self {
        Self {
            reactor: ReactorHandle::current(),
            slot: Rc::new(Slot {
                name,
                state: Cell::new(TaskState::Idle),
                handler: RefCell::new(None),
                running: Cell::new(None),
            }),
        }
    }

    /// Arms the task with `operation`; `handler` receives its result.
    ///
    /// The operation is first polled on the next reactor turn.
    ///
    /// # Panics
    /// If the task is already Pending.
    #[track_caller]
    pub fn start<F, H>(&self, operation: F, handler: H)
    where
        F: Future<Output = Result<T, Error>> + 'static,
        H: FnOnce(Result<T, Error>) + 'static,
    {
        if self.is_pending() {
            fatal(Violation::RequestAlreadyPending);
        }

        *self.slot.handler.borrow_mut() = Some(Box::new(handler));
        self.slot.state.set(TaskState::Pending);

        let slot = Rc::downgrade(&self.slot);
        let key = self.reactor.spawn(async move {
            let result = operation.await;

            if let Some(slot) = slot.upgrade() {
                slot.finish(result, TaskState::Completed);
            }
        });

        self.slot.running.set(Some(key));
        tracing::trace!(task = self.slot.name, "task started");
    }

    /// Arms the task with a result that is delivered on the next turn.
    ///
    /// Used to report a failure detected while issuing a request through the
    /// same path as an ordinary completion.
    #[track_caller]
    pub fn complete<H>(&self, result: Result<T, Error>, handler: H)
    where
        H: FnOnce(Result<T, Error>) + 'static,
    {
        self.start(futures::future::ready(result), handler);
    }
}

impl<T> AsyncTask<T> {
    pub fn state(&self) -> TaskState {
        self.slot.state.get()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TaskState::Pending
    }

    /// Cancels a Pending task, delivering [`Error::Cancelled`] synchronously.
    ///
    /// Does nothing if the task is not Pending.
    pub fn cancel(&self) {
        if !self.is_pending() {
            return;
        }

        if let Some(key) = self.slot.running.take() {
            self.reactor.abort(key);
        }

        self.slot.finish(Err(Error::Cancelled), TaskState::Cancelled);
    }
}

impl<T> Drop for AsyncTask<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
