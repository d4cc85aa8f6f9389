//! Execution contexts entered around completion callbacks.
//!
//! Completion callbacks run from the reactor, outside whatever state the
//! caller had when it issued the request (an interpreter lock, a span, a
//! per-call arena). An [`ExecutionContext`] captures that state: the context
//! current when a request is issued is entered right before its callback runs
//! and left right after.
//!
//! # Example
//!
//! ```ignore
//! struct Interpreter;
//!
//! impl ExecutionContext for Interpreter {
//!     fn enter(&self) { /* acquire */ }
//!     fn leave(&self) { /* release */ }
//! }
//!
//! with_context(Interpreter, || {
//!     socket.read_some(128, |result, _| { /* runs inside Interpreter */ }, ());
//! });
//! ```

use std::cell::RefCell;
use std::rc::Rc;

/// Caller state restored around every completion callback.
pub trait ExecutionContext {
    /// Called on the reactor thread right before a callback runs.
    fn enter(&self);

    /// Called right after the callback returns or unwinds.
    fn leave(&self);
}

thread_local! {
    /// Context captured by requests issued on this thread.
    static CURRENT_CONTEXT: RefCell<Option<Rc<dyn ExecutionContext>>> = const { RefCell::new(None) };
}

/// Runs `function` with `context` as the current execution context.
///
/// Requests issued inside `function` capture `context`. The previous context
/// is restored on exit.
pub fn with_context<C, F, R>(context: C, function: F) -> R
where
    C: ExecutionContext + 'static,
    F: FnOnce() -> R,
{
    let _restore = swap_current(Some(Rc::new(context)));
    function()
}

fn swap_current(context: Option<Rc<dyn ExecutionContext>>) -> Restore {
    let previous = CURRENT_CONTEXT
        .try_with(|current| current.replace(context))
        .ok()
        .flatten();

    Restore { previous }
}

struct Restore {
    previous: Option<Rc<dyn ExecutionContext>>,
}

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = CURRENT_CONTEXT.try_with(|current| current.replace(previous));
    }
}

/// Context captured when a request was issued.
#[derive(Clone, Default)]
pub(crate) struct ContextHandle(Option<Rc<dyn ExecutionContext>>);

impl ContextHandle {
    /// Captures the current context of this thread.
    pub(crate) fn capture() -> Self {
        let context = CURRENT_CONTEXT
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten();

        Self(context)
    }

    /// Enters the captured context until the guard drops.
    ///
    /// While entered, it is also this thread's current context, so requests
    /// issued from the callback capture it again.
    pub(crate) fn enter(&self) -> ContextGuard {
        if let Some(context) = &self.0 {
            context.enter();
        }

        ContextGuard {
            context: self.0.clone(),
            _restore: swap_current(self.0.clone()),
        }
    }
}

pub(crate) struct ContextGuard {
    context: Option<Rc<dyn ExecutionContext>>,
    _restore: Restore,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(context) = &self.context {
            context.leave();
        }
    }
}
