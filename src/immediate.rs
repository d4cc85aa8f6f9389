//! Task that completes on the next reactor turn.

use crate::error::Status;
use crate::runtime::callback::Callback;
use crate::task::AsyncTask;

/// Completes on the reactor's next turn without any external event.
///
/// Used to sequence a pseudo-asynchronous completion deterministically: a
/// callback requested here never runs inside the call that requested it.
///
/// # Example
/// ```ignore
/// let immediate = Immediate::new();
/// immediate.complete(|status, label| println!("{label}: {status:?}"), "tick");
/// reactor.turn()?;
/// ```
pub struct Immediate {
    task: AsyncTask<()>,
}

impl Immediate {
    /// Creates an idle immediate task on this thread's reactor.
    pub fn new() -> Self {
        Self {
            task: AsyncTask::new("immediate"),
        }
    }

    /// Arms the task; `callback` runs with `Ok(())` on the next turn.
    ///
    /// # Panics
    /// If a request is already pending.
    pub fn complete<P, F>(&self, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Status, P) + 'static,
    {
        let callback = Callback::new(callback, param);
        self.task.complete(Ok(()), move |status| callback.invoke(status));
    }

    /// Cancels a pending request; its callback runs with `Err(Cancelled)`.
    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.task.is_pending()
    }
}

impl Default for Immediate {
    fn default() -> Self {
        Self::new()
    }
}
