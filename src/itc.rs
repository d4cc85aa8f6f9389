//! Cross-thread completion relay.
//!
//! Every task belongs to the thread whose reactor it was created on. [`Itc`]
//! is the one sanctioned way for another thread to complete a request: the
//! owning thread arms it with [`Itc::request`], hands an [`ItcSignal`] to the
//! other thread, and that thread calls [`ItcSignal::complete`].
//!
//! If the owning thread (or its reactor) is gone when the signal arrives, the
//! signal is dropped without error: nobody is left to observe it. A signal
//! only completes the request that was armed when it arrived; late or
//! repeated signals are discarded, so no request is ever completed twice.
//!
//! Cancelling is reserved to the owning thread. A cancel racing a signal is
//! resolved by whichever reaches the task first; the other is discarded.

use crate::error::{Error, Status};
use crate::runtime::callback::Callback;
use crate::task::AsyncTask;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;

use parking_lot::Mutex;

#[derive(Default)]
struct SignalState {
    generation: u64,
    armed: bool,
    fired: bool,
    waker: Option<Waker>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SignalState>,
}

/// Owning-thread side of the relay.
pub struct Itc {
    task: AsyncTask<()>,
    shared: Arc<Shared>,
}

impl Itc {
    /// Creates an idle relay on this thread's reactor.
    pub fn new() -> Self {
        Self {
            task: AsyncTask::new("itc"),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Arms the relay; `callback` runs with `Ok(())` once another thread signals.
    ///
    /// # Panics
    /// If a request is already pending.
    pub fn request<P, F>(&self, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Status, P) + 'static,
    {
        let callback = Callback::new(callback, param);

        let generation = {
            let mut state = self.shared.state.lock();
            if !self.task.is_pending() {
                state.generation += 1;
                state.armed = true;
                state.fired = false;
                state.waker = None;
            }
            state.generation
        };

        let wait = SignalFuture {
            shared: self.shared.clone(),
            generation,
        };

        self.task.start(wait, move |status| callback.invoke(status));
    }

    /// Handle another thread uses to complete the armed request.
    pub fn signaller(&self) -> ItcSignal {
        ItcSignal {
            shared: self.shared.clone(),
        }
    }

    /// Cancels the pending request; its callback runs with `Err(Cancelled)`.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state.lock();
            state.armed = false;
            state.waker = None;
        }

        self.task.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.task.is_pending()
    }
}

impl Default for Itc {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Itc {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Sending side of the relay. Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct ItcSignal {
    shared: Arc<Shared>,
}

impl ItcSignal {
    /// Completes the armed request with success.
    ///
    /// Dropped silently if no request is armed or the owning thread is gone.
    pub fn complete(&self) {
        let waker = {
            let mut state = self.shared.state.lock();
            if !state.armed {
                tracing::debug!("no request armed, signal dropped");
                return;
            }

            state.armed = false;
            state.fired = true;
            state.waker.take()
        };

        tracing::trace!(from = ?thread::current().id(), "relay signalled");

        // Not yet polled: the first poll observes `fired`.
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

struct SignalFuture {
    shared: Arc<Shared>,
    generation: u64,
}

impl Future for SignalFuture {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();

        if state.generation != self.generation {
            return Poll::Pending;
        }

        if state.fired {
            state.fired = false;
            return Poll::Ready(Ok(()));
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
