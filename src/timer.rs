//! Timers for the reactor.
//!
//! The reactor owns a [`TimerDriver`]: a list of (deadline, waker) pairs that
//! it fires between turns and whose nearest deadline bounds how long a turn
//! may block. [`Sleep`] is the future built on it and [`Timer`] the
//! callback-facing task that callers race against other requests to compose
//! timeouts.

use crate::error::Status;
use crate::reactor::handle::ReactorHandle;
use crate::runtime::callback::Callback;
use crate::task::AsyncTask;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Identifies one registration with the [`TimerDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerKey(u64);

/// Manages registered timers and wakes them when their deadline is reached.
pub(crate) struct TimerDriver {
    timers: Vec<(TimerKey, Instant, Waker)>,
    next_key: u64,
}

impl TimerDriver {
    pub(crate) fn new() -> Self {
        Self {
            timers: Vec::new(),
            next_key: 0,
        }
    }

    /// Registers a new timer with the given deadline and waker.
    pub(crate) fn register(&mut self, deadline: Instant, waker: Waker) -> TimerKey {
        let key = TimerKey(self.next_key);
        self.next_key += 1;

        self.timers.push((key, deadline, waker));
        key
    }

    /// Forgets a timer that has not fired. Unknown keys are ignored.
    pub(crate) fn remove(&mut self, key: TimerKey) {
        self.timers.retain(|(registered, _, _)| *registered != key);
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    /// Wakes and removes every timer whose deadline has passed.
    ///
    /// Returns `true` if timers are still pending.
    pub(crate) fn fire_expired(&mut self) -> bool {
        let now = Instant::now();
        self.timers.retain(|(_, deadline, waker)| {
            if now >= *deadline {
                waker.wake_by_ref();
                false
            } else {
                true
            }
        });

        !self.timers.is_empty()
    }

    /// Returns the time remaining until the next timer deadline, if any.
    pub(crate) fn next_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.timers
            .iter()
            .map(|(_, deadline, _)| deadline.saturating_duration_since(now))
            .min()
    }

    pub(crate) fn clear(&mut self) {
        self.timers.clear();
    }
}

/// A future that completes once its deadline passes.
///
/// Dropping it before the deadline withdraws its registration.
pub(crate) struct Sleep {
    deadline: Instant,
    reactor: ReactorHandle,
    registered: Option<TimerKey>,
}

impl Sleep {
    pub(crate) fn new(duration: Duration, reactor: ReactorHandle) -> Self {
        Self {
            deadline: Instant::now() + duration,
            reactor,
            registered: None,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }

        // The driver forgets a timer once it fires.
        if self.registered.is_none() {
            let key = self.reactor.add_timer(self.deadline, cx.waker().clone());
            self.registered = Some(key);
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.registered.take() {
            self.reactor.remove_timer(key);
        }
    }
}

/// Callback-facing timer task.
///
/// # Example
/// ```ignore
/// let timer = Timer::new();
/// timer.after(Duration::from_millis(50), |status, read| { read.cancel_read(); }, socket.clone());
/// ```
pub struct Timer {
    task: AsyncTask<()>,
    reactor: ReactorHandle,
}

impl Timer {
    /// Creates an idle timer on this thread's reactor.
    pub fn new() -> Self {
        Self {
            task: AsyncTask::new("timer"),
            reactor: ReactorHandle::current(),
        }
    }

    /// Completes with success once `duration` has elapsed.
    ///
    /// # Panics
    /// If a request is already pending on this timer.
    pub fn after<P, F>(&self, duration: Duration, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Status, P) + 'static,
    {
        let callback = Callback::new(callback, param);
        let sleep = Sleep::new(duration, self.reactor.clone());

        self.task.start(
            async move {
                sleep.await;
                Ok(())
            },
            move |status| callback.invoke(status),
        );
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.task.is_pending()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
