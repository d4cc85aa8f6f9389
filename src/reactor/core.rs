//! Per-thread completion reactor.
//!
//! The core stores the futures driving every armed [`AsyncTask`](crate::AsyncTask),
//! the ready queue their wakers push into, the readiness poller and the timer
//! list. One core is installed per thread; tasks find it through
//! [`current`].
//!
//! A turn polls every task that was ready when the turn began, fires expired
//! timers, then waits for descriptor readiness. Tasks made ready during the
//! turn are polled on the next one.

use crate::builder::Config;
use crate::error::{Violation, fatal};
use crate::reactor::event::{Interest, Poller};
use crate::runtime::queue::ReadyQueue;
use crate::runtime::waker::make_waker;
use crate::timer::{TimerDriver, TimerKey};
use crate::utils::slab::{Key, Slab};

use std::cell::RefCell;
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

thread_local! {
    /// The reactor installed on this thread, if any.
    static CURRENT_CORE: RefCell<Option<Weak<Core>>> = const { RefCell::new(None) };
}

pub(crate) fn install(core: &Rc<Core>) {
    CURRENT_CORE.with(|current| {
        let mut current = current.borrow_mut();

        if current.as_ref().and_then(Weak::upgrade).is_some() {
            fatal(Violation::ReactorAlreadyInstalled);
        }

        *current = Some(Rc::downgrade(core));
    });
}

pub(crate) fn uninstall(core: &Rc<Core>) {
    let _ = CURRENT_CORE.try_with(|current| {
        let mut current = current.borrow_mut();

        if current
            .as_ref()
            .is_some_and(|installed| Weak::ptr_eq(installed, &Rc::downgrade(core)))
        {
            *current = None;
        }
    });
}

/// Returns the reactor installed on this thread.
pub(crate) fn current() -> Option<Rc<Core>> {
    CURRENT_CORE
        .try_with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
        .ok()
        .flatten()
}

pub(crate) struct Core {
    futures: RefCell<Slab<LocalFuture>>,
    ready: Arc<ReadyQueue>,
    poller: RefCell<Poller>,
    timers: RefCell<TimerDriver>,
    config: Config,
}

impl Core {
    pub(crate) fn new(config: Config) -> io::Result<Self> {
        Ok(Self {
            futures: RefCell::new(Slab::with_capacity(config.event_capacity)),
            ready: Arc::new(ReadyQueue::new()?),
            poller: RefCell::new(Poller::with_capacity(config.event_capacity)),
            timers: RefCell::new(TimerDriver::new()),
            config,
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Stores `future` and schedules its first poll for the next turn.
    pub(crate) fn spawn<F>(&self, future: F) -> Key
    where
        F: Future<Output = ()> + 'static,
    {
        let key = self.futures.borrow_mut().insert(Box::pin(future));
        self.ready.push(key);

        key
    }

    /// Drops the future stored under `key`. Unknown keys are ignored.
    pub(crate) fn abort(&self, key: Key) {
        let removed = self.futures.borrow_mut().remove(key);
        drop(removed);
    }

    pub(crate) fn register(&self, fd: RawFd, interest: Interest, waker: Waker) {
        self.poller.borrow_mut().register(fd, interest, waker);
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        self.poller.borrow_mut().deregister(fd);
    }

    pub(crate) fn add_timer(&self, deadline: Instant, waker: Waker) -> TimerKey {
        self.timers.borrow_mut().register(deadline, waker)
    }

    pub(crate) fn remove_timer(&self, key: TimerKey) {
        self.timers.borrow_mut().remove(key);
    }

    /// Number of timers waiting for their deadline.
    pub(crate) fn timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Number of armed futures.
    pub(crate) fn outstanding(&self) -> usize {
        self.futures.borrow().len()
    }

    /// Runs one reactor turn.
    ///
    /// # Arguments
    /// * `block` - Wait for readiness when the turn polled nothing
    ///
    /// # Returns
    /// `true` while any armed future remains
    pub(crate) fn turn(&self, block: bool) -> io::Result<bool> {
        let batch = self.ready.take_all();
        let progressed = !batch.is_empty();
        for key in batch {
            self.poll_task(key);
        }

        self.timers.borrow_mut().fire_expired();

        if self.futures.borrow().is_empty() {
            return Ok(false);
        }

        // A nested turn must not sleep on futures checked out by its caller.
        let timeout = if !block || progressed || !self.ready.is_empty() {
            Some(Duration::ZERO)
        } else {
            self.timers.borrow().next_remaining()
        };

        let woken = self
            .poller
            .borrow_mut()
            .wait(self.ready.notifier().fd(), timeout)?;
        self.ready.notifier().drain();

        for waker in woken {
            waker.wake();
        }

        self.timers.borrow_mut().fire_expired();

        Ok(true)
    }

    fn poll_task(&self, key: Key) {
        let Some(mut future) = self.futures.borrow_mut().take(key) else {
            return;
        };

        let waker = make_waker(key, &self.ready);
        let mut cx = Context::from_waker(&waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                let _ = self.futures.borrow_mut().remove(key);
                drop(future);
            }
            Poll::Pending => {
                let stale = self.futures.borrow_mut().restore(key, future);
                drop(stale);
            }
        }
    }

    /// Drops every future and stops accepting wakeups.
    pub(crate) fn shutdown(&self) {
        self.ready.close();

        let futures = self.futures.borrow_mut().drain();
        drop(futures);

        self.poller.borrow_mut().clear();
        self.timers.borrow_mut().clear();
    }
}
