//! Ready queue shared between the reactor thread and its wakers.
//!
//! Wakers may fire on any thread. Pushing a key writes to the reactor's
//! self-pipe so a blocking poll returns and the task gets polled.

use crate::reactor::event::Notifier;
use crate::utils::slab::Key;

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

pub(crate) struct ReadyQueue {
    keys: Mutex<VecDeque<Key>>,
    notifier: Notifier,
    closed: AtomicBool,
}

impl ReadyQueue {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            keys: Mutex::new(VecDeque::new()),
            notifier: Notifier::new()?,
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueues `key`, waking the reactor if the queue was empty.
    ///
    /// Returns `false` if the reactor has shut down and the key was dropped.
    pub(crate) fn push(&self, key: Key) -> bool {
        if self.is_closed() {
            return false;
        }

        let was_empty = {
            let mut keys = self.keys.lock();
            let was_empty = keys.is_empty();
            keys.push_back(key);
            was_empty
        };

        if was_empty {
            self.notifier.notify();
        }

        true
    }

    /// Takes every key queued so far. Keys pushed afterwards wait for the next turn.
    pub(crate) fn take_all(&self) -> VecDeque<Key> {
        std::mem::take(&mut *self.keys.lock())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.keys.lock().clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
