//! Waker implementation for task wake-up notifications.
//!
//! A task waker carries the task's slab key and a weak reference to the
//! reactor's ready queue. Waking after the reactor is gone is a silent no-op,
//! which is what lets another thread signal a task whose owning thread has
//! already exited.

use crate::runtime::queue::ReadyQueue;
use crate::utils::slab::Key;

use std::sync::{Arc, Weak};
use std::task::{Wake, Waker};

pub(crate) struct TaskWaker {
    key: Key,
    queue: Weak<ReadyQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let delivered = self
            .queue
            .upgrade()
            .is_some_and(|queue| queue.push(self.key));

        if !delivered {
            tracing::trace!(key = ?self.key, "reactor gone, wake dropped");
        }
    }
}

/// Creates a waker that re-queues `key` on `queue` when woken.
pub(crate) fn make_waker(key: Key, queue: &Arc<ReadyQueue>) -> Waker {
    Waker::from(Arc::new(TaskWaker {
        key,
        queue: Arc::downgrade(queue),
    }))
}
