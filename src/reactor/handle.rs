use crate::error::{Violation, fatal};
use crate::reactor::core::{self, Core};

use std::ops::Deref;
use std::rc::Rc;

/// Shared handle to the reactor a task was created on.
#[derive(Clone)]
pub(crate) struct ReactorHandle(Rc<Core>);

impl ReactorHandle {
    /// Handle to this thread's reactor. Fatal if none is installed.
    #[track_caller]
    pub(crate) fn current() -> Self {
        match core::current() {
            Some(core) => Self(core),
            None => fatal(Violation::UseBeforeInit),
        }
    }
}

impl Deref for ReactorHandle {
    type Target = Core;

    fn deref(&self) -> &Core {
        &self.0
    }
}
