//! Caller callback bindings.
//!
//! A binding pairs a closure with the opaque parameter it is called with and
//! the execution context captured when the request was issued. It is consumed
//! by exactly one delivery; replacing a binding drops the previous pair.

use crate::error::fatal_in_callback;
use crate::runtime::context::ContextHandle;

use std::panic::{self, AssertUnwindSafe};

pub(crate) struct Callback<A> {
    call: Box<dyn FnOnce(A)>,
    context: ContextHandle,
}

impl<A: 'static> Callback<A> {
    pub(crate) fn new<P, F>(callback: F, param: P) -> Self
    where
        P: 'static,
        F: FnOnce(A, P) + 'static,
    {
        Self {
            call: Box::new(move |args| callback(args, param)),
            context: ContextHandle::capture(),
        }
    }

    /// Calls the closure inside its captured context.
    ///
    /// A panic escaping the closure is fatal.
    pub(crate) fn invoke(self, args: A) {
        let Callback { call, context } = self;

        let outcome = {
            let _entered = context.enter();
            panic::catch_unwind(AssertUnwindSafe(move || call(args)))
        };

        if let Err(payload) = outcome {
            fatal_in_callback(payload);
        }
    }
}
