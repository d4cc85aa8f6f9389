//! Listening side of a Bluetooth socket.
//!
//! ```text
//! Idle --configure--> Configuring --security registered, record published--> Idle
//! Idle --accept-----> Accepting   --client-------------------------------------> Idle
//! ```
//!
//! Configure and accept share one task, so only one of them can be pending.
//! Security registration and the service record are acquired by the first
//! successful configure and released when the accepter is dropped.

use crate::bt::advertiser::Advertiser;
use crate::bt::{BtStack, SecurityPolicy};
use crate::error::{Error, Status, Violation, fatal};
use crate::net::tasks::ObserverRef;
use crate::net::utils;
use crate::reactor::future::AcceptFuture;
use crate::reactor::handle::ReactorHandle;
use crate::task::AsyncTask;

use std::cell::{Cell, RefCell};
use std::os::fd::{OwnedFd, RawFd};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccepterState {
    Idle,
    Configuring,
    Accepting,
}

enum Completion {
    Configured,
    Accepted(OwnedFd),
}

struct Service {
    channel: u8,
    service_id: u32,
    name: String,
}

pub(crate) struct BtAccepter {
    me: Weak<BtAccepter>,
    stack: Rc<dyn BtStack>,
    observer: ObserverRef,
    reactor: ReactorHandle,
    state: Cell<AccepterState>,
    task: AsyncTask<Completion>,
    service: RefCell<Option<Service>>,
    security_set: Cell<bool>,
    advertiser: RefCell<Option<Advertiser>>,
}

impl BtAccepter {
    pub(crate) fn new(stack: Rc<dyn BtStack>, observer: ObserverRef) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            stack,
            observer,
            reactor: ReactorHandle::current(),
            state: Cell::new(AccepterState::Idle),
            task: AsyncTask::new("bt-accepter"),
            service: RefCell::new(None),
            security_set: Cell::new(false),
            advertiser: RefCell::new(None),
        })
    }

    /// Asks the stack for a channel no listener uses.
    pub(crate) fn available_channel(&self, fd: RawFd) -> Result<u8, Error> {
        self.stack.available_channel(fd)
    }

    /// Binds `fd` to `channel` and starts listening.
    ///
    /// # Arguments
    /// * `service_id` - Service advertised by a later configure
    /// * `name` - Service name advertised by a later configure
    pub(crate) fn listen(&self, fd: RawFd, channel: u8, backlog: u32, service_id: u32, name: &str) -> Status {
        let address = self.stack.listen_address(channel)?;
        utils::bind(fd, &address)?;
        utils::listen(fd, backlog)?;

        tracing::debug!(channel, service_id, "bluetooth listener bound");

        *self.service.borrow_mut() = Some(Service {
            channel,
            service_id,
            name: name.to_owned(),
        });
        Ok(())
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.service.borrow().is_some()
    }

    /// Registers security and publishes the service record.
    ///
    /// Completes at once if security is already registered.
    ///
    /// # Panics
    /// Before a successful listen, or while configure or accept is pending.
    #[track_caller]
    pub(crate) fn configure(&self) {
        let policy = match self.service.borrow().as_ref() {
            Some(service) => SecurityPolicy::strict(service.service_id, service.channel),
            None => fatal(Violation::ConfigBeforeListen),
        };
        if self.task.is_pending() {
            fatal(Violation::RequestAlreadyPending);
        }

        self.state.set(AccepterState::Configuring);

        if self.security_set.get() {
            self.task.complete(Ok(Completion::Configured), self.handler());
            return;
        }

        let registration = self.stack.register_security(policy);
        self.task.start(
            async move {
                registration.await?;
                Ok(Completion::Configured)
            },
            self.handler(),
        );
    }

    /// Accepts one client from `listen_fd`.
    ///
    /// # Panics
    /// Before a successful listen, or while configure or accept is pending.
    #[track_caller]
    pub(crate) fn accept(&self, listen_fd: RawFd) {
        if !self.is_listening() {
            fatal(Violation::AcceptBeforeListen);
        }
        if self.task.is_pending() {
            fatal(Violation::RequestAlreadyPending);
        }

        self.state.set(AccepterState::Accepting);

        let accept = AcceptFuture::new(listen_fd, self.reactor.clone());
        self.task.start(
            async move { Ok(Completion::Accepted(accept.await?)) },
            self.handler(),
        );
    }

    /// Cancels a pending configure or accept.
    pub(crate) fn cancel(&self) {
        self.task.cancel();
    }

    fn handler(&self) -> impl FnOnce(Result<Completion, Error>) + 'static {
        let me = self.me.clone();
        move |result| {
            if let Some(accepter) = me.upgrade() {
                accepter.completed(result);
            }
        }
    }

    fn completed(&self, result: Result<Completion, Error>) {
        let state = self.state.replace(AccepterState::Idle);
        if matches!(result, Ok(Completion::Configured)) {
            self.security_set.set(true);
        }

        let Some(observer) = self.observer.upgrade() else {
            return;
        };

        match (state, result) {
            (_, Ok(Completion::Configured)) => {
                let status = self.advertise();
                observer.socket_configured(status);
            }
            (_, Ok(Completion::Accepted(fd))) => observer.client_accepted(Ok(fd)),
            (AccepterState::Accepting, Err(error)) => observer.client_accepted(Err(error)),
            (_, Err(error)) => observer.socket_configured(Err(error)),
        }
    }

    fn advertise(&self) -> Status {
        let service = self.service.borrow();
        let Some(service) = service.as_ref() else {
            return Err(Error::NotConnected);
        };

        let mut advertiser = self.advertiser.borrow_mut();
        if advertiser.is_none() {
            *advertiser = Some(Advertiser::open(&*self.stack)?);
        }

        match advertiser.as_mut() {
            Some(advertiser) if advertiser.is_record_added() => advertiser.mark_available(true),
            Some(advertiser) => advertiser.add_record(service.channel, service.service_id, &service.name),
            None => Err(Error::NotSupported),
        }
    }
}

impl Drop for BtAccepter {
    fn drop(&mut self) {
        self.task.cancel();
        self.advertiser.borrow_mut().take();

        if self.security_set.get() {
            if let Some(service) = self.service.borrow().as_ref() {
                self.stack.unregister_security(service.service_id);
            }
        }
    }
}
