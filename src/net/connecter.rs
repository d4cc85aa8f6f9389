//! Resolve-then-connect composite.
//!
//! ```text
//! Idle --connect(host)--> Resolving --address--> Connecting --status--> Done --> Idle
//!   \--connect(localhost)------------------------^
//! ```
//!
//! A failure in either step is reported as the composite's result and the
//! other step is cancelled. Cancelling reports [`Error::Cancelled`] once,
//! whichever step was active.

use crate::error::{Error, Status, Violation, fatal};
use crate::net::resolver::{DnsResolver, loopback_address};
use crate::net::session::SocketServ;
use crate::net::tasks::SocketConnecter;

use std::cell::{Cell, RefCell};
use std::net::{IpAddr, SocketAddr};
use std::os::fd::RawFd;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectState {
    Idle,
    Resolving,
    Connecting,
    Done,
}

struct Request {
    fd: RawFd,
    port: u16,
    source: Option<IpAddr>,
}

struct Composite {
    state: Cell<ConnectState>,
    resolver: DnsResolver,
    connecter: SocketConnecter,
    request: RefCell<Option<Request>>,
    handler: RefCell<Option<Box<dyn FnOnce(Status)>>>,
}

impl Composite {
    fn resolved(self: &Rc<Self>, result: Result<IpAddr, Error>) {
        if self.state.get() != ConnectState::Resolving {
            return;
        }

        match result {
            Ok(address) => self.start_connect(address),
            Err(error) => self.finish(Err(error)),
        }
    }

    fn start_connect(self: &Rc<Self>, address: IpAddr) {
        let Some((fd, port, source)) = self
            .request
            .borrow()
            .as_ref()
            .map(|request| (request.fd, request.port, request.source))
        else {
            return;
        };

        self.state.set(ConnectState::Connecting);
        tracing::debug!(%address, port, "connecting");

        let this = Rc::downgrade(self);
        self.connecter.connect(
            fd,
            SocketAddr::new(address, port).into(),
            source.map(|ip| SocketAddr::new(ip, 0).into()),
            move |status| {
                if let Some(this) = this.upgrade() {
                    this.connected(status);
                }
            },
        );
    }

    fn connected(&self, status: Status) {
        if self.state.get() != ConnectState::Connecting {
            return;
        }

        self.finish(status);
    }

    fn finish(&self, status: Status) {
        self.state.set(ConnectState::Done);

        self.resolver.cancel();
        self.connecter.cancel();

        self.request.borrow_mut().take();
        let handler = self.handler.borrow_mut().take();
        self.state.set(ConnectState::Idle);

        tracing::debug!(?status, "connect finished");

        if let Some(handler) = handler {
            handler(status);
        }
    }
}

/// Connects a socket to `host:port`, resolving the host first.
pub(crate) struct ResolvingConnecter {
    inner: Rc<Composite>,
}

impl ResolvingConnecter {
    pub(crate) fn new(serv: SocketServ) -> Self {
        Self {
            inner: Rc::new(Composite {
                state: Cell::new(ConnectState::Idle),
                resolver: DnsResolver::new(serv),
                connecter: SocketConnecter::new(),
                request: RefCell::new(None),
                handler: RefCell::new(None),
            }),
        }
    }

    /// Starts the connect; `handler` receives the combined result.
    ///
    /// # Arguments
    /// * `fd` - Open, unconnected stream socket
    /// * `source` - Local address to bind before connecting
    ///
    /// # Panics
    /// If a connect is already in progress.
    #[track_caller]
    pub(crate) fn connect<H>(&self, fd: RawFd, host: &str, port: u16, source: Option<IpAddr>, handler: H)
    where
        H: FnOnce(Status) + 'static,
    {
        if self.inner.state.get() != ConnectState::Idle {
            fatal(Violation::RequestAlreadyPending);
        }

        *self.inner.request.borrow_mut() = Some(Request { fd, port, source });
        *self.inner.handler.borrow_mut() = Some(Box::new(handler));

        if let Some(address) = loopback_address(host) {
            self.inner.start_connect(address);
            return;
        }

        self.inner.state.set(ConnectState::Resolving);

        let this = Rc::downgrade(&self.inner);
        self.inner.resolver.resolve(host, move |result| {
            if let Some(this) = this.upgrade() {
                this.resolved(result);
            }
        });
    }

    /// Cancels whichever step is active, reporting [`Error::Cancelled`] once.
    pub(crate) fn cancel(&self) {
        if self.inner.state.get() == ConnectState::Idle {
            return;
        }

        self.inner.finish(Err(Error::Cancelled));
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ConnectState {
        self.inner.state.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Reactor;
    use crate::net::utils;

    use std::net::TcpListener;
    use std::os::fd::AsRawFd;

    #[test]
    fn loopback_connect_skips_lookup() {
        let reactor = Reactor::new().expect("reactor");
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener");
        let port = listener.local_addr().expect("addr").port();

        let serv = SocketServ::connect();
        let socket = utils::stream_socket(libc::AF_INET).expect("socket");
        let connecter = ResolvingConnecter::new(serv.clone());

        let outcome = Rc::new(RefCell::new(None));
        let seen = outcome.clone();
        connecter.connect(socket.as_raw_fd(), "localhost", port, None, move |status| {
            *seen.borrow_mut() = Some(status);
        });

        assert_eq!(connecter.state(), ConnectState::Connecting);
        reactor
            .run_until(|| outcome.borrow().is_some())
            .expect("run");

        assert_eq!(*outcome.borrow(), Some(Ok(())));
        assert_eq!(connecter.state(), ConnectState::Idle);
        assert_eq!(serv.subsessions(), 0);
    }

    #[test]
    fn cancel_reports_once_and_is_idempotent() {
        let _reactor = Reactor::new().expect("reactor");
        let serv = SocketServ::connect();
        let socket = utils::stream_socket(libc::AF_INET).expect("socket");
        let connecter = ResolvingConnecter::new(serv.clone());

        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = calls.clone();
        connecter.connect(socket.as_raw_fd(), "example.invalid", 80, None, move |status| {
            seen.borrow_mut().push(status);
        });
        assert_eq!(connecter.state(), ConnectState::Resolving);
        assert_eq!(serv.subsessions(), 1);

        connecter.cancel();
        connecter.cancel();

        assert_eq!(*calls.borrow(), vec![Err(Error::Cancelled)]);
        assert_eq!(connecter.state(), ConnectState::Idle);
    }
}
