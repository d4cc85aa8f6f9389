//! Host name resolution.
//!
//! [`resolve`] is the synchronous lookup used by listening sockets.
//! [`DnsResolver`] wraps the same lookup as an async task for connecting
//! sockets: the blocking lookup runs on a helper thread and its result is
//! delivered on the reactor thread.
//!
//! The loopback name never reaches the system resolver.

use crate::error::Error;
use crate::net::session::{SocketServ, Subsession};
use crate::task::AsyncTask;

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::thread;

use futures::channel::oneshot;

/// Host name that resolves to the loopback address without a lookup.
pub const LOOPBACK_NAME: &str = "localhost";

/// Loopback address for the loopback name.
pub(crate) fn loopback_address(host: &str) -> Option<IpAddr> {
    host.eq_ignore_ascii_case(LOOPBACK_NAME)
        .then_some(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Blocking lookup returning the first address, IPv4 preferred.
fn lookup(host: &str) -> Result<IpAddr, Error> {
    if let Ok(literal) = host.parse::<IpAddr>() {
        return Ok(literal);
    }

    let addresses: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|error| match error.raw_os_error() {
            Some(code) => Error::Os(code),
            None => Error::NotFound,
        })?
        .map(|address| address.ip())
        .collect();

    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or(Error::NotFound)
}

/// Resolves `host` synchronously.
///
/// The loopback name resolves without touching `serv`. Any other name opens a
/// transient resolver subsession for the duration of one lookup.
///
/// # Returns
/// The first address found, or the lookup error. No retry, no caching.
#[tracing::instrument(level = "debug", skip(serv))]
pub fn resolve(serv: &SocketServ, host: &str) -> Result<IpAddr, Error> {
    if let Some(address) = loopback_address(host) {
        return Ok(address);
    }

    let _resolver = serv.open_subsession("resolver");
    lookup(host)
}

/// One asynchronous name lookup at a time.
pub(crate) struct DnsResolver {
    task: AsyncTask<IpAddr>,
    serv: SocketServ,
    session: RefCell<Option<Subsession>>,
}

impl DnsResolver {
    pub(crate) fn new(serv: SocketServ) -> Self {
        Self {
            task: AsyncTask::new("dns-resolver"),
            serv,
            session: RefCell::new(None),
        }
    }

    /// Looks `host` up; `handler` receives the first address.
    ///
    /// The loopback name completes on the next turn without a lookup. Other
    /// names lazily open the resolver subsession, kept until the resolver drops.
    pub(crate) fn resolve<H>(&self, host: &str, handler: H)
    where
        H: FnOnce(Result<IpAddr, Error>) + 'static,
    {
        if let Some(address) = loopback_address(host) {
            self.task.complete(Ok(address), handler);
            return;
        }

        if self.session.borrow().is_none() {
            *self.session.borrow_mut() = Some(self.serv.open_subsession("resolver"));
        }

        let (sender, receiver) = oneshot::channel();
        let name = host.to_owned();

        let spawned = thread::Builder::new()
            .name("aosocket-resolver".into())
            .spawn(move || {
                // The receiver is gone if the request was cancelled.
                let _ = sender.send(lookup(&name));
            });

        if let Err(error) = spawned {
            self.task.complete(Err(error.into()), handler);
            return;
        }

        tracing::debug!(host, "resolving");

        self.task.start(
            async move { receiver.await.unwrap_or(Err(Error::Cancelled)) },
            handler,
        );
    }

    pub(crate) fn cancel(&self) {
        self.task.cancel();
    }
}
