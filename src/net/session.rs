//! Shared sessions sockets depend on.
//!
//! A [`SocketServ`] is the session every socket and resolver is opened
//! against. A [`Connection`] selects the access point (local source address)
//! outbound TCP connects originate from. Both are reference-counted handles
//! shared by many sockets; clones refer to the same session.
//!
//! Sessions track their open dependents. Rebinding or closing a session while
//! a dependent is open is a contract violation.

use crate::bt::BtStack;
use crate::error::{Status, Violation, fatal};
use crate::net::utils;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsRawFd;
use std::rc::Rc;

struct ServState {
    open: Cell<bool>,
    subsessions: Cell<usize>,
    bt_stack: RefCell<Option<Rc<dyn BtStack>>>,
}

/// Socket server session.
///
/// # Example
/// ```ignore
/// let serv = SocketServ::connect();
/// let socket = Socket::new();
/// socket.set_socket_serv(&serv);
/// socket.open_tcp()?;
/// ```
#[derive(Clone)]
pub struct SocketServ(Rc<ServState>);

impl SocketServ {
    /// Opens a new session.
    pub fn connect() -> Self {
        Self(Rc::new(ServState {
            open: Cell::new(true),
            subsessions: Cell::new(0),
            bt_stack: RefCell::new(None),
        }))
    }

    /// Opens a session whose Bluetooth sockets use `stack`.
    pub fn with_bt_stack(stack: Rc<dyn BtStack>) -> Self {
        let serv = Self::connect();
        serv.set_bt_stack(stack);
        serv
    }

    /// Replaces the Bluetooth stack.
    ///
    /// # Panics
    /// If any subsession is open.
    pub fn set_bt_stack(&self, stack: Rc<dyn BtStack>) {
        if self.subsessions() > 0 {
            fatal(Violation::SessionInUse);
        }

        *self.0.bt_stack.borrow_mut() = Some(stack);
    }

    pub fn bt_stack(&self) -> Option<Rc<dyn BtStack>> {
        self.0.bt_stack.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.0.open.get()
    }

    /// Number of sockets, resolvers and connections currently open on this session.
    pub fn subsessions(&self) -> usize {
        self.0.subsessions.get()
    }

    /// Closes the session. Closing a closed session does nothing.
    ///
    /// # Panics
    /// If any subsession is still open.
    pub fn close(&self) {
        if self.subsessions() > 0 {
            fatal(Violation::SessionInUse);
        }

        self.0.open.set(false);
    }

    #[track_caller]
    pub(crate) fn open_subsession(&self, kind: &'static str) -> Subsession {
        if !self.is_open() {
            fatal(Violation::SocketServNotSet);
        }

        self.0.subsessions.set(self.subsessions() + 1);
        tracing::trace!(kind, open = self.subsessions(), "subsession opened");

        Subsession {
            serv: self.clone(),
            kind,
        }
    }
}

impl fmt::Debug for SocketServ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketServ")
            .field("open", &self.is_open())
            .field("subsessions", &self.subsessions())
            .finish()
    }
}

/// An open dependent of a [`SocketServ`]. Closes itself on drop.
pub(crate) struct Subsession {
    serv: SocketServ,
    kind: &'static str,
}

impl Drop for Subsession {
    fn drop(&mut self) {
        let open = self.serv.subsessions().saturating_sub(1);
        self.serv.0.subsessions.set(open);
        tracing::trace!(kind = self.kind, open, "subsession closed");
    }
}

/// The network access point outbound connections originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPoint {
    local_addr: IpAddr,
}

impl AccessPoint {
    pub fn new(local_addr: IpAddr) -> Self {
        Self { local_addr }
    }

    pub fn local_addr(&self) -> IpAddr {
        self.local_addr
    }
}

struct OpenConnection {
    access_point: AccessPoint,
    _subsession: Subsession,
}

struct ConnectionState {
    session: RefCell<Option<OpenConnection>>,
    dependents: Cell<usize>,
}

/// Shared network connection bound to one access point.
#[derive(Clone)]
pub struct Connection(Rc<ConnectionState>);

impl Connection {
    /// Creates a closed connection.
    pub fn new() -> Self {
        Self(Rc::new(ConnectionState {
            session: RefCell::new(None),
            dependents: Cell::new(0),
        }))
    }

    /// Starts the connection over `access_point`.
    ///
    /// The access point's address must be assignable on this host.
    ///
    /// # Panics
    /// If the connection is already open.
    pub fn open(&self, serv: &SocketServ, access_point: AccessPoint) -> Status {
        if self.is_open() {
            fatal(Violation::SessionAlreadyExists);
        }

        let subsession = serv.open_subsession("connection");

        let domain = match access_point.local_addr {
            IpAddr::V4(_) => libc::AF_INET,
            IpAddr::V6(_) => libc::AF_INET6,
        };
        let check = utils::stream_socket(domain)?;
        utils::bind(
            check.as_raw_fd(),
            &SocketAddr::new(access_point.local_addr, 0).into(),
        )?;

        *self.0.session.borrow_mut() = Some(OpenConnection {
            access_point,
            _subsession: subsession,
        });

        tracing::debug!(local = %access_point.local_addr, "connection opened");
        Ok(())
    }

    /// Stops the connection. Closing a closed connection does nothing.
    ///
    /// # Panics
    /// If a socket still depends on it.
    pub fn close(&self) {
        if !self.is_open() {
            return;
        }

        if self.0.dependents.get() > 0 {
            fatal(Violation::SessionInUse);
        }

        self.0.session.borrow_mut().take();
    }

    pub fn is_open(&self) -> bool {
        self.0.session.borrow().is_some()
    }

    pub fn access_point(&self) -> Option<AccessPoint> {
        self.0
            .session
            .borrow()
            .as_ref()
            .map(|open| open.access_point)
    }

    /// Number of open sockets depending on this connection.
    pub fn dependents(&self) -> usize {
        self.0.dependents.get()
    }

    #[track_caller]
    pub(crate) fn attach(&self) -> Dependent {
        let Some(access_point) = self.access_point() else {
            fatal(Violation::ConnectionNotOpen);
        };

        self.0.dependents.set(self.dependents() + 1);

        Dependent {
            connection: self.clone(),
            access_point,
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// A socket's hold on a [`Connection`]. Released on drop.
pub(crate) struct Dependent {
    connection: Connection,
    access_point: AccessPoint,
}

impl Dependent {
    pub(crate) fn access_point(&self) -> AccessPoint {
        self.access_point
    }
}

impl Drop for Dependent {
    fn drop(&mut self) {
        let dependents = self.connection.dependents().saturating_sub(1);
        self.connection.0.dependents.set(dependents);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    #[test]
    fn subsessions_are_counted_until_dropped() {
        let serv = SocketServ::connect();

        let first = serv.open_subsession("socket");
        let second = serv.open_subsession("resolver");
        assert_eq!(serv.subsessions(), 2);

        drop(first);
        drop(second);
        assert_eq!(serv.subsessions(), 0);

        serv.close();
        assert!(!serv.is_open());
    }

    #[test]
    #[should_panic(expected = "session in use")]
    fn closing_serv_with_open_subsession_is_fatal() {
        let serv = SocketServ::connect();
        let _socket = serv.open_subsession("socket");

        serv.close();
    }

    #[test]
    #[should_panic(expected = "session already exists")]
    fn opening_connection_twice_is_fatal() {
        let serv = SocketServ::connect();
        let connection = Connection::new();
        let access_point = AccessPoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST));

        connection.open(&serv, access_point).expect("open");
        let _ = connection.open(&serv, access_point);
    }

    #[test]
    fn connection_tracks_dependents() {
        let serv = SocketServ::connect();
        let connection = Connection::new();
        connection
            .open(&serv, AccessPoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .expect("open");

        let dependent = connection.attach();
        assert_eq!(connection.dependents(), 1);
        assert_eq!(
            dependent.access_point().local_addr(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );

        drop(dependent);
        connection.close();
        assert!(!connection.is_open());
        assert_eq!(serv.subsessions(), 0);
    }
}
