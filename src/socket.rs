//! The socket engine.
//!
//! A [`Socket`] is opened against a [`SocketServ`] in one of three modes:
//!
//! - [`Mode::Blank`]: no transport of its own; the target of an accept
//! - [`Mode::Tcp`]: IPv4 stream socket
//! - [`Mode::Bt`]: RFCOMM stream socket of the session's Bluetooth stack
//!
//! Asynchronous requests take a callback and an opaque parameter. The
//! callback runs exactly once on the reactor thread, inside the execution
//! context that was current when the request was issued, with either the
//! result or the error. A request that fails before it starts is reported
//! through the same callback on a later turn, never by the requesting call.
//!
//! One request of each kind (read, write, connect, accept, configure) may be
//! pending at a time; issuing a second one is fatal. So is using a socket
//! before it is opened or in the wrong mode.

use crate::bt::accepter::BtAccepter;
use crate::bt::connecter::BtConnecter;
use crate::bt::{BtAddr, BtStack};
use crate::error::{Error, Status, Violation, fatal};
use crate::net::connecter::ResolvingConnecter;
use crate::net::resolver::resolve;
use crate::net::session::{Connection, Dependent, SocketServ, Subsession};
use crate::net::tasks::{ObserverRef, SocketAccepter, SocketObserver, SocketReader, SocketWriter};
use crate::net::utils::{self, SockAddr};
use crate::reactor::handle::ReactorHandle;
use crate::runtime::callback::Callback;

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

/// Transport a socket is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Blank,
    Tcp,
    Bt,
}

impl Mode {
    fn subsession_kind(self) -> &'static str {
        match self {
            Mode::Blank => "blank-socket",
            Mode::Tcp => "tcp-socket",
            Mode::Bt => "bt-socket",
        }
    }
}

struct OpenSocket {
    mode: Mode,
    fd: Option<OwnedFd>,
    source: Option<IpAddr>,
    stack: Option<Rc<dyn BtStack>>,
    listening: bool,
    _subsession: Subsession,
    _dependent: Option<Dependent>,
}

/// Callback of the one pending request of a kind.
struct Pending<A>(RefCell<Option<Callback<A>>>);

impl<A: 'static> Pending<A> {
    fn new() -> Self {
        Self(RefCell::new(None))
    }

    fn is_armed(&self) -> bool {
        self.0.borrow().is_some()
    }

    #[track_caller]
    fn arm(&self, callback: Callback<A>) {
        if self.is_armed() {
            fatal(Violation::RequestAlreadyPending);
        }

        *self.0.borrow_mut() = Some(callback);
    }

    fn deliver(&self, args: A) {
        let callback = self.0.borrow_mut().take();
        if let Some(callback) = callback {
            callback.invoke(args);
        }
    }
}

struct Engine {
    me: Weak<Engine>,
    reactor: ReactorHandle,
    serv: RefCell<Option<SocketServ>>,
    connection: RefCell<Option<Connection>>,
    state: RefCell<Option<OpenSocket>>,

    reader: RefCell<Option<Rc<SocketReader>>>,
    writer: RefCell<Option<Rc<SocketWriter>>>,
    tcp_accepter: RefCell<Option<Rc<SocketAccepter>>>,
    bt_accepter: RefCell<Option<Rc<BtAccepter>>>,
    connecter: RefCell<Option<Rc<ResolvingConnecter>>>,
    bt_connecter: RefCell<Option<Rc<BtConnecter>>>,

    read: Pending<Result<Vec<u8>, Error>>,
    write: Pending<Status>,
    connect: Pending<Status>,
    config: Pending<Status>,
    accept: Pending<Result<Socket, Error>>,
    accept_target: RefCell<Option<Socket>>,
}

/// A TCP or Bluetooth stream socket driven by this thread's reactor.
///
/// Clones are handles to the same socket.
///
/// # Example
/// ```ignore
/// let reactor = Reactor::new()?;
/// let serv = SocketServ::connect();
///
/// let socket = Socket::new();
/// socket.set_socket_serv(&serv);
/// socket.open_tcp()?;
/// socket.connect_tcp("localhost", 8080, |status, _| println!("{status:?}"), ());
/// reactor.run()?;
/// ```
#[derive(Clone)]
pub struct Socket(Rc<Engine>);

impl Socket {
    /// Creates a closed socket on this thread's reactor.
    ///
    /// # Panics
    /// If no reactor is installed on this thread.
    #[track_caller]
    pub fn new() -> Self {
        let reactor = ReactorHandle::current();

        Self(Rc::new_cyclic(|me| Engine {
            me: me.clone(),
            reactor,
            serv: RefCell::new(None),
            connection: RefCell::new(None),
            state: RefCell::new(None),
            reader: RefCell::new(None),
            writer: RefCell::new(None),
            tcp_accepter: RefCell::new(None),
            bt_accepter: RefCell::new(None),
            connecter: RefCell::new(None),
            bt_connecter: RefCell::new(None),
            read: Pending::new(),
            write: Pending::new(),
            connect: Pending::new(),
            config: Pending::new(),
            accept: Pending::new(),
            accept_target: RefCell::new(None),
        }))
    }

    /// Binds the session the socket is opened against.
    ///
    /// # Panics
    /// While the socket is open.
    #[track_caller]
    pub fn set_socket_serv(&self, serv: &SocketServ) {
        if self.is_open() {
            fatal(Violation::SessionInUse);
        }

        *self.0.serv.borrow_mut() = Some(serv.clone());
    }

    /// Binds the connection whose access point outbound TCP connects use.
    ///
    /// # Panics
    /// While the socket is open.
    #[track_caller]
    pub fn set_connection(&self, connection: &Connection) {
        if self.is_open() {
            fatal(Violation::SessionInUse);
        }

        *self.0.connection.borrow_mut() = Some(connection.clone());
    }

    pub fn socket_serv(&self) -> Option<SocketServ> {
        self.0.serv.borrow().clone()
    }

    pub fn connection(&self) -> Option<Connection> {
        self.0.connection.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.0.state.borrow().is_some()
    }

    /// Mode the socket is open in, `None` when closed.
    pub fn mode(&self) -> Option<Mode> {
        self.0.state.borrow().as_ref().map(|open| open.mode)
    }

    /// Whether a listen has succeeded since the socket was opened.
    pub fn is_listening(&self) -> bool {
        self.0
            .state
            .borrow()
            .as_ref()
            .is_some_and(|open| open.listening)
    }

    /// Opens the socket without a transport, as an accept target.
    #[track_caller]
    pub fn open_blank(&self) -> Status {
        self.0.open(Mode::Blank)
    }

    #[track_caller]
    pub fn open_tcp(&self) -> Status {
        self.0.open(Mode::Tcp)
    }

    /// Opens an RFCOMM socket of the session's Bluetooth stack.
    ///
    /// Fails with [`Error::NotSupported`] if the session has no stack.
    #[track_caller]
    pub fn open_bt(&self) -> Status {
        self.0.open(Mode::Bt)
    }

    /// Resolves, binds and listens, synchronously.
    ///
    /// An empty `host` listens on every local address. Any failure closes
    /// the socket, keeping its session bindings.
    ///
    /// # Arguments
    /// * `host` - Local name or address to bind
    /// * `port` - Local port, `0` for any
    /// * `backlog` - Pending connection queue length
    #[track_caller]
    pub fn listen_tcp(&self, host: &str, port: u16, backlog: u32) -> Status {
        let fd = self.0.transport(Mode::Tcp);

        let result = self.0.bind_and_listen(fd, host, port, backlog);
        match result {
            Ok(()) => {
                self.0.set_listening();
                tracing::debug!(host, port, "tcp listening");
            }
            Err(error) => {
                tracing::debug!(host, port, %error, "tcp listen failed");
                self.0.close_subsession();
            }
        }

        result
    }

    /// Binds to RFCOMM `channel` and listens, synchronously.
    ///
    /// `service_id` and `service_name` are advertised by a later
    /// [`config_bt`](Self::config_bt).
    #[track_caller]
    pub fn listen_bt(&self, channel: u8, backlog: u32, service_id: u32, service_name: &str) -> Status {
        let fd = self.0.transport(Mode::Bt);

        self.0
            .bt_accepter()
            .listen(fd, channel, backlog, service_id, service_name)?;
        self.0.set_listening();

        Ok(())
    }

    /// Asks the Bluetooth stack for a free RFCOMM channel.
    #[track_caller]
    pub fn get_available_bt_port(&self) -> Result<u8, Error> {
        let fd = self.0.transport(Mode::Bt);
        self.0.bt_accepter().available_channel(fd)
    }

    /// Port the socket is bound to.
    #[track_caller]
    pub fn local_port(&self) -> Result<u16, Error> {
        let fd = self.0.transport(Mode::Tcp);

        utils::local_addr(fd)?
            .as_socket_addr()
            .map(|address| address.port())
            .ok_or(Error::NotSupported)
    }

    /// Connects to `host:port`, resolving `host` first unless it is the
    /// loopback name.
    ///
    /// With a bound [`Connection`], the socket is bound to its access point
    /// before connecting. A failed connect leaves the socket open.
    #[track_caller]
    pub fn connect_tcp<P, F>(&self, host: &str, port: u16, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Status, P) + 'static,
    {
        let fd = self.0.transport(Mode::Tcp);
        self.0.connect.arm(Callback::new(callback, param));

        let source = self.0.state.borrow().as_ref().and_then(|open| open.source);
        let me = self.0.me.clone();

        self.0.connecter().connect(fd, host, port, source, move |status| {
            if let Some(engine) = me.upgrade() {
                engine.client_connected(status);
            }
        });
    }

    /// Connects to RFCOMM `channel` on the device at `address`.
    ///
    /// # Panics
    /// If `address` is not six colon-separated hex octets.
    #[track_caller]
    pub fn connect_bt<P, F>(&self, address: &str, channel: u8, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Status, P) + 'static,
    {
        let fd = self.0.transport(Mode::Bt);
        let device = BtAddr::parse(address);
        self.0.connect.arm(Callback::new(callback, param));

        let stack = self.0.bt_stack();
        let me = self.0.me.clone();
        self.0
            .bt_connecter()
            .connect(fd, &*stack, device, channel, move |status| {
                if let Some(engine) = me.upgrade() {
                    engine.client_connected(status);
                }
            });
    }

    /// Accepts one client into `blank`.
    ///
    /// On success the callback receives `blank`, now connected but still in
    /// [`Mode::Blank`].
    ///
    /// # Panics
    /// Before a successful listen, or if `blank` is not open in blank mode.
    #[track_caller]
    pub fn accept<P, F>(&self, blank: &Socket, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Result<Socket, Error>, P) + 'static,
    {
        let (mode, fd) = self.0.checked(None);
        let (true, Some(fd)) = (self.is_listening(), fd) else {
            fatal(Violation::AcceptBeforeListen);
        };
        match blank.mode() {
            Some(Mode::Blank) => {}
            Some(_) => fatal(Violation::WrongTransportMode),
            None => fatal(Violation::SocketNotOpen),
        }

        self.0.accept.arm(Callback::new(callback, param));
        *self.0.accept_target.borrow_mut() = Some(blank.clone());

        match mode {
            Mode::Bt => self.0.bt_accepter().accept(fd),
            _ => self.0.tcp_accepter().accept(fd),
        }
    }

    /// Registers security and publishes the service record of a listening
    /// Bluetooth socket.
    ///
    /// # Panics
    /// Before a successful [`listen_bt`](Self::listen_bt).
    #[track_caller]
    pub fn config_bt<P, F>(&self, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Status, P) + 'static,
    {
        self.0.transport(Mode::Bt);
        if !self.is_listening() {
            fatal(Violation::ConfigBeforeListen);
        }

        self.0.config.arm(Callback::new(callback, param));

        self.0.bt_accepter().configure();
    }

    /// Reads exactly `size` bytes.
    ///
    /// Completes with [`Error::Eof`] if the stream ends first, and with
    /// [`Error::NoMemory`] if `size` exceeds the reactor's read limit.
    #[track_caller]
    pub fn read_exact<P, F>(&self, size: usize, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Result<Vec<u8>, Error>, P) + 'static,
    {
        self.0.start_read(size, Callback::new(callback, param), true);
    }

    /// Reads whatever is available, at least one and at most `max_size` bytes.
    #[track_caller]
    pub fn read_some<P, F>(&self, max_size: usize, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Result<Vec<u8>, Error>, P) + 'static,
    {
        self.0.start_read(max_size, Callback::new(callback, param), false);
    }

    /// Writes all of `data`.
    #[track_caller]
    pub fn write<P, F>(&self, data: impl Into<Vec<u8>>, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Status, P) + 'static,
    {
        let (_, fd) = self.0.checked(None);
        self.0.write.arm(Callback::new(callback, param));

        let writer = self.0.writer();
        match fd {
            Some(fd) => writer.write(fd, data.into()),
            None => writer.fail(Error::NotConnected),
        }
    }

    /// Cancels a pending read. Does nothing if none is pending.
    pub fn cancel_read(&self) {
        let reader = self.0.reader.borrow().clone();
        if let Some(reader) = reader {
            reader.cancel();
        }
    }

    pub fn cancel_write(&self) {
        let writer = self.0.writer.borrow().clone();
        if let Some(writer) = writer {
            writer.cancel();
        }
    }

    pub fn cancel_connect(&self) {
        let connecter = self.0.connecter.borrow().clone();
        if let Some(connecter) = connecter {
            connecter.cancel();
        }

        let bt_connecter = self.0.bt_connecter.borrow().clone();
        if let Some(bt_connecter) = bt_connecter {
            bt_connecter.cancel();
        }
    }

    /// Cancels a pending accept.
    ///
    /// On a Bluetooth socket this also cancels a pending configure.
    pub fn cancel_accept(&self) {
        let accepter = self.0.tcp_accepter.borrow().clone();
        if let Some(accepter) = accepter {
            accepter.cancel();
        }

        self.cancel_config();
    }

    /// Cancels a pending configure.
    ///
    /// This also cancels a pending Bluetooth accept.
    pub fn cancel_config(&self) {
        let accepter = self.0.bt_accepter.borrow().clone();
        if let Some(accepter) = accepter {
            accepter.cancel();
        }
    }

    /// Shuts down the sending direction.
    #[track_caller]
    pub fn send_eof(&self) -> Status {
        let fd = self.0.stream()?;
        utils::shutdown_write(fd)?;
        Ok(())
    }

    /// Blocks until at least one byte, or end of stream, is available.
    ///
    /// # Returns
    /// Up to `max_size` bytes; an empty buffer at end of stream or when
    /// `max_size` is zero.
    #[track_caller]
    pub fn sync_read(&self, max_size: usize) -> Result<Vec<u8>, Error> {
        let fd = self.0.stream()?;
        if max_size == 0 {
            return Ok(Vec::new());
        }
        if max_size > self.0.reactor.config().max_read_size {
            return Err(Error::NoMemory);
        }

        let mut buffer = vec![0u8; max_size];
        loop {
            match utils::recv(fd, &mut buffer) {
                Ok(received) => {
                    buffer.truncate(received);
                    return Ok(buffer);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    utils::wait_ready(fd, libc::POLLIN, None)?;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Blocks until all of `data` is sent.
    #[track_caller]
    pub fn sync_write(&self, data: &[u8]) -> Status {
        let fd = self.0.stream()?;

        let mut written = 0;
        while written < data.len() {
            match utils::send(fd, &data[written..]) {
                Ok(sent) => written += sent,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    utils::wait_ready(fd, libc::POLLOUT, None)?;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into()),
            }
        }

        Ok(())
    }

    /// Closes the socket and releases its session bindings.
    ///
    /// Every pending request completes with [`Error::Cancelled`] first.
    pub fn close(&self) {
        self.0.close_subsession();

        self.0.connection.borrow_mut().take();
        self.0.serv.borrow_mut().take();
    }

    /// Closes the socket, keeping its session bindings for a later open.
    pub fn close_keep_session(&self) {
        self.0.close_subsession();
    }

    /// Whether the two handles refer to the same socket.
    pub fn same_as(&self, other: &Socket) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Descriptor of the socket's transport, if it has one.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.0.checked_fd()
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("mode", &self.mode())
            .field("fd", &self.raw_fd())
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl Engine {
    #[track_caller]
    fn open(&self, mode: Mode) -> Status {
        if self.state.borrow().is_some() {
            self.close_subsession();
        }

        let Some(serv) = self.serv.borrow().clone() else {
            fatal(Violation::SocketServNotSet);
        };
        let subsession = serv.open_subsession(mode.subsession_kind());

        let dependent = match (mode, self.connection.borrow().as_ref()) {
            (Mode::Tcp, Some(connection)) => Some(connection.attach()),
            _ => None,
        };
        let source = dependent
            .as_ref()
            .map(|dependent| dependent.access_point().local_addr());

        let (fd, stack) = match mode {
            Mode::Blank => (None, None),
            Mode::Tcp => (Some(utils::stream_socket(libc::AF_INET)?), None),
            Mode::Bt => {
                let stack = serv.bt_stack().ok_or(Error::NotSupported)?;
                (Some(stack.open_socket()?), Some(stack))
            }
        };

        tracing::debug!(?mode, fd = ?fd.as_ref().map(AsRawFd::as_raw_fd), "socket opened");

        *self.state.borrow_mut() = Some(OpenSocket {
            mode,
            fd,
            source,
            stack,
            listening: false,
            _subsession: subsession,
            _dependent: dependent,
        });

        Ok(())
    }

    /// Mode and descriptor of the open socket.
    ///
    /// # Panics
    /// If the socket is closed, or `expected` names another mode.
    #[track_caller]
    fn checked(&self, expected: Option<Mode>) -> (Mode, Option<RawFd>) {
        let state = self.state.borrow();
        let Some(open) = state.as_ref() else {
            fatal(Violation::SocketNotOpen);
        };

        if expected.is_some_and(|mode| mode != open.mode) {
            fatal(Violation::WrongTransportMode);
        }

        (open.mode, open.fd.as_ref().map(AsRawFd::as_raw_fd))
    }

    fn checked_fd(&self) -> Option<RawFd> {
        self.state
            .borrow()
            .as_ref()
            .and_then(|open| open.fd.as_ref())
            .map(AsRawFd::as_raw_fd)
    }

    /// Descriptor of a socket open in `mode`; every such socket has one.
    #[track_caller]
    fn transport(&self, mode: Mode) -> RawFd {
        match self.checked(Some(mode)) {
            (_, Some(fd)) => fd,
            (_, None) => fatal(Violation::WrongTransportMode),
        }
    }

    /// Descriptor of a stream in any mode; a blank socket has none until
    /// it accepts a client.
    #[track_caller]
    fn stream(&self) -> Result<RawFd, Error> {
        self.checked(None).1.ok_or(Error::NotConnected)
    }

    /// Stack of a socket open in Bluetooth mode.
    #[track_caller]
    fn bt_stack(&self) -> Rc<dyn BtStack> {
        let stack = self
            .state
            .borrow()
            .as_ref()
            .and_then(|open| open.stack.clone());

        match stack {
            Some(stack) => stack,
            None => fatal(Violation::WrongTransportMode),
        }
    }

    fn set_listening(&self) {
        if let Some(open) = self.state.borrow_mut().as_mut() {
            open.listening = true;
        }
    }

    fn bind_and_listen(&self, fd: RawFd, host: &str, port: u16, backlog: u32) -> Status {
        let address = if host.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            let serv = self.serv.borrow().clone();
            match serv {
                Some(serv) => resolve(&serv, host)?,
                None => return Err(Error::NotConnected),
            }
        };

        utils::set_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
        utils::bind(fd, &SockAddr::from(SocketAddr::new(address, port)))?;
        utils::listen(fd, backlog)?;

        Ok(())
    }

    #[track_caller]
    fn start_read(&self, size: usize, callback: Callback<Result<Vec<u8>, Error>>, exact: bool) {
        let (_, fd) = self.checked(None);
        self.read.arm(callback);

        let reader = self.reader();
        match fd {
            None => reader.fail(Error::NotConnected),
            Some(_) if size > self.reactor.config().max_read_size => reader.fail(Error::NoMemory),
            Some(fd) if exact => reader.read_exact(fd, size),
            Some(fd) => reader.read_some(fd, size),
        }
    }

    fn observer(&self) -> ObserverRef {
        self.me.clone()
    }

    fn reader(&self) -> Rc<SocketReader> {
        self.reader
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(SocketReader::new(self.observer())))
            .clone()
    }

    fn writer(&self) -> Rc<SocketWriter> {
        self.writer
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(SocketWriter::new(self.observer())))
            .clone()
    }

    fn tcp_accepter(&self) -> Rc<SocketAccepter> {
        self.tcp_accepter
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(SocketAccepter::new(self.observer())))
            .clone()
    }

    #[track_caller]
    fn bt_accepter(&self) -> Rc<BtAccepter> {
        if let Some(accepter) = self.bt_accepter.borrow().as_ref() {
            return accepter.clone();
        }

        let accepter = BtAccepter::new(self.bt_stack(), self.observer());
        *self.bt_accepter.borrow_mut() = Some(accepter.clone());

        accepter
    }

    fn connecter(&self) -> Rc<ResolvingConnecter> {
        let serv = self.serv.borrow().clone();

        self.connecter
            .borrow_mut()
            .get_or_insert_with(|| {
                Rc::new(ResolvingConnecter::new(serv.unwrap_or_else(SocketServ::connect)))
            })
            .clone()
    }

    fn bt_connecter(&self) -> Rc<BtConnecter> {
        self.bt_connecter
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(BtConnecter::new()))
            .clone()
    }

    /// Gives a blank socket the descriptor of an accepted client.
    fn adopt(&self, fd: OwnedFd) -> bool {
        match self.state.borrow_mut().as_mut() {
            Some(open) if open.mode == Mode::Blank && open.fd.is_none() => {
                open.fd = Some(fd);
                true
            }
            _ => false,
        }
    }

    /// Cancels every pending request, drops the tasks and the descriptor.
    fn close_subsession(&self) {
        let tasks = (
            self.reader.borrow().clone(),
            self.writer.borrow().clone(),
            self.tcp_accepter.borrow().clone(),
            self.bt_accepter.borrow().clone(),
            self.connecter.borrow().clone(),
            self.bt_connecter.borrow().clone(),
        );

        if let Some(reader) = &tasks.0 {
            reader.cancel();
        }
        if let Some(writer) = &tasks.1 {
            writer.cancel();
        }
        if let Some(accepter) = &tasks.2 {
            accepter.cancel();
        }
        if let Some(accepter) = &tasks.3 {
            accepter.cancel();
        }
        if let Some(connecter) = &tasks.4 {
            connecter.cancel();
        }
        if let Some(connecter) = &tasks.5 {
            connecter.cancel();
        }
        drop(tasks);

        let released = (
            self.reader.borrow_mut().take(),
            self.writer.borrow_mut().take(),
            self.tcp_accepter.borrow_mut().take(),
            self.bt_accepter.borrow_mut().take(),
            self.connecter.borrow_mut().take(),
            self.bt_connecter.borrow_mut().take(),
        );
        drop(released);

        let Some(open) = self.state.borrow_mut().take() else {
            return;
        };

        if let Some(fd) = &open.fd {
            self.reactor.deregister(fd.as_raw_fd());
        }

        tracing::debug!(mode = ?open.mode, "socket closed");
    }
}

impl SocketObserver for Engine {
    fn data_written(&self, status: Status) {
        self.write.deliver(status);
    }

    fn data_read(&self, result: Result<Vec<u8>, Error>) {
        self.read.deliver(result);
    }

    fn client_accepted(&self, result: Result<OwnedFd, Error>) {
        let target = self.accept_target.borrow_mut().take();

        let result = match (result, target) {
            (Ok(fd), Some(target)) => {
                if target.0.adopt(fd) {
                    tracing::debug!(fd = ?target.raw_fd(), "client accepted");
                    Ok(target)
                } else {
                    Err(Error::NotConnected)
                }
            }
            (Ok(_), None) => Err(Error::NotConnected),
            (Err(error), _) => Err(error),
        };

        self.accept.deliver(result);
    }

    fn client_connected(&self, status: Status) {
        self.connect.deliver(status);
    }

    fn socket_configured(&self, status: Status) {
        self.config.deliver(status);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Task handlers can no longer reach the engine; report to the slots directly.
        self.read.deliver(Err(Error::Cancelled));
        self.write.deliver(Err(Error::Cancelled));
        self.connect.deliver(Err(Error::Cancelled));
        self.config.deliver(Err(Error::Cancelled));
        self.accept.deliver(Err(Error::Cancelled));
        self.accept_target.get_mut().take();

        if let Some(open) = self.state.get_mut().take() {
            if let Some(fd) = &open.fd {
                self.reactor.deregister(fd.as_raw_fd());
            }
        }
    }
}
