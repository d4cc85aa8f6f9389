//! Socket addresses and thin wrappers over the socket syscalls.
//!
//! Every descriptor created here is non-blocking and close-on-exec. Calls
//! return `io::Result` so callers can tell `WouldBlock` apart from real errors.

use crate::reactor::event::{set_cloexec, set_nonblocking};

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use libc::{sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, sockaddr_un, socklen_t};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// An address of any family the engine talks to.
#[derive(Clone)]
pub struct SockAddr {
    storage: sockaddr_storage,
    len: socklen_t,
}

impl SockAddr {
    /// Unix-domain stream address at `path`.
    pub fn unix(path: &Path) -> io::Result<Self> {
        let bytes = path.as_os_str().as_bytes();
        let mut address: sockaddr_un = unsafe { mem::zeroed() };

        if bytes.len() >= address.sun_path.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unix socket path too long",
            ));
        }

        address.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (target, byte) in address.sun_path.iter_mut().zip(bytes) {
            *target = *byte as libc::c_char;
        }

        let len = mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
        Ok(unsafe { Self::from_raw(&address as *const _ as *const sockaddr, len as socklen_t) })
    }

    /// Copies `len` bytes of a raw socket address.
    ///
    /// # Safety
    /// `address` must point to at least `len` readable bytes of a valid
    /// socket address, and `len` must not exceed `sockaddr_storage`.
    pub unsafe fn from_raw(address: *const sockaddr, len: socklen_t) -> Self {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let len = len.min(mem::size_of::<sockaddr_storage>() as socklen_t);

        unsafe {
            std::ptr::copy_nonoverlapping(
                address as *const u8,
                &mut storage as *mut _ as *mut u8,
                len as usize,
            );
        }

        Self { storage, len }
    }

    pub fn family(&self) -> libc::c_int {
        self.storage.ss_family as libc::c_int
    }

    pub(crate) fn as_ptr(&self) -> *const sockaddr {
        &self.storage as *const _ as *const sockaddr
    }

    pub(crate) fn len(&self) -> socklen_t {
        self.len
    }

    /// The IP address, if this is an inet address.
    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self.family() {
            libc::AF_INET => {
                let address = unsafe { &*(self.as_ptr() as *const sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(address.sin_addr.s_addr));
                Some(SocketAddr::V4(SocketAddrV4::new(
                    ip,
                    u16::from_be(address.sin_port),
                )))
            }
            libc::AF_INET6 => {
                let address = unsafe { &*(self.as_ptr() as *const sockaddr_in6) };
                let ip = Ipv6Addr::from(address.sin6_addr.s6_addr);
                Some(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    u16::from_be(address.sin6_port),
                    address.sin6_flowinfo,
                    address.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(address: SocketAddr) -> Self {
        match address {
            SocketAddr::V4(v4) => {
                let mut raw: sockaddr_in = unsafe { mem::zeroed() };
                raw.sin_family = libc::AF_INET as libc::sa_family_t;
                raw.sin_port = v4.port().to_be();
                raw.sin_addr = libc::in_addr {
                    s_addr: u32::from(*v4.ip()).to_be(),
                };

                unsafe {
                    Self::from_raw(
                        &raw as *const _ as *const sockaddr,
                        mem::size_of::<sockaddr_in>() as socklen_t,
                    )
                }
            }
            SocketAddr::V6(v6) => {
                let mut raw: sockaddr_in6 = unsafe { mem::zeroed() };
                raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                raw.sin6_port = v6.port().to_be();
                raw.sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                raw.sin6_flowinfo = v6.flowinfo();
                raw.sin6_scope_id = v6.scope_id();

                unsafe {
                    Self::from_raw(
                        &raw as *const _ as *const sockaddr,
                        mem::size_of::<sockaddr_in6>() as socklen_t,
                    )
                }
            }
        }
    }
}

impl std::fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_socket_addr() {
            Some(address) => write!(f, "{address}"),
            None => write!(f, "SockAddr(family {})", self.family()),
        }
    }
}

fn check(result: libc::c_int) -> io::Result<libc::c_int> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

fn check_size(result: isize) -> io::Result<usize> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result as usize)
    }
}

fn prepare(fd: OwnedFd) -> io::Result<OwnedFd> {
    set_nonblocking(fd.as_raw_fd())?;
    set_cloexec(fd.as_raw_fd())?;

    #[cfg(target_vendor = "apple")]
    set_option(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;

    Ok(fd)
}

/// Creates a non-blocking stream socket in `domain`.
pub(crate) fn stream_socket(domain: libc::c_int) -> io::Result<OwnedFd> {
    let fd = check(unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) })?;
    prepare(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn set_option(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    check(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as socklen_t,
        )
    })?;

    Ok(())
}

pub(crate) fn bind(fd: RawFd, address: &SockAddr) -> io::Result<()> {
    check(unsafe { libc::bind(fd, address.as_ptr(), address.len()) })?;
    Ok(())
}

pub(crate) fn listen(fd: RawFd, backlog: u32) -> io::Result<()> {
    let backlog = backlog.min(libc::c_int::MAX as u32) as libc::c_int;
    check(unsafe { libc::listen(fd, backlog) })?;
    Ok(())
}

/// Starts a connect. `Ok(true)` means connected, `Ok(false)` in progress.
pub(crate) fn connect(fd: RawFd, address: &SockAddr) -> io::Result<bool> {
    match check(unsafe { libc::connect(fd, address.as_ptr(), address.len()) }) {
        Ok(_) => Ok(true),
        Err(error) => match error.raw_os_error() {
            Some(libc::EISCONN) => Ok(true),
            Some(libc::EINPROGRESS) | Some(libc::EALREADY) | Some(libc::EAGAIN) => Ok(false),
            Some(libc::EINTR) => Ok(false),
            _ => Err(error),
        },
    }
}

/// Accepts one pending connection as a non-blocking descriptor.
pub(crate) fn accept(fd: RawFd) -> io::Result<OwnedFd> {
    let client = check(unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) })?;
    prepare(unsafe { OwnedFd::from_raw_fd(client) })
}

/// Pending socket error (`SO_ERROR`), consumed.
pub(crate) fn take_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as socklen_t;

    check(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut value as *mut _ as *mut libc::c_void,
            &mut len,
        )
    })?;

    Ok((value != 0).then(|| io::Error::from_raw_os_error(value)))
}

pub(crate) fn recv(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    check_size(unsafe { libc::recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) })
}

pub(crate) fn send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    check_size(unsafe { libc::send(fd, buffer.as_ptr() as *const _, buffer.len(), SEND_FLAGS) })
}

pub(crate) fn shutdown_write(fd: RawFd) -> io::Result<()> {
    check(unsafe { libc::shutdown(fd, libc::SHUT_WR) })?;
    Ok(())
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SockAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    check(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;

    Ok(SockAddr { storage, len })
}

/// Blocks the calling thread until `fd` is ready for `events`.
pub(crate) fn wait_ready(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let timeout_ms = timeout.map_or(-1, |duration| duration.as_millis().min(i32::MAX as u128) as i32);

    loop {
        match check(unsafe { libc::poll(&mut pollfd, 1, timeout_ms) }) {
            Ok(ready) => return Ok(ready > 0),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}
