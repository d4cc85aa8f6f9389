//! Readiness polling over `poll(2)` and the reactor's self-pipe.
//!
//! Interest is one-shot: once a descriptor reports readiness for a direction,
//! the waker registered for that direction is handed back to the caller and
//! forgotten. Futures re-register every time they return `Poll::Pending`.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::task::Waker;
use std::time::Duration;

use libc::{F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, fcntl};

/// Direction a future waits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Interest {
    Read,
    Write,
}

#[derive(Default)]
struct Registration {
    read: Option<Waker>,
    write: Option<Waker>,
}

/// Registry of descriptors and the wakers waiting on them.
pub(crate) struct Poller {
    registry: HashMap<RawFd, Registration>,
    pollfds: Vec<libc::pollfd>,
}

impl Poller {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: HashMap::with_capacity(capacity),
            pollfds: Vec::with_capacity(capacity + 1),
        }
    }

    /// Registers `waker` to be woken when `fd` becomes ready for `interest`.
    ///
    /// A later registration for the same direction replaces the earlier waker.
    pub(crate) fn register(&mut self, fd: RawFd, interest: Interest, waker: Waker) {
        let entry = self.registry.entry(fd).or_default();

        match interest {
            Interest::Read => entry.read = Some(waker),
            Interest::Write => entry.write = Some(waker),
        }
    }

    /// Forgets every waker registered for `fd`.
    pub(crate) fn deregister(&mut self, fd: RawFd) {
        self.registry.remove(&fd);
    }

    pub(crate) fn clear(&mut self) {
        self.registry.clear();
    }

    /// Waits until a registered descriptor or `wake_fd` is ready, or `timeout` passes.
    ///
    /// `None` blocks indefinitely. Returns the wakers whose interest fired;
    /// error and hang-up conditions fire both directions.
    pub(crate) fn wait(
        &mut self,
        wake_fd: RawFd,
        timeout: Option<Duration>,
    ) -> io::Result<Vec<Waker>> {
        self.pollfds.clear();
        self.pollfds.push(libc::pollfd {
            fd: wake_fd,
            events: libc::POLLIN,
            revents: 0,
        });

        for (fd, registration) in &self.registry {
            let mut events = 0;
            if registration.read.is_some() {
                events |= libc::POLLIN;
            }
            if registration.write.is_some() {
                events |= libc::POLLOUT;
            }

            self.pollfds.push(libc::pollfd {
                fd: *fd,
                events,
                revents: 0,
            });
        }

        let timeout_ms = match timeout {
            None => -1,
            Some(duration) => {
                let millis = duration.as_nanos().div_ceil(1_000_000);
                millis.min(i32::MAX as u128) as i32
            }
        };

        let result = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if result < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }

            return Err(error);
        }

        let mut woken = Vec::new();
        if result == 0 {
            return Ok(woken);
        }

        for pollfd in self.pollfds.iter().skip(1) {
            if pollfd.revents == 0 {
                continue;
            }

            let Some(registration) = self.registry.get_mut(&pollfd.fd) else {
                continue;
            };

            let failed = pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;

            if pollfd.revents & libc::POLLIN != 0 || failed {
                woken.extend(registration.read.take());
            }
            if pollfd.revents & libc::POLLOUT != 0 || failed {
                woken.extend(registration.write.take());
            }

            if registration.read.is_none() && registration.write.is_none() {
                self.registry.remove(&pollfd.fd);
            }
        }

        Ok(woken)
    }
}

/// Self-pipe used to interrupt a blocking [`Poller::wait`] from any thread.
pub(crate) struct Notifier {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl Notifier {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let reader = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let writer = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        for fd in [reader.as_raw_fd(), writer.as_raw_fd()] {
            set_nonblocking(fd)?;
            set_cloexec(fd)?;
        }

        Ok(Self { reader, writer })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub(crate) fn notify(&self) {
        let byte = [1u8];
        // A full pipe already guarantees a pending wakeup.
        unsafe {
            libc::write(self.writer.as_raw_fd(), byte.as_ptr() as *const _, 1);
        }
    }

    pub(crate) fn drain(&self) {
        let mut buffer = [0u8; 64];
        loop {
            let read = unsafe {
                libc::read(
                    self.reader.as_raw_fd(),
                    buffer.as_mut_ptr() as *mut _,
                    buffer.len(),
                )
            };

            if read <= 0 {
                break;
            }
        }
    }
}

/// Puts `fd` into non-blocking mode.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
