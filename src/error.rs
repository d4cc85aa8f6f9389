//! Error types for socket operations and contract violations.
//!
//! Two kinds of failure exist in this crate:
//!
//! - [`Error`]: recoverable statuses (OS errors, cancellation, end of stream).
//!   They are returned by synchronous entry points or delivered through the
//!   completion callback of asynchronous ones. They are never escalated.
//! - [`Violation`]: misuse of the API (double-pending requests, wrong transport
//!   mode, missing session). These are fatal: [`fatal`] logs the violation and
//!   panics with a stable message.

use std::any::Any;
use std::fmt;
use std::io;

use thiserror::Error;

/// Recoverable status delivered to callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// A name, record or service could not be found.
    #[error("not found")]
    NotFound,

    /// The peer closed the stream.
    #[error("end of stream")]
    Eof,

    /// The socket has no connected transport yet.
    #[error("socket not connected")]
    NotConnected,

    /// The operation is not supported by the session or transport.
    #[error("operation not supported")]
    NotSupported,

    /// A buffer of the requested size could not be provided.
    #[error("request exceeds the read size limit")]
    NoMemory,

    /// A caller-supplied value was rejected by the OS or stack.
    #[error("invalid input")]
    InvalidInput,

    /// Raw OS error number, passed through unchanged.
    #[error("os error {0}")]
    Os(i32),

    /// An I/O failure without an OS error number.
    #[error("i/o error: {0:?}")]
    Io(io::ErrorKind),
}

/// Outcome of an operation that carries no payload.
pub type Status = Result<(), Error>;

impl Error {
    /// Numeric status in the errno space, `ECANCELED` for cancellation.
    pub fn code(&self) -> i32 {
        match self {
            Error::Cancelled => libc::ECANCELED,
            Error::NotFound => libc::ENOENT,
            Error::Eof => libc::EPIPE,
            Error::NotConnected => libc::ENOTCONN,
            Error::NotSupported => libc::EOPNOTSUPP,
            Error::NoMemory => libc::ENOMEM,
            Error::InvalidInput => libc::EINVAL,
            Error::Os(code) => *code,
            Error::Io(_) => libc::EIO,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        if let Some(code) = error.raw_os_error() {
            return Error::Os(code);
        }

        match error.kind() {
            io::ErrorKind::NotFound => Error::NotFound,
            io::ErrorKind::UnexpectedEof => Error::Eof,
            io::ErrorKind::InvalidInput => Error::InvalidInput,
            io::ErrorKind::NotConnected => Error::NotConnected,
            io::ErrorKind::OutOfMemory => Error::NoMemory,
            kind => Error::Io(kind),
        }
    }
}

/// API misuse that cannot be recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A request of the same kind is already pending.
    RequestAlreadyPending,
    /// The socket has not been opened.
    SocketNotOpen,
    /// No socket server session has been bound.
    SocketServNotSet,
    /// The socket is in the wrong transport mode for the operation.
    WrongTransportMode,
    /// Accept issued before a listen on this socket.
    AcceptBeforeListen,
    /// Configure issued before a listen on this socket.
    ConfigBeforeListen,
    /// A session is opened twice.
    SessionAlreadyExists,
    /// A session is rebound or closed while dependents are open.
    SessionInUse,
    /// A connection is used before it is opened.
    ConnectionNotOpen,
    /// A caller-supplied argument is malformed.
    ArgumentError,
    /// A completion callback panicked.
    ExceptionInCallback,
    /// No reactor is installed on the calling thread.
    UseBeforeInit,
    /// A reactor is already installed on the calling thread.
    ReactorAlreadyInstalled,
    /// A service record operation without a record.
    NoServiceRecord,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Violation::RequestAlreadyPending => "request already pending",
            Violation::SocketNotOpen => "socket not open",
            Violation::SocketServNotSet => "socket server session not set",
            Violation::WrongTransportMode => "wrong transport mode",
            Violation::AcceptBeforeListen => "accept before listen",
            Violation::ConfigBeforeListen => "configure before listen",
            Violation::SessionAlreadyExists => "session already exists",
            Violation::SessionInUse => "session in use",
            Violation::ConnectionNotOpen => "connection not open",
            Violation::ArgumentError => "argument error",
            Violation::ExceptionInCallback => "callback panicked",
            Violation::UseBeforeInit => "no reactor on this thread",
            Violation::ReactorAlreadyInstalled => "reactor already installed on this thread",
            Violation::NoServiceRecord => "no service record",
        };

        f.write_str(message)
    }
}

/// Logs `violation` and panics. Never returns.
#[track_caller]
pub(crate) fn fatal(violation: Violation) -> ! {
    tracing::error!(%violation, "contract violation");
    panic!("aosocket: {violation}");
}

/// Escalates a panic caught around a completion callback.
///
/// The original panic message is kept in the new one.
pub(crate) fn fatal_in_callback(payload: Box<dyn Any + Send>) -> ! {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default();

    let violation = Violation::ExceptionInCallback;
    tracing::error!(%violation, %detail, "contract violation");
    panic!("aosocket: {violation}: {detail}");
}
