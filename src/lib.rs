//! Completion-based TCP and Bluetooth RFCOMM sockets on a per-thread reactor.
//!
//! Every asynchronous request is armed on the calling thread's [`Reactor`]
//! and completes later, on the same thread, through a callback that receives
//! the result and an opaque parameter. Requests can be cancelled; a cancelled
//! request still gets exactly one completion, carrying [`Error::Cancelled`].
//!
//! # Architecture
//!
//! - **Reactor**: Per-thread task store, ready queue and readiness poller
//! - **AsyncTask**: Cancellable request with a single completion handler
//! - **Socket**: TCP/Bluetooth engine built from reader, writer, accepter and
//!   connecter tasks
//! - **Sessions**: [`SocketServ`] and [`Connection`], shared by many sockets
//! - **Bluetooth**: Stack abstraction, SDP advertiser and port discovery
//! - **Itc**: The one way to complete a request from another thread
//! - **Immediate/Timer**: Completions that need no socket event
//! - **Loop**: Nested wait on the reactor from inside a callback

mod builder;
pub mod bt;
mod error;
mod immediate;
mod itc;
pub mod logging;
pub mod net;
mod reactor;
mod runtime;
mod socket;
mod task;
mod timer;
mod utils;

pub use builder::{DEFAULT_MAX_READ_SIZE, ReactorBuilder};
pub use error::{Error, Status, Violation};
pub use immediate::Immediate;
pub use itc::{Itc, ItcSignal};
pub use net::{AccessPoint, Connection, LOOPBACK_NAME, SocketServ, resolve};
pub use runtime::context::{ExecutionContext, with_context};
pub use runtime::{Loop, Reactor};
pub use socket::{Mode, Socket};
pub use task::{AsyncTask, TaskState};
pub use timer::Timer;
