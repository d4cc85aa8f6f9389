//! Networking building blocks under the socket engine.
//!
//! - [`session`]: shared [`SocketServ`] and [`Connection`] sessions
//! - [`resolver`]: synchronous [`resolve`] and the async DNS resolver task
//! - [`tasks`]: reader, writer, accepter and connecter tasks
//! - [`connecter`]: the resolve-then-connect state machine
//! - [`utils`]: socket addresses and syscall wrappers

pub(crate) mod connecter;
pub mod resolver;
pub mod session;
pub(crate) mod tasks;
pub mod utils;

pub use resolver::{LOOPBACK_NAME, resolve};
pub use session::{AccessPoint, Connection, SocketServ};
pub use utils::SockAddr;
