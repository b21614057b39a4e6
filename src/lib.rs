//! coremq - a thread-based message-transport core in the ZeroMQ mould.
//!
//! Processes exchange discrete multi-part byte messages over sockets
//! whose routing is defined by a fixed set of patterns (REQ/REP,
//! PUB/SUB, PUSH/PULL, DEALER/ROUTER, PAIR and the XPUB/XSUB variants),
//! over TCP, IPC or in-process transports. Many logical sockets are
//! multiplexed onto a small pool of I/O threads; transport faults are
//! absorbed by reconnecting sessions and never surface through the API.

/// The `Context`: process-wide lifecycle, socket registry, I/O thread
/// pool, reaper and in-process endpoint directory.
pub mod context;
/// Transport engines and the interface they satisfy.
pub(crate) mod engine;
/// Error types for the socket-level API.
pub mod error;
/// Message frames, flags and identity blobs.
pub mod message;
/// The user-facing poller: sockets, raw fds and timers on one thread.
pub mod poller;
/// Wire greeting and frame codec used by the stream engines.
pub(crate) mod protocol;
/// Mailboxes, commands, pipes, reactors and the service threads.
pub(crate) mod runtime;
/// Sessions: the socket-side peers of transport engines.
pub(crate) mod session;
/// Socket types, options and pattern implementations.
pub mod socket;
/// Endpoint parsing and stream transport plumbing.
pub(crate) mod transport;

pub use context::Context;
pub use error::MqError;
pub use message::{Blob, Msg, MsgFlags, SocketFlags};
pub use poller::{Poller, Timer};
pub use socket::types::{Socket, SocketType};

/// Major version number of the library.
const VERSION_MAJOR: i32 = 0;
/// Minor version number of the library.
const VERSION_MINOR: i32 = 1;
/// Patch version number of the library.
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
