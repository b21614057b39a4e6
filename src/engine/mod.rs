//! Transport engines: the interface the core requires, plus the stream
//! engine used for TCP and IPC connections.

pub(crate) mod stream;

pub(crate) use stream::{StreamEngine, StreamFd};

use crate::runtime::io_object::IoCtx;
use crate::session::SessionCore;

/// Result of pumping an engine: either it keeps running or the transport
/// failed and the session must detach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineStatus {
  Ok,
  Detach,
}

/// A transport engine moves bytes between an OS stream and a session.
/// Engines never surface errors to the user; a broken transport reports
/// `Detach` and the session decides between reconnect and teardown.
pub(crate) trait Engine: Send {
  /// Registers the engine's fd with the I/O thread's reactor and starts
  /// the handshake.
  fn plug(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore);

  /// Unregisters fds and releases the transport.
  fn terminate(&mut self, io: &mut IoCtx<'_>);

  /// The session gained credit; resume pushing decoded messages.
  fn restart_input(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus;

  /// The session has messages to send; resume writing to the wire.
  fn restart_output(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus;

  fn in_event(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus;

  fn out_event(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus;

  /// Bytes accepted from the session but not yet written to the wire.
  fn output_pending(&self) -> bool;

  /// Hook for security mechanisms with an authentication side channel;
  /// unused by the engines shipped here.
  fn zap_msg_available(&mut self, _session: &mut SessionCore) {}
}
