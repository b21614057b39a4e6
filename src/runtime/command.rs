use crate::message::Msg;
use crate::runtime::ypipe::YPipe;
use std::sync::Arc;

/// Slot index into the context's mailbox table. Slot 0 is the terminator
/// mailbox, slot 1 the reaper, slots 2..2+n the I/O threads, the rest
/// sockets.
pub(crate) type Tid = u32;

/// Identifies the object a command is dispatched to once it reaches the
/// destination slot's thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmdTarget {
  /// The socket (or reaper/io-thread) that owns the mailbox itself.
  Own,
  /// A pipe endpoint attached to the owning socket or session.
  Pipe(usize),
  /// An I/O object (session or listener) registered on an I/O thread.
  Object(usize),
}

/// Where to send commands for a particular object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CmdAddr {
  pub tid: Tid,
  pub target: CmdTarget,
}

/// A control message between objects, delivered through mailboxes. This is
/// the only mechanism by which cross-thread state mutation happens.
pub(crate) struct Command {
  pub dest: CmdAddr,
  pub kind: CommandKind,
}

pub(crate) enum CommandKind {
  /// Shut down the receiving thread or socket.
  Stop,
  /// Install a freshly created I/O object on an I/O thread and activate
  /// it. The creator allocates the object id up front so it can address
  /// follow-up commands.
  Plug {
    oid: usize,
    object: crate::runtime::io_object::IoObject,
  },
  /// Register `child` as owned by the receiving socket.
  Own { child: CmdAddr },
  /// Hand a transport engine to a session.
  Attach { engine: Box<dyn crate::engine::Engine> },
  /// Attach a new pipe endpoint to the receiving socket.
  Bind { pipe: crate::runtime::pipe::Pipe },
  /// The peer published data while this endpoint's reader was asleep.
  ActivateRead,
  /// The peer consumed messages; carries its running read counter.
  ActivateWrite { msgs_read: u64 },
  /// The peer rebuilt its inbound pipe; replace our outbound with it.
  Hiccup { pipe: Arc<YPipe<Msg>> },
  /// The peer endpoint started termination.
  PipeTerm,
  /// The peer acknowledged our PipeTerm.
  PipeTermAck,
  /// Self-scheduled: finish closing the pipe endpoint.
  PipeCompleteTerm,
  /// Parent tells a child object to shut down.
  Term,
  /// A child asks its parent to initiate its destruction.
  TermReq { child: CmdAddr },
  /// A child confirms it has fully shut down.
  TermAck { oid: usize },
  /// Hand a closed socket to the reaper for finalization.
  Reap {
    socket: Box<crate::socket::core::SocketBase>,
  },
  /// A reaped socket finished terminating.
  Reaped { tid: Tid },
  /// An in-process connection completed on the bound side.
  InprocConnected,
  /// The reaper reports that the last socket is gone.
  Done,
}

impl Command {
  /// The command variant's name, for logging.
  pub fn variant_name(&self) -> &'static str {
    match self.kind {
      CommandKind::Stop => "Stop",
      CommandKind::Plug { .. } => "Plug",
      CommandKind::Own { .. } => "Own",
      CommandKind::Attach { .. } => "Attach",
      CommandKind::Bind { .. } => "Bind",
      CommandKind::ActivateRead => "ActivateRead",
      CommandKind::ActivateWrite { .. } => "ActivateWrite",
      CommandKind::Hiccup { .. } => "Hiccup",
      CommandKind::PipeTerm => "PipeTerm",
      CommandKind::PipeTermAck => "PipeTermAck",
      CommandKind::PipeCompleteTerm => "PipeCompleteTerm",
      CommandKind::Term => "Term",
      CommandKind::TermReq { .. } => "TermReq",
      CommandKind::TermAck { .. } => "TermAck",
      CommandKind::Reap { .. } => "Reap",
      CommandKind::Reaped { .. } => "Reaped",
      CommandKind::InprocConnected => "InprocConnected",
      CommandKind::Done => "Done",
    }
  }
}

impl std::fmt::Debug for Command {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Command")
      .field("dest", &self.dest)
      .field("kind", &self.variant_name())
      .finish()
  }
}
