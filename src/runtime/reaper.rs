use crate::context::CtxInner;
use crate::error::MqError;
use crate::runtime::command::{CmdAddr, CmdTarget, Command, CommandKind, Tid};
use crate::runtime::mailbox::Mailbox;
use crate::runtime::reactor::Reactor;
use crate::socket::core::SocketBase;
use std::collections::HashMap;
use std::sync::Arc;

/// Reactor token for the reaper's own mailbox; reaped sockets use their
/// slot id as token.
const MAILBOX_TOKEN: usize = usize::MAX;

/// Dedicated thread that finalizes closed sockets: it drives each
/// adopted socket's command processing until its pipes and children are
/// gone, then frees the slot. Once the context is terminating and the
/// last socket is reaped, it reports Done to the terminator mailbox.
pub(crate) struct Reaper {
  ctx: Arc<CtxInner>,
  tid: Tid,
  mailbox: Arc<Mailbox>,
  reactor: Reactor,
  sockets: HashMap<Tid, (Box<SocketBase>, usize)>,
  terminating: bool,
}

impl Reaper {
  pub fn new(ctx: Arc<CtxInner>, tid: Tid, mailbox: Arc<Mailbox>) -> Result<Self, MqError> {
    let mut reactor = Reactor::new();
    let handle = reactor.add_fd(mailbox.fd(), MAILBOX_TOKEN);
    reactor.set_pollin(handle);
    Ok(Self {
      ctx,
      tid,
      mailbox,
      reactor,
      sockets: HashMap::new(),
      terminating: false,
    })
  }

  pub fn run(mut self) {
    tracing::debug!("reaper running");
    loop {
      let (_, fds) = match self.reactor.wait(None) {
        Ok(ready) => ready,
        Err(e) => {
          tracing::error!(error = %e, "reaper reactor failed");
          return;
        }
      };
      for event in fds {
        if event.token == MAILBOX_TOKEN {
          self.drain_mailbox();
        } else {
          self.drive_socket(event.token as Tid);
        }
      }
      if self.terminating && self.sockets.is_empty() {
        self.ctx.send_cmd(Command {
          dest: CmdAddr {
            tid: crate::context::TERM_TID,
            target: CmdTarget::Own,
          },
          kind: CommandKind::Done,
        });
        tracing::debug!("reaper done");
        return;
      }
    }
  }

  fn drain_mailbox(&mut self) {
    while let Ok(cmd) = self.mailbox.try_recv() {
      match cmd.kind {
        CommandKind::Stop => {
          self.terminating = true;
        }
        CommandKind::Reap { socket } => self.adopt(socket),
        CommandKind::Reaped { tid } => self.finish(tid),
        other => {
          tracing::warn!(cmd = ?std::mem::discriminant(&other), "unexpected reaper command");
        }
      }
    }
  }

  /// Takes ownership of a closed socket: watch its mailbox and start its
  /// shutdown sequence.
  fn adopt(&mut self, mut socket: Box<SocketBase>) {
    let tid = socket.tid();
    let handle = self.reactor.add_fd(socket.mailbox_fd(), tid as usize);
    self.reactor.set_pollin(handle);
    socket.initiate_close();
    // Commands may already be waiting.
    socket.drive_termination();
    self.sockets.insert(tid, (socket, handle));
    tracing::debug!(tid, "socket adopted by reaper");
  }

  fn drive_socket(&mut self, tid: Tid) {
    if let Some((socket, _)) = self.sockets.get_mut(&tid) {
      socket.drive_termination();
    }
  }

  /// The socket reported itself fully terminated; drop it and free its
  /// slot.
  fn finish(&mut self, tid: Tid) {
    if let Some((socket, handle)) = self.sockets.remove(&tid) {
      self.reactor.remove_fd(handle);
      drop(socket);
      self.ctx.destroy_socket(tid);
      tracing::debug!(tid, "socket reaped");
    }
  }
}

impl std::fmt::Debug for Reaper {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Reaper")
      .field("tid", &self.tid)
      .field("sockets", &self.sockets.len())
      .finish()
  }
}
