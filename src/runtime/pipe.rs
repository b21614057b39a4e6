use crate::context::CtxInner;
use crate::message::{Blob, Msg};
use crate::runtime::command::{CmdAddr, CmdTarget, Command, CommandKind, Tid};
use crate::runtime::ypipe::YPipe;
use std::sync::Arc;

/// Credit is returned to the writer in batches of at most this many
/// messages; see `compute_lwm`.
const MAX_WATERMARK_DELTA: usize = 1024;

/// Derives the low watermark from the high watermark: a gap large enough
/// that readers don't bounce credit on every message, small enough that
/// the pipe refills before the writer goes idle.
fn compute_lwm(hwm: usize) -> usize {
  if hwm > 2 * MAX_WATERMARK_DELTA {
    hwm - MAX_WATERMARK_DELTA
  } else {
    (hwm + 1) / 2
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeState {
  Active,
  /// The peer's delimiter has been read; nothing more will arrive.
  Delimited,
  /// The peer asked us to terminate; we keep reading until its delimiter.
  WaitingForDelimiter,
  /// Termination is underway; waiting for the final close command.
  WaitingForCompleteClose,
  Closed,
}

/// Events a pipe reports to its owning socket or session. Delivered as
/// return values from the command handlers rather than sink callbacks, so
/// the owner applies them without reentrancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeEvent {
  ReadActivated,
  WriteActivated,
  Hiccuped,
  Terminated,
}

/// One endpoint of a bi-directional message conduit. Two `Pipe` values
/// share two `YPipe`s crosswise; each endpoint is owned by exactly one
/// thread (a socket or a session) at a time.
pub(crate) struct Pipe {
  ctx: Arc<CtxInner>,
  id: usize,
  tid: Tid,
  peer: CmdAddr,
  in_pipe: Option<Arc<YPipe<Msg>>>,
  out_pipe: Option<Arc<YPipe<Msg>>>,
  in_active: bool,
  out_active: bool,
  /// Outbound cap: writes are refused when written − peer_read == hwm.
  hwm: usize,
  /// Inbound credit batch derived from the peer's outbound cap.
  lwm: usize,
  msgs_read: u64,
  msgs_written: u64,
  peers_msgs_read: u64,
  state: PipeState,
  /// Whether to keep reading until the peer's delimiter when the peer
  /// initiates termination.
  delay: bool,
  identity: Option<Blob>,
}

impl Pipe {
  pub fn id(&self) -> usize {
    self.id
  }

  pub fn identity(&self) -> Option<&Blob> {
    self.identity.as_ref()
  }

  pub fn set_identity(&mut self, identity: Option<Blob>) {
    self.identity = identity;
  }

  pub fn state(&self) -> PipeState {
    self.state
  }

  pub fn is_closed(&self) -> bool {
    self.state == PipeState::Closed
  }

  /// Rebinds this endpoint to a new owner slot. Must only be called
  /// before the peer learns our address (i.e. before any commands flow).
  pub fn set_tid(&mut self, tid: Tid) {
    self.tid = tid;
  }

  fn send_to_peer(&self, kind: CommandKind) {
    self.ctx.send_cmd(Command {
      dest: self.peer,
      kind,
    });
  }

  fn send_to_self(&self, kind: CommandKind) {
    self.ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: self.tid,
        target: CmdTarget::Pipe(self.id),
      },
      kind,
    });
  }

  // --- Read path ---

  /// Non-destructively checks whether a message can be read.
  pub fn check_read(&mut self) -> bool {
    if !self.in_active || !matches!(self.state, PipeState::Active | PipeState::WaitingForDelimiter) {
      return false;
    }
    let Some(in_pipe) = self.in_pipe.as_ref() else {
      return false;
    };
    if !in_pipe.check_read() {
      self.in_active = false;
      return false;
    }
    if in_pipe.probe(|m| m.is_delimiter()) {
      let _ = in_pipe.read();
      self.process_delimiter();
      return false;
    }
    true
  }

  /// Reads the next message, returning `None` if nothing is available or
  /// the pipe is terminating.
  pub fn read(&mut self) -> Option<Msg> {
    if !self.in_active || !matches!(self.state, PipeState::Active | PipeState::WaitingForDelimiter) {
      return None;
    }
    let msg = match self.in_pipe.as_ref().and_then(|p| p.read()) {
      Some(msg) => msg,
      None => {
        self.in_active = false;
        return None;
      }
    };
    if msg.is_delimiter() {
      self.process_delimiter();
      return None;
    }
    if !msg.is_more() && !msg.is_identity() {
      self.msgs_read += 1;
      if self.lwm > 0 && self.msgs_read % self.lwm as u64 == 0 {
        self.send_to_peer(CommandKind::ActivateWrite {
          msgs_read: self.msgs_read,
        });
      }
    }
    Some(msg)
  }

  // --- Write path ---

  /// Checks whether a message can be written. On refusal the pipe marks
  /// itself out-inactive until the peer returns credit.
  pub fn check_write(&mut self) -> bool {
    if !self.out_active || self.state != PipeState::Active {
      return false;
    }
    let full = self.hwm > 0 && self.msgs_written - self.peers_msgs_read == self.hwm as u64;
    if full {
      self.out_active = false;
      return false;
    }
    true
  }

  /// Writes a message into the outbound pipe. Returns `false` (and leaves
  /// the message with the caller untouched semantics-wise) when refused.
  pub fn write(&mut self, msg: Msg) -> Result<(), Msg> {
    if !self.check_write() {
      return Err(msg);
    }
    let Some(out) = self.out_pipe.as_ref() else {
      return Err(msg);
    };
    let more = msg.is_more();
    let identity = msg.is_identity();
    out.write(msg, more);
    if !more && !identity {
      self.msgs_written += 1;
    }
    Ok(())
  }

  /// Removes unfinished parts of a partially written message.
  pub fn rollback(&mut self) {
    if let Some(out) = self.out_pipe.as_ref() {
      while let Some(msg) = out.unwrite() {
        drop(msg);
      }
    }
  }

  /// Publishes pending writes, waking the peer's reader if it sleeps.
  pub fn flush(&mut self) {
    if self.state == PipeState::Closed {
      return;
    }
    if let Some(out) = self.out_pipe.as_ref() {
      if !out.flush() {
        self.send_to_peer(CommandKind::ActivateRead);
      }
    }
  }

  // --- Command handlers ---

  pub fn process_activate_read(&mut self) -> Option<PipeEvent> {
    if !self.in_active && matches!(self.state, PipeState::Active | PipeState::WaitingForDelimiter) {
      self.in_active = true;
      return Some(PipeEvent::ReadActivated);
    }
    None
  }

  pub fn process_activate_write(&mut self, msgs_read: u64) -> Option<PipeEvent> {
    self.peers_msgs_read = msgs_read;
    if !self.out_active && self.state == PipeState::Active {
      self.out_active = true;
      return Some(PipeEvent::WriteActivated);
    }
    None
  }

  /// The peer rebuilt its inbound pipe; discard unconsumed writes and
  /// switch to the replacement.
  pub fn process_hiccup(&mut self, pipe: Arc<YPipe<Msg>>) -> Option<PipeEvent> {
    if let Some(old) = self.out_pipe.take() {
      old.flush();
      // The peer abandoned its reader end, so draining from here is the
      // sole remaining access.
      while let Some(msg) = old.read() {
        if !msg.is_more() {
          self.msgs_written -= 1;
        }
        drop(msg);
      }
    }
    self.out_pipe = Some(pipe);
    self.out_active = true;
    if self.state == PipeState::Active {
      Some(PipeEvent::Hiccuped)
    } else {
      None
    }
  }

  /// Rebuilds the inbound pipe after a transport fault on this side and
  /// tells the peer to swap its outbound end.
  pub fn hiccup(&mut self) {
    if self.state != PipeState::Active {
      return;
    }
    let fresh = Arc::new(YPipe::new());
    self.in_pipe = Some(Arc::clone(&fresh));
    self.in_active = true;
    self.send_to_peer(CommandKind::Hiccup { pipe: fresh });
  }

  fn process_delimiter(&mut self) {
    match self.state {
      PipeState::Active => self.state = PipeState::Delimited,
      PipeState::WaitingForDelimiter => {
        self.send_to_self(CommandKind::PipeCompleteTerm);
        self.state = PipeState::WaitingForCompleteClose;
      }
      _ => {}
    }
  }

  pub fn process_pipe_term(&mut self) -> Option<PipeEvent> {
    self.send_to_peer(CommandKind::PipeTermAck);
    match self.state {
      PipeState::Active => {
        if self.delay {
          self.state = PipeState::WaitingForDelimiter;
        } else {
          self.send_to_self(CommandKind::PipeCompleteTerm);
          self.state = PipeState::WaitingForCompleteClose;
        }
      }
      PipeState::Delimited => {
        self.send_to_self(CommandKind::PipeCompleteTerm);
        self.state = PipeState::WaitingForCompleteClose;
      }
      // Both sides initiated concurrently, or a duplicate; absorb.
      _ => {}
    }
    None
  }

  pub fn process_pipe_term_ack(&mut self) -> Option<PipeEvent> {
    self.complete_term()
  }

  pub fn process_pipe_complete_term(&mut self) -> Option<PipeEvent> {
    self.complete_term()
  }

  fn complete_term(&mut self) -> Option<PipeEvent> {
    if self.state != PipeState::WaitingForCompleteClose {
      return None;
    }
    self.out_pipe = None;
    if let Some(in_pipe) = self.in_pipe.take() {
      while let Some(msg) = in_pipe.read() {
        drop(msg);
      }
    }
    self.state = PipeState::Closed;
    Some(PipeEvent::Terminated)
  }

  /// Starts termination from this side. With `delay` set while waiting
  /// for the peer's delimiter, the shutdown defers until it arrives.
  pub fn terminate(&mut self, delay: bool) {
    self.delay = delay;
    match self.state {
      PipeState::Active | PipeState::Delimited => {
        self.start_term();
      }
      PipeState::WaitingForDelimiter if !delay => {
        self.start_term();
      }
      _ => {}
    }
  }

  fn start_term(&mut self) {
    self.rollback();
    if let Some(out) = self.out_pipe.as_ref() {
      out.write(Msg::delimiter(), false);
    }
    self.flush();
    self.send_to_peer(CommandKind::PipeTerm);
    self.send_to_self(CommandKind::PipeCompleteTerm);
    self.state = PipeState::WaitingForCompleteClose;
  }

  /// Dispatches a pipe-targeted command, returning the event (if any) the
  /// owner must react to.
  pub fn process_command(&mut self, kind: CommandKind) -> Option<PipeEvent> {
    match kind {
      CommandKind::ActivateRead => self.process_activate_read(),
      CommandKind::ActivateWrite { msgs_read } => self.process_activate_write(msgs_read),
      CommandKind::Hiccup { pipe } => self.process_hiccup(pipe),
      CommandKind::PipeTerm => self.process_pipe_term(),
      CommandKind::PipeTermAck => self.process_pipe_term_ack(),
      CommandKind::PipeCompleteTerm => self.process_pipe_complete_term(),
      other => {
        tracing::warn!(pipe_id = self.id, cmd = ?std::mem::discriminant(&other), "unexpected command for pipe");
        None
      }
    }
  }
}

impl std::fmt::Debug for Pipe {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipe")
      .field("id", &self.id)
      .field("state", &self.state)
      .field("written", &self.msgs_written)
      .field("read", &self.msgs_read)
      .finish()
  }
}

/// Creates two pipe endpoints sharing two `YPipe`s crosswise.
///
/// `tids[i]` is the owner slot of endpoint `i`; `hwms[i]` caps the number
/// of messages endpoint `i` may have in flight towards its peer (0 means
/// unbounded); `delays[i]` sets endpoint `i`'s delay-on-close behaviour.
pub(crate) fn pipe_pair(
  ctx: &Arc<CtxInner>,
  tids: [Tid; 2],
  hwms: [usize; 2],
  delays: [bool; 2],
) -> (Pipe, Pipe) {
  let upipe_a: Arc<YPipe<Msg>> = Arc::new(YPipe::new());
  let upipe_b: Arc<YPipe<Msg>> = Arc::new(YPipe::new());
  let id0 = ctx.next_object_id();
  let id1 = ctx.next_object_id();

  let pipe0 = Pipe {
    ctx: Arc::clone(ctx),
    id: id0,
    tid: tids[0],
    peer: CmdAddr {
      tid: tids[1],
      target: CmdTarget::Pipe(id1),
    },
    in_pipe: Some(Arc::clone(&upipe_a)),
    out_pipe: Some(Arc::clone(&upipe_b)),
    in_active: true,
    out_active: true,
    hwm: hwms[0],
    lwm: compute_lwm(hwms[1]),
    msgs_read: 0,
    msgs_written: 0,
    peers_msgs_read: 0,
    state: PipeState::Active,
    delay: delays[0],
    identity: None,
  };
  let pipe1 = Pipe {
    ctx: Arc::clone(ctx),
    id: id1,
    tid: tids[1],
    peer: CmdAddr {
      tid: tids[0],
      target: CmdTarget::Pipe(id0),
    },
    in_pipe: Some(upipe_b),
    out_pipe: Some(upipe_a),
    in_active: true,
    out_active: true,
    hwm: hwms[1],
    lwm: compute_lwm(hwms[0]),
    msgs_read: 0,
    msgs_written: 0,
    peers_msgs_read: 0,
    state: PipeState::Active,
    delay: delays[1],
    identity: None,
  };
  (pipe0, pipe1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lwm_tracks_hwm() {
    assert_eq!(compute_lwm(0), 0);
    assert_eq!(compute_lwm(1), 1);
    assert_eq!(compute_lwm(4), 2);
    assert_eq!(compute_lwm(1000), 500);
    assert_eq!(compute_lwm(10_000), 10_000 - MAX_WATERMARK_DELTA);
  }
}
