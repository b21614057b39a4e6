use crate::context::CtxInner;
use crate::runtime::command::{CmdTarget, CommandKind, Tid};
use crate::runtime::reactor::Reactor;
use crate::session::SessionBase;
use crate::transport::tcp::StreamListener;
use std::sync::Arc;

/// Whether an object stays registered after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
  Keep,
  Remove,
}

/// Pipe-route maintenance requested by an object during dispatch; the
/// I/O thread applies these as soon as the handler returns.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RouteOp {
  Add { pipe_id: usize, oid: usize },
  Remove { pipe_id: usize },
}

/// Dispatch context handed to I/O objects: the thread's reactor for
/// fd/timer registration, the context for sending commands, and the
/// route queue for pipe-command addressing.
pub(crate) struct IoCtx<'a> {
  pub ctx: &'a Arc<CtxInner>,
  pub tid: Tid,
  pub reactor: &'a mut Reactor,
  pub routes: &'a mut Vec<RouteOp>,
}

/// The objects an I/O thread hosts, dispatched as a tagged variant.
pub(crate) enum IoObject {
  Session(Box<SessionBase>),
  Listener(Box<StreamListener>),
}

impl IoObject {
  pub fn plug(&mut self, io: &mut IoCtx<'_>, oid: usize) {
    match self {
      IoObject::Session(s) => s.plug(io, oid),
      IoObject::Listener(l) => l.plug(io, oid),
    }
  }

  pub fn process_command(&mut self, io: &mut IoCtx<'_>, target: CmdTarget, kind: CommandKind) -> Disposition {
    match self {
      IoObject::Session(s) => s.process_command(io, target, kind),
      IoObject::Listener(l) => l.process_command(io, target, kind),
    }
  }

  pub fn in_event(&mut self, io: &mut IoCtx<'_>, handle: usize) -> Disposition {
    match self {
      IoObject::Session(s) => s.in_event(io, handle),
      IoObject::Listener(l) => l.in_event(io, handle),
    }
  }

  pub fn out_event(&mut self, io: &mut IoCtx<'_>, handle: usize) -> Disposition {
    match self {
      IoObject::Session(s) => s.out_event(io, handle),
      IoObject::Listener(l) => l.out_event(io, handle),
    }
  }

  pub fn timer_event(&mut self, io: &mut IoCtx<'_>, timer_id: u64) -> Disposition {
    match self {
      IoObject::Session(s) => s.timer_event(io, timer_id),
      IoObject::Listener(l) => l.timer_event(io, timer_id),
    }
  }
}

impl std::fmt::Debug for IoObject {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      IoObject::Session(_) => f.write_str("IoObject::Session"),
      IoObject::Listener(_) => f.write_str("IoObject::Listener"),
    }
  }
}
