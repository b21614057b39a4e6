use crate::context::CtxInner;
use crate::error::MqError;
use crate::runtime::command::{CmdTarget, Command, CommandKind, Tid};
use crate::runtime::io_object::{Disposition, IoCtx, IoObject, RouteOp};
use crate::runtime::mailbox::Mailbox;
use crate::runtime::reactor::Reactor;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Reactor token reserved for the thread's own mailbox.
const MAILBOX_TOKEN: usize = usize::MAX;

/// One I/O thread: a reactor driving transport fds and timers, plus the
/// thread's mailbox. Sessions and listeners live in a registry keyed by
/// object id; commands reach them via `CmdTarget::Object`, and pipe
/// commands are routed through the pipe-id table the objects maintain.
pub(crate) struct IoThread {
  ctx: Arc<CtxInner>,
  tid: Tid,
  mailbox: Arc<Mailbox>,
  reactor: Reactor,
  objects: HashMap<usize, IoObject>,
  pipe_routes: HashMap<usize, usize>,
  stopping: bool,
}

impl IoThread {
  pub fn new(ctx: Arc<CtxInner>, tid: Tid, mailbox: Arc<Mailbox>) -> Result<Self, MqError> {
    let mut reactor = Reactor::new();
    let handle = reactor.add_fd(mailbox.fd(), MAILBOX_TOKEN);
    reactor.set_pollin(handle);
    Ok(Self {
      ctx,
      tid,
      mailbox,
      reactor,
      objects: HashMap::new(),
      pipe_routes: HashMap::new(),
      stopping: false,
    })
  }

  pub fn load_handle(&self) -> Arc<AtomicUsize> {
    self.reactor.load_handle()
  }

  pub fn run(mut self) {
    tracing::debug!(tid = self.tid, "I/O thread running");
    loop {
      let (timers, fds) = match self.reactor.wait(None) {
        Ok(ready) => ready,
        Err(e) => {
          tracing::error!(tid = self.tid, error = %e, "reactor wait failed; I/O thread exiting");
          return;
        }
      };
      // Timers fire before fd events within an iteration.
      for timer in timers {
        self.dispatch(timer.token, |object, io| object.timer_event(io, timer.timer_id));
      }
      for event in fds {
        if event.token == MAILBOX_TOKEN {
          self.drain_mailbox();
          continue;
        }
        if event.readable || event.error {
          self.dispatch(event.token, |object, io| object.in_event(io, event.handle));
        }
        if event.writable {
          self.dispatch(event.token, |object, io| object.out_event(io, event.handle));
        }
      }
      if self.stopping {
        // One final drain so late commands are not lost.
        self.drain_mailbox();
        break;
      }
    }
    tracing::debug!(tid = self.tid, objects = self.objects.len(), "I/O thread stopped");
  }

  fn dispatch(&mut self, oid: usize, f: impl FnOnce(&mut IoObject, &mut IoCtx<'_>) -> Disposition) {
    let Some(mut object) = self.objects.remove(&oid) else {
      return;
    };
    let mut routes = Vec::new();
    let mut io = IoCtx {
      ctx: &self.ctx,
      tid: self.tid,
      reactor: &mut self.reactor,
      routes: &mut routes,
    };
    let disposition = f(&mut object, &mut io);
    self.apply_routes(routes);
    match disposition {
      Disposition::Keep => {
        self.objects.insert(oid, object);
      }
      Disposition::Remove => {
        self.pipe_routes.retain(|_, &mut o| o != oid);
        tracing::trace!(tid = self.tid, oid, "I/O object removed");
      }
    }
  }

  fn apply_routes(&mut self, routes: Vec<RouteOp>) {
    for op in routes {
      match op {
        RouteOp::Add { pipe_id, oid } => {
          self.pipe_routes.insert(pipe_id, oid);
        }
        RouteOp::Remove { pipe_id } => {
          self.pipe_routes.remove(&pipe_id);
        }
      }
    }
  }

  fn drain_mailbox(&mut self) {
    while let Ok(cmd) = self.mailbox.try_recv() {
      self.handle_command(cmd);
    }
  }

  fn handle_command(&mut self, cmd: Command) {
    match cmd.dest.target {
      CmdTarget::Own => match cmd.kind {
        CommandKind::Stop => {
          self.stopping = true;
        }
        CommandKind::Plug { oid, object } => {
          self.objects.insert(oid, object);
          self.dispatch(oid, |object, io| {
            object.plug(io, oid);
            Disposition::Keep
          });
        }
        other => {
          tracing::warn!(tid = self.tid, cmd = ?std::mem::discriminant(&other), "unexpected thread command");
        }
      },
      CmdTarget::Object(oid) => {
        self.dispatch(oid, |object, io| object.process_command(io, CmdTarget::Object(oid), cmd.kind));
      }
      CmdTarget::Pipe(pipe_id) => match self.pipe_routes.get(&pipe_id).copied() {
        Some(oid) => {
          self.dispatch(oid, |object, io| {
            object.process_command(io, CmdTarget::Pipe(pipe_id), cmd.kind)
          });
        }
        None => {
          tracing::trace!(tid = self.tid, pipe_id, "pipe command dropped: no route");
        }
      },
    }
  }
}
