//! The session: socket-side peer of a transport engine. It owns one pipe
//! endpoint and at most one engine, survives engine loss on the connect
//! side (reconnect with hiccup), and drives the pipe to Closed during
//! shutdown.

use crate::context::CtxInner;
use crate::engine::{Engine, EngineStatus};
use crate::message::{Blob, Msg};
use crate::runtime::command::{CmdAddr, CmdTarget, Command, CommandKind, Tid};
use crate::runtime::io_object::{Disposition, IoCtx, RouteOp};
use crate::runtime::pipe::{pipe_pair, Pipe, PipeEvent};
use crate::socket::options::SocketOptions;
use crate::transport::endpoint::Endpoint;
use crate::transport::tcp;
use std::sync::Arc;
use std::time::Duration;

const RECONNECT_TIMER: u64 = 1;
const LINGER_TIMER: u64 = 2;

/// The part of a session an engine interacts with: the pipe towards the
/// socket plus the identifiers needed for registration and commands.
pub(crate) struct SessionCore {
  ctx: Arc<CtxInner>,
  tid: Tid,
  oid: usize,
  socket: CmdAddr,
  options: SocketOptions,
  pipe: Option<Pipe>,
  endpoint_uri: String,
  accept_side: bool,
}

impl SessionCore {
  pub fn oid(&self) -> usize {
    self.oid
  }

  /// Delivers a received message towards the socket. Refuses (handing
  /// the message back) when the pipe hit its watermark or is gone.
  pub fn push_msg(&mut self, msg: Msg) -> Result<(), Msg> {
    match self.pipe.as_mut() {
      Some(pipe) => pipe.write(msg),
      None => Err(msg),
    }
  }

  /// Pulls the next message the socket queued for the wire.
  pub fn pull_msg(&mut self) -> Option<Msg> {
    self.pipe.as_mut().and_then(|p| p.read())
  }

  /// Publishes pushed messages to the socket.
  pub fn flush(&mut self) {
    if let Some(pipe) = self.pipe.as_mut() {
      pipe.flush();
    }
  }

  /// Called by the engine once the greeting handshake completes. On the
  /// accepting side this is the moment the pipe pair is created and the
  /// socket half is mailed over (carrying the peer identity).
  pub fn engine_ready(&mut self, io: &mut IoCtx<'_>, peer_identity: Blob) {
    if !self.accept_side || self.pipe.is_some() {
      tracing::trace!(oid = self.oid, "engine ready");
      return;
    }
    let (session_end, mut socket_end) = pipe_pair(
      &self.ctx,
      [self.tid, self.socket.tid],
      [self.options.rcvhwm, self.options.sndhwm],
      [true, true],
    );
    if !peer_identity.is_empty() {
      socket_end.set_identity(Some(peer_identity));
    }
    io.routes.push(RouteOp::Add {
      pipe_id: session_end.id(),
      oid: self.oid,
    });
    self.pipe = Some(session_end);
    self.ctx.send_cmd(Command {
      dest: self.socket,
      kind: CommandKind::Bind { pipe: socket_end },
    });
    tracing::debug!(oid = self.oid, uri = %self.endpoint_uri, "incoming connection ready");
  }
}

/// Full session state: the engine-facing core plus connect/reconnect and
/// termination management.
pub(crate) struct SessionBase {
  core: SessionCore,
  engine: Option<Box<dyn Engine>>,
  /// Set on connect-type sessions; drives reconnects.
  connect_endpoint: Option<Endpoint>,
  /// A nonblocking connect in flight: the raw socket and its reactor
  /// handle.
  connecting: Option<(socket2::Socket, usize)>,
  reconnect_ivl_current: Duration,
  had_engine: bool,
  /// Term received from the owning socket.
  pending_term: bool,
  /// Accept-side transport failure; tearing down via TermReq.
  dying: bool,
  term_req_sent: bool,
  linger_armed: bool,
}

impl SessionBase {
  /// Session for an outgoing connection: the pipe pair was created by
  /// the socket, which keeps one end and hands us the other.
  pub fn for_connect(
    ctx: Arc<CtxInner>,
    tid: Tid,
    socket: CmdAddr,
    options: SocketOptions,
    endpoint: Endpoint,
    pipe: Pipe,
  ) -> Self {
    let reconnect_ivl = options.reconnect_ivl;
    Self {
      core: SessionCore {
        ctx,
        tid,
        oid: 0,
        socket,
        options,
        pipe: Some(pipe),
        endpoint_uri: endpoint.uri(),
        accept_side: false,
      },
      engine: None,
      connect_endpoint: Some(endpoint),
      connecting: None,
      reconnect_ivl_current: reconnect_ivl,
      had_engine: false,
      pending_term: false,
      dying: false,
      term_req_sent: false,
      linger_armed: false,
    }
  }

  /// Session for an accepted connection: no pipe until the handshake
  /// finishes, and an engine arrives by Attach command.
  pub fn for_accept(
    ctx: Arc<CtxInner>,
    tid: Tid,
    socket: CmdAddr,
    options: SocketOptions,
    endpoint_uri: String,
  ) -> Self {
    let reconnect_ivl = options.reconnect_ivl;
    Self {
      core: SessionCore {
        ctx,
        tid,
        oid: 0,
        socket,
        options,
        pipe: None,
        endpoint_uri,
        accept_side: true,
      },
      engine: None,
      connect_endpoint: None,
      connecting: None,
      reconnect_ivl_current: reconnect_ivl,
      had_engine: false,
      pending_term: false,
      dying: false,
      term_req_sent: false,
      linger_armed: false,
    }
  }

  pub fn plug(&mut self, io: &mut IoCtx<'_>, oid: usize) {
    self.core.oid = oid;
    if let Some(pipe) = self.core.pipe.as_mut() {
      pipe.set_tid(io.tid);
      io.routes.push(RouteOp::Add {
        pipe_id: pipe.id(),
        oid,
      });
    }
    if self.connect_endpoint.is_some() {
      self.start_connect(io);
    }
    tracing::debug!(oid, uri = %self.core.endpoint_uri, "session plugged");
  }

  // --- Command handling ---

  pub fn process_command(&mut self, io: &mut IoCtx<'_>, target: CmdTarget, kind: CommandKind) -> Disposition {
    match target {
      CmdTarget::Pipe(pipe_id) => {
        let event = match self.core.pipe.as_mut() {
          Some(pipe) if pipe.id() == pipe_id => pipe.process_command(kind),
          _ => None,
        };
        self.handle_pipe_event(io, event)
      }
      _ => match kind {
        CommandKind::Attach { engine } => {
          self.attach_engine(io, engine);
          Disposition::Keep
        }
        CommandKind::Term => self.process_term(io),
        other => {
          tracing::warn!(oid = self.core.oid, cmd = ?std::mem::discriminant(&other), "unexpected session command");
          Disposition::Keep
        }
      },
    }
  }

  fn handle_pipe_event(&mut self, io: &mut IoCtx<'_>, event: Option<PipeEvent>) -> Disposition {
    match event {
      Some(PipeEvent::ReadActivated) => {
        if self.engine.is_some() {
          self.with_engine(io, |engine, io, core| engine.restart_output(io, core));
        } else {
          self.drain_pipe();
        }
      }
      Some(PipeEvent::WriteActivated) => {
        self.with_engine(io, |engine, io, core| engine.restart_input(io, core));
      }
      Some(PipeEvent::Terminated) => {
        if let Some(pipe) = self.core.pipe.take() {
          io.routes.push(RouteOp::Remove { pipe_id: pipe.id() });
        }
        return self.on_pipe_gone(io);
      }
      Some(PipeEvent::Hiccuped) | None => {}
    }
    self.try_finish(io)
  }

  fn process_term(&mut self, io: &mut IoCtx<'_>) -> Disposition {
    self.pending_term = true;
    match self.core.options.linger {
      Some(d) if d.is_zero() => {
        // Discard everything immediately.
        if let Some(mut engine) = self.engine.take() {
          engine.terminate(io);
        }
        if let Some(pipe) = self.core.pipe.as_mut() {
          pipe.terminate(false);
        }
        self.drain_pipe();
      }
      Some(d) => {
        if !self.linger_armed {
          io.reactor.add_timer(d, self.core.oid, LINGER_TIMER);
          self.linger_armed = true;
        }
        if self.engine.is_none() {
          self.drain_pipe();
        }
      }
      None => {
        if self.engine.is_none() {
          self.drain_pipe();
        }
      }
    }
    self.try_finish(io)
  }

  /// With the engine gone nobody pulls from the pipe; keep consuming so
  /// the peer's delimiter can arrive and the pipe can close.
  fn drain_pipe(&mut self) {
    if !(self.pending_term || self.dying) {
      return;
    }
    if let Some(pipe) = self.core.pipe.as_mut() {
      while let Some(msg) = pipe.read() {
        drop(msg);
      }
    }
  }

  fn on_pipe_gone(&mut self, io: &mut IoCtx<'_>) -> Disposition {
    if self.pending_term {
      return self.try_finish(io);
    }
    // The socket dropped this pipe without (yet) terminating us; ask the
    // parent to reap this session.
    if !self.term_req_sent {
      self.term_req_sent = true;
      let child = CmdAddr {
        tid: self.core.tid,
        target: CmdTarget::Object(self.core.oid),
      };
      self.core.ctx.send_cmd(Command {
        dest: self.core.socket,
        kind: CommandKind::TermReq { child },
      });
    }
    Disposition::Keep
  }

  /// Completes the shutdown once the pipe is closed and the engine has
  /// nothing left to flush.
  fn try_finish(&mut self, io: &mut IoCtx<'_>) -> Disposition {
    if !self.pending_term {
      return Disposition::Keep;
    }
    if self.core.pipe.is_some() {
      return Disposition::Keep;
    }
    if let Some(engine) = self.engine.as_ref() {
      if engine.output_pending() {
        return Disposition::Keep;
      }
    }
    if let Some(mut engine) = self.engine.take() {
      engine.terminate(io);
    }
    if let Some((sock, handle)) = self.connecting.take() {
      io.reactor.remove_fd(handle);
      drop(sock);
    }
    io.reactor.cancel_timer(self.core.oid, RECONNECT_TIMER);
    io.reactor.cancel_timer(self.core.oid, LINGER_TIMER);
    self.core.ctx.send_cmd(Command {
      dest: self.core.socket,
      kind: CommandKind::TermAck { oid: self.core.oid },
    });
    tracing::debug!(oid = self.core.oid, uri = %self.core.endpoint_uri, "session finished");
    Disposition::Remove
  }

  // --- Engine management ---

  fn attach_engine(&mut self, io: &mut IoCtx<'_>, mut engine: Box<dyn Engine>) {
    engine.plug(io, &mut self.core);
    self.had_engine = true;
    self.engine = Some(engine);
  }

  fn with_engine(
    &mut self,
    io: &mut IoCtx<'_>,
    f: impl FnOnce(&mut dyn Engine, &mut IoCtx<'_>, &mut SessionCore) -> EngineStatus,
  ) {
    let Some(mut engine) = self.engine.take() else {
      return;
    };
    match f(engine.as_mut(), io, &mut self.core) {
      EngineStatus::Ok => {
        self.engine = Some(engine);
      }
      EngineStatus::Detach => {
        engine.terminate(io);
        drop(engine);
        self.engine_error(io);
      }
    }
  }

  /// The transport failed. Connect-side sessions hiccup the pipe and
  /// schedule a reconnect; accept-side sessions tear down.
  fn engine_error(&mut self, io: &mut IoCtx<'_>) {
    tracing::debug!(oid = self.core.oid, uri = %self.core.endpoint_uri, "engine detached");
    if self.pending_term || self.dying {
      self.drain_pipe();
      return;
    }
    if self.connect_endpoint.is_some() {
      if let Some(pipe) = self.core.pipe.as_mut() {
        // Unconsumed outbound messages are discarded; the socket gets a
        // Hiccuped event and replays whatever state it must (e.g.
        // subscriptions).
        pipe.hiccup();
      }
      self.schedule_reconnect(io);
    } else {
      self.dying = true;
      match self.core.pipe.as_mut() {
        Some(pipe) => pipe.terminate(false),
        None => {
          let _ = self.on_pipe_gone(io);
        }
      }
    }
  }

  fn schedule_reconnect(&mut self, io: &mut IoCtx<'_>) {
    io.reactor
      .add_timer(self.reconnect_ivl_current, self.core.oid, RECONNECT_TIMER);
    tracing::debug!(
      oid = self.core.oid,
      uri = %self.core.endpoint_uri,
      ivl_ms = self.reconnect_ivl_current.as_millis() as u64,
      "reconnect scheduled"
    );
    let max = self.core.options.reconnect_ivl_max;
    if !max.is_zero() {
      self.reconnect_ivl_current = (self.reconnect_ivl_current * 2).min(max);
    }
  }

  // --- Connecting ---

  fn start_connect(&mut self, io: &mut IoCtx<'_>) {
    let Some(endpoint) = self.connect_endpoint.clone() else {
      return;
    };
    match tcp::start_connect(&endpoint, &self.core.options) {
      Ok(tcp::ConnectProgress::Done(sock)) => self.finish_connect(io, sock),
      Ok(tcp::ConnectProgress::Pending(sock)) => {
        use std::os::unix::io::AsRawFd;
        let handle = io.reactor.add_fd(sock.as_raw_fd(), self.core.oid);
        io.reactor.set_pollout(handle);
        self.connecting = Some((sock, handle));
      }
      Err(e) => {
        tracing::debug!(uri = %self.core.endpoint_uri, error = %e, "connect failed to start");
        self.schedule_reconnect(io);
      }
    }
  }

  fn connect_event(&mut self, io: &mut IoCtx<'_>) {
    let Some((sock, handle)) = self.connecting.take() else {
      return;
    };
    io.reactor.remove_fd(handle);
    match sock.take_error() {
      Ok(None) => self.finish_connect(io, sock),
      Ok(Some(e)) => {
        tracing::debug!(uri = %self.core.endpoint_uri, error = %e, "connect refused");
        self.schedule_reconnect(io);
      }
      Err(e) => {
        tracing::debug!(uri = %self.core.endpoint_uri, error = %e, "connect status unknown");
        self.schedule_reconnect(io);
      }
    }
  }

  fn finish_connect(&mut self, io: &mut IoCtx<'_>, sock: socket2::Socket) {
    let Some(endpoint) = self.connect_endpoint.as_ref() else {
      return;
    };
    // Successful connection resets the backoff.
    self.reconnect_ivl_current = self.core.options.reconnect_ivl;
    let stream = tcp::into_stream(sock, endpoint);
    let engine = Box::new(crate::engine::StreamEngine::new(
      stream,
      self.core.options.identity.clone(),
    ));
    self.attach_engine(io, engine);
    tracing::debug!(oid = self.core.oid, uri = %self.core.endpoint_uri, "outgoing connection established");
  }

  // --- Reactor events ---

  pub fn in_event(&mut self, io: &mut IoCtx<'_>, handle: usize) -> Disposition {
    let connecting_handle = self.connecting.as_ref().map(|(_, h)| *h);
    if connecting_handle == Some(handle) {
      self.connect_event(io);
      return Disposition::Keep;
    }
    self.with_engine(io, |engine, io, core| engine.in_event(io, core));
    self.try_finish(io)
  }

  pub fn out_event(&mut self, io: &mut IoCtx<'_>, handle: usize) -> Disposition {
    let connecting_handle = self.connecting.as_ref().map(|(_, h)| *h);
    if connecting_handle == Some(handle) {
      self.connect_event(io);
      return Disposition::Keep;
    }
    self.with_engine(io, |engine, io, core| engine.out_event(io, core));
    self.try_finish(io)
  }

  pub fn timer_event(&mut self, io: &mut IoCtx<'_>, timer_id: u64) -> Disposition {
    match timer_id {
      RECONNECT_TIMER => {
        if !(self.pending_term || self.dying) && self.engine.is_none() && self.connecting.is_none() {
          self.start_connect(io);
        }
        Disposition::Keep
      }
      LINGER_TIMER => {
        // Time is up: stop flushing, close everything.
        if let Some(mut engine) = self.engine.take() {
          engine.terminate(io);
        }
        if let Some(pipe) = self.core.pipe.as_mut() {
          pipe.terminate(false);
        }
        self.drain_pipe();
        self.try_finish(io)
      }
      other => {
        tracing::warn!(oid = self.core.oid, timer_id = other, "unknown session timer");
        Disposition::Keep
      }
    }
  }
}
