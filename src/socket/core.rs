use crate::context::{CtxInner, InprocEntry, PendingConnect, REAPER_TID};
use crate::error::MqError;
use crate::message::{Msg, MsgFlags, SocketFlags};
use crate::runtime::command::{CmdAddr, CmdTarget, Command, CommandKind, Tid};
use crate::runtime::io_object::IoObject;
use crate::runtime::mailbox::Mailbox;
use crate::runtime::pipe::{pipe_pair, Pipe, PipeEvent};
use crate::session::SessionBase;
use crate::socket::options::{self, SocketOptions};
use crate::socket::patterns::PipeSet;
use crate::socket::types::SocketType;
use crate::socket::PatternKind;
use crate::transport::endpoint::{parse_endpoint, pgm_compatible, Endpoint};
use crate::transport::tcp::StreamListener;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Involuntary command drains on the hot path happen at most this often.
const COMMAND_THROTTLE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
enum EndpointRecord {
  InprocBind,
  InprocConnect { pipe_id: Option<usize> },
  Child { oid: usize },
}

/// The socket-side half of the machinery: owns the attached pipes,
/// applies the per-pattern routing, and mediates between the calling
/// thread and the engine threads through its mailbox.
///
/// Not internally locked; a `SocketBase` is driven by one thread at a
/// time (the API holder, then the reaper).
pub(crate) struct SocketBase {
  ctx: Arc<CtxInner>,
  socket_type: SocketType,
  tid: Tid,
  sid: usize,
  mailbox: Arc<Mailbox>,
  options: SocketOptions,
  pattern: PatternKind,
  pipes: PipeSet,
  endpoints: HashMap<String, EndpointRecord>,
  /// I/O objects (listeners, sessions) owned by this socket.
  children: HashMap<usize, CmdAddr>,
  term_sent: HashSet<usize>,
  /// Stop received: the context is shutting down.
  ctx_terminated: bool,
  /// close() ran; the reaper is driving us now.
  closing: bool,
  /// Reaped notification sent.
  destroyed: bool,
  last_endpoint: Option<String>,
  last_cmd_time: Instant,
  rcvmore: bool,
}

impl SocketBase {
  pub fn new(
    ctx: Arc<CtxInner>,
    socket_type: SocketType,
    tid: Tid,
    sid: usize,
    mailbox: Arc<Mailbox>,
  ) -> Self {
    Self {
      ctx,
      socket_type,
      tid,
      sid,
      mailbox,
      options: SocketOptions::default(),
      pattern: PatternKind::new(socket_type),
      pipes: PipeSet::default(),
      endpoints: HashMap::new(),
      children: HashMap::new(),
      term_sent: HashSet::new(),
      ctx_terminated: false,
      closing: false,
      destroyed: false,
      last_endpoint: None,
      last_cmd_time: Instant::now(),
      rcvmore: false,
    }
  }

  pub fn tid(&self) -> Tid {
    self.tid
  }

  pub fn mailbox_fd(&self) -> std::os::unix::io::RawFd {
    self.mailbox.fd()
  }

  pub fn rcvmore(&self) -> bool {
    self.rcvmore
  }

  fn addr(&self) -> CmdAddr {
    CmdAddr {
      tid: self.tid,
      target: CmdTarget::Own,
    }
  }

  // --- Endpoint management ---

  pub fn bind(&mut self, endpoint_str: &str) -> Result<(), MqError> {
    self.process_commands(None, false)?;
    match parse_endpoint(endpoint_str)? {
      Endpoint::Inproc(name) => {
        self.ctx.register_endpoint(
          &name,
          InprocEntry {
            tid: self.tid,
            options: self.options.clone(),
          },
        )?;
        self
          .endpoints
          .insert(endpoint_str.to_string(), EndpointRecord::InprocBind);
        self.last_endpoint = Some(endpoint_str.to_string());
        // Adopt connects that raced ahead of this bind.
        for pending in self.ctx.take_pending_connects(&name) {
          self.adopt_pending_connect(pending);
        }
        Ok(())
      }
      Endpoint::Tcp(address, uri) => {
        let (listener, resolved_uri) = StreamListener::bind_tcp(
          Arc::clone(&self.ctx),
          self.addr(),
          self.options.clone(),
          &address,
          &uri,
        )?;
        self.launch_listener(endpoint_str, resolved_uri, listener)
      }
      Endpoint::Ipc(path, uri) => {
        let (listener, resolved_uri) = StreamListener::bind_ipc(
          Arc::clone(&self.ctx),
          self.addr(),
          self.options.clone(),
          &path,
          &uri,
        )?;
        self.launch_listener(endpoint_str, resolved_uri, listener)
      }
      Endpoint::Pgm { uri, .. } => {
        if !pgm_compatible(self.socket_type) {
          return Err(MqError::AddrInvalid(uri));
        }
        Err(MqError::ProtocolNotSupported(uri))
      }
    }
  }

  fn launch_listener(
    &mut self,
    endpoint_str: &str,
    resolved_uri: String,
    listener: StreamListener,
  ) -> Result<(), MqError> {
    let io_tid = self.ctx.choose_io_thread()?;
    let oid = self.ctx.next_object_id();
    self.children.insert(
      oid,
      CmdAddr {
        tid: io_tid,
        target: CmdTarget::Object(oid),
      },
    );
    // Record under both spellings so unbind works with either the
    // requested or the resolved address.
    self
      .endpoints
      .insert(endpoint_str.to_string(), EndpointRecord::Child { oid });
    if resolved_uri != endpoint_str {
      self
        .endpoints
        .insert(resolved_uri.clone(), EndpointRecord::Child { oid });
    }
    self.last_endpoint = Some(resolved_uri);
    self.ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: io_tid,
        target: CmdTarget::Own,
      },
      kind: CommandKind::Plug {
        oid,
        object: IoObject::Listener(Box::new(listener)),
      },
    });
    Ok(())
  }

  pub fn connect(&mut self, endpoint_str: &str) -> Result<(), MqError> {
    self.process_commands(None, false)?;
    match parse_endpoint(endpoint_str)? {
      Endpoint::Inproc(name) => {
        match self.ctx.find_endpoint(&name) {
          Some(entry) => {
            let pipe_id = self.connect_inproc(&entry);
            self.endpoints.insert(
              endpoint_str.to_string(),
              EndpointRecord::InprocConnect {
                pipe_id: Some(pipe_id),
              },
            );
          }
          None => {
            // Bind hasn't happened yet; park the connect in the
            // directory for the future binder to adopt.
            self.ctx.pend_connect(
              &name,
              PendingConnect {
                tid: self.tid,
                options: self.options.clone(),
              },
            );
            self.endpoints.insert(
              endpoint_str.to_string(),
              EndpointRecord::InprocConnect { pipe_id: None },
            );
          }
        }
        Ok(())
      }
      endpoint @ (Endpoint::Tcp(..) | Endpoint::Ipc(..)) => {
        let io_tid = self.ctx.choose_io_thread()?;
        let oid = self.ctx.next_object_id();
        // The pipe exists from the start, so sends queue while the
        // connection (or reconnection) is still in progress.
        let (socket_end, session_end) = pipe_pair(
          &self.ctx,
          [self.tid, io_tid],
          [self.options.sndhwm, self.options.rcvhwm],
          [true, true],
        );
        self.attach_pipe(socket_end);
        let session = SessionBase::for_connect(
          Arc::clone(&self.ctx),
          io_tid,
          self.addr(),
          self.options.clone(),
          endpoint,
          session_end,
        );
        self.children.insert(
          oid,
          CmdAddr {
            tid: io_tid,
            target: CmdTarget::Object(oid),
          },
        );
        self
          .endpoints
          .insert(endpoint_str.to_string(), EndpointRecord::Child { oid });
        self.ctx.send_cmd(Command {
          dest: CmdAddr {
            tid: io_tid,
            target: CmdTarget::Own,
          },
          kind: CommandKind::Plug {
            oid,
            object: IoObject::Session(Box::new(session)),
          },
        });
        Ok(())
      }
      Endpoint::Pgm { uri, .. } => {
        if !pgm_compatible(self.socket_type) {
          return Err(MqError::AddrInvalid(uri));
        }
        Err(MqError::ProtocolNotSupported(uri))
      }
    }
  }

  /// Builds the pipe pair towards an inproc binder, attaches our end and
  /// mails the binder its end. Returns our pipe id.
  fn connect_inproc(&mut self, entry: &InprocEntry) -> usize {
    let (mut our_end, mut their_end) = pipe_pair(
      &self.ctx,
      [self.tid, entry.tid],
      [
        options::combined_hwm(self.options.sndhwm, entry.options.rcvhwm),
        options::combined_hwm(entry.options.sndhwm, self.options.rcvhwm),
      ],
      [true, true],
    );
    our_end.set_identity(entry.options.identity.clone());
    their_end.set_identity(self.options.identity.clone());
    let id = our_end.id();
    self.attach_pipe(our_end);
    self.ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: entry.tid,
        target: CmdTarget::Own,
      },
      kind: CommandKind::Bind { pipe: their_end },
    });
    self.ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: entry.tid,
        target: CmdTarget::Own,
      },
      kind: CommandKind::InprocConnected,
    });
    id
  }

  /// A bind arrived for an endpoint that connects raced ahead of.
  fn adopt_pending_connect(&mut self, pending: PendingConnect) {
    let (mut our_end, mut their_end) = pipe_pair(
      &self.ctx,
      [self.tid, pending.tid],
      [
        options::combined_hwm(self.options.sndhwm, pending.options.rcvhwm),
        options::combined_hwm(pending.options.sndhwm, self.options.rcvhwm),
      ],
      [true, true],
    );
    our_end.set_identity(pending.options.identity.clone());
    their_end.set_identity(self.options.identity.clone());
    self.attach_pipe(our_end);
    self.ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: pending.tid,
        target: CmdTarget::Own,
      },
      kind: CommandKind::Bind { pipe: their_end },
    });
    self.ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: pending.tid,
        target: CmdTarget::Own,
      },
      kind: CommandKind::InprocConnected,
    });
  }

  /// Unbind/disconnect: tears down whatever the endpoint record points
  /// at.
  pub fn term_endpoint(&mut self, endpoint_str: &str) -> Result<(), MqError> {
    self.process_commands(None, false)?;
    let record = self
      .endpoints
      .remove(endpoint_str)
      .ok_or_else(|| MqError::EndpointNotFound(endpoint_str.to_string()))?;
    match record {
      EndpointRecord::InprocBind => {
        if let Ok(Endpoint::Inproc(name)) = parse_endpoint(endpoint_str) {
          self.ctx.unregister_endpoint(&name, self.tid);
        }
        // Established connections outlive the registration.
        Ok(())
      }
      EndpointRecord::InprocConnect { pipe_id } => {
        if let Some(id) = pipe_id {
          self.pipes.terminate(id, self.options.linger != Some(Duration::ZERO));
        }
        Ok(())
      }
      EndpointRecord::Child { oid } => {
        self.send_term_to_child(oid);
        Ok(())
      }
    }
  }

  fn send_term_to_child(&mut self, oid: usize) {
    if self.term_sent.contains(&oid) {
      return;
    }
    if let Some(addr) = self.children.get(&oid).copied() {
      self.term_sent.insert(oid);
      self.ctx.send_cmd(Command {
        dest: addr,
        kind: CommandKind::Term,
      });
    }
  }

  fn attach_pipe(&mut self, pipe: Pipe) {
    let id = pipe.id();
    self.pipes.insert(pipe);
    self.pattern.xattach_pipe(&mut self.pipes, id);
    if self.closing {
      // Late arrival during shutdown; turn it right around.
      self.pipes.terminate(id, false);
    }
  }

  // --- Send / receive ---

  pub fn send(&mut self, mut msg: Msg, flags: SocketFlags) -> Result<(), MqError> {
    self.process_commands(None, true)?;
    if flags.contains(SocketFlags::SEND_MORE) {
      msg.insert_flags(MsgFlags::MORE);
    }
    msg = match self.pattern.xsend(&mut self.pipes, msg) {
      Ok(()) => return Ok(()),
      Err((m, MqError::Again)) => m,
      Err((_, e)) => return Err(e),
    };
    if flags.contains(SocketFlags::DONT_WAIT) || self.options.sndtimeo == Some(Duration::ZERO) {
      return Err(MqError::Again);
    }
    let deadline = self.options.sndtimeo.map(|t| Instant::now() + t);
    loop {
      let timeout = match deadline {
        None => None,
        Some(d) => {
          let now = Instant::now();
          if now >= d {
            return Err(MqError::Again);
          }
          Some(d - now)
        }
      };
      self.process_commands(Some(timeout), false)?;
      msg = match self.pattern.xsend(&mut self.pipes, msg) {
        Ok(()) => return Ok(()),
        Err((m, MqError::Again)) => m,
        Err((_, e)) => return Err(e),
      };
    }
  }

  pub fn recv(&mut self, flags: SocketFlags) -> Result<Msg, MqError> {
    self.process_commands(None, true)?;
    match self.pattern.xrecv(&mut self.pipes) {
      Ok(msg) => {
        self.rcvmore = msg.is_more();
        return Ok(msg);
      }
      Err(MqError::Again) => {}
      Err(e) => return Err(e),
    }
    if flags.contains(SocketFlags::DONT_WAIT) || self.options.rcvtimeo == Some(Duration::ZERO) {
      // Activation commands may still be queued; drain unthrottled and
      // retry once before reporting Again.
      self.process_commands(None, false)?;
      let msg = self.pattern.xrecv(&mut self.pipes)?;
      self.rcvmore = msg.is_more();
      return Ok(msg);
    }
    let deadline = self.options.rcvtimeo.map(|t| Instant::now() + t);
    loop {
      let timeout = match deadline {
        None => None,
        Some(d) => {
          let now = Instant::now();
          if now >= d {
            return Err(MqError::Again);
          }
          Some(d - now)
        }
      };
      self.process_commands(Some(timeout), false)?;
      match self.pattern.xrecv(&mut self.pipes) {
        Ok(msg) => {
          self.rcvmore = msg.is_more();
          return Ok(msg);
        }
        Err(MqError::Again) => {}
        Err(e) => return Err(e),
      }
    }
  }

  // --- Options ---

  pub fn set_option(&mut self, option: i32, value: &[u8]) -> Result<(), MqError> {
    self.process_commands(None, false)?;
    let handled = self.pattern.xsetsockopt(&mut self.pipes, option, value)?;
    match self.options.set(option, value) {
      Ok(()) => Ok(()),
      Err(MqError::InvalidOption(_)) if handled => Ok(()),
      Err(e) => {
        if handled {
          Ok(())
        } else {
          Err(e)
        }
      }
    }
  }

  pub fn get_option(&mut self, option: i32) -> Result<Vec<u8>, MqError> {
    match option {
      options::EVENTS => {
        let events = self.events()?;
        Ok((events as i32).to_ne_bytes().to_vec())
      }
      options::LAST_ENDPOINT => Ok(
        self
          .last_endpoint
          .clone()
          .unwrap_or_default()
          .into_bytes(),
      ),
      _ => self.options.get(option),
    }
  }

  /// Readiness bitmap: PollIn | PollOut.
  pub fn events(&mut self) -> Result<u32, MqError> {
    self.process_commands(None, false)?;
    let mut events = 0;
    if self.pattern.xhas_in(&mut self.pipes) {
      events |= options::POLL_IN;
    }
    if self.pattern.xhas_out(&mut self.pipes) {
      events |= options::POLL_OUT;
    }
    Ok(events)
  }

  // --- Command processing ---

  /// Drains the mailbox. `block` of `Some(timeout)` waits up to the
  /// timeout (None = forever) for the first command; `None` doesn't
  /// wait, and with `throttle` skips the drain entirely when one
  /// happened recently.
  fn process_commands(&mut self, block: Option<Option<Duration>>, throttle: bool) -> Result<(), MqError> {
    let mut cmd = match block {
      Some(timeout) => match self.mailbox.recv(timeout) {
        Ok(cmd) => Some(cmd),
        Err(MqError::Again) => None,
        Err(e) => return Err(e),
      },
      None => {
        if throttle && self.last_cmd_time.elapsed() < COMMAND_THROTTLE {
          return self.check_ctx_terminated();
        }
        self.mailbox.try_recv().ok()
      }
    };
    while let Some(command) = cmd {
      self.process_command(command);
      cmd = self.mailbox.try_recv().ok();
    }
    self.last_cmd_time = Instant::now();
    self.check_ctx_terminated()
  }

  fn check_ctx_terminated(&self) -> Result<(), MqError> {
    if self.ctx_terminated {
      Err(MqError::Terminating)
    } else {
      Ok(())
    }
  }

  fn process_command(&mut self, cmd: Command) {
    match cmd.dest.target {
      CmdTarget::Own => self.process_own_command(cmd.kind),
      CmdTarget::Pipe(pipe_id) => self.process_pipe_command(pipe_id, cmd.kind),
      CmdTarget::Object(_) => {
        tracing::warn!(sid = self.sid, "I/O object command arrived at a socket");
      }
    }
  }

  fn process_own_command(&mut self, kind: CommandKind) {
    match kind {
      CommandKind::Stop => {
        self.ctx_terminated = true;
      }
      CommandKind::Bind { pipe } => {
        self.attach_pipe(pipe);
      }
      CommandKind::InprocConnected => {}
      CommandKind::Own { child } => {
        if let CmdTarget::Object(oid) = child.target {
          self.children.insert(oid, child);
          if self.closing {
            self.send_term_to_child(oid);
          }
        }
      }
      CommandKind::TermReq { child } => {
        if let CmdTarget::Object(oid) = child.target {
          if self.children.contains_key(&oid) {
            self.send_term_to_child(oid);
          }
        }
      }
      CommandKind::TermAck { oid } => {
        self.children.remove(&oid);
        self.term_sent.remove(&oid);
        self.check_destroy();
      }
      other => {
        tracing::warn!(sid = self.sid, cmd = ?std::mem::discriminant(&other), "unexpected socket command");
      }
    }
  }

  fn process_pipe_command(&mut self, pipe_id: usize, kind: CommandKind) {
    let event = match self.pipes.get_mut(pipe_id) {
      Some(pipe) => pipe.process_command(kind),
      // Commands may trail behind a pipe that already closed.
      None => return,
    };
    match event {
      Some(PipeEvent::ReadActivated) => self.pattern.xread_activated(&mut self.pipes, pipe_id),
      Some(PipeEvent::WriteActivated) => self.pattern.xwrite_activated(&mut self.pipes, pipe_id),
      Some(PipeEvent::Hiccuped) => self.pattern.xhiccuped(&mut self.pipes, pipe_id),
      Some(PipeEvent::Terminated) => {
        self.pattern.xpipe_terminated(&mut self.pipes, pipe_id);
        self.pipes.remove(pipe_id);
        self.endpoints.retain(|_, record| {
          !matches!(record, EndpointRecord::InprocConnect { pipe_id: Some(id) } if *id == pipe_id)
        });
        self.check_destroy();
      }
      None => {}
    }
  }

  // --- Shutdown ---

  /// Ships the socket to the reaper. Called from the API handle's
  /// close/drop; after this the reaper drives the state machine.
  pub fn close(self: Box<Self>) {
    let ctx = Arc::clone(&self.ctx);
    tracing::debug!(sid = self.sid, tid = self.tid, "socket closing");
    ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: REAPER_TID,
        target: CmdTarget::Own,
      },
      kind: CommandKind::Reap { socket: self },
    });
  }

  /// First step on the reaper: unregister endpoints, terminate pipes and
  /// children.
  pub fn initiate_close(&mut self) {
    self.closing = true;
    self.ctx.unregister_endpoints_for(self.tid);
    self.ctx.drop_pending_connects_for(self.tid);
    let ids: Vec<usize> = self.pipes.ids().collect();
    for id in ids {
      self.pipes.terminate(id, false);
    }
    let oids: Vec<usize> = self.children.keys().copied().collect();
    for oid in oids {
      self.send_term_to_child(oid);
    }
    self.check_destroy();
  }

  /// Reaper-side command pump; Terminating from a Stop is expected here.
  pub fn drive_termination(&mut self) {
    match self.process_commands(None, false) {
      Ok(()) | Err(MqError::Terminating) => {}
      Err(e) => tracing::warn!(sid = self.sid, error = %e, "error while terminating socket"),
    }
    self.check_destroy();
  }

  fn check_destroy(&mut self) {
    if self.closing && !self.destroyed && self.pipes.is_empty() && self.children.is_empty() {
      self.destroyed = true;
      self.ctx.send_cmd(Command {
        dest: CmdAddr {
          tid: REAPER_TID,
          target: CmdTarget::Own,
        },
        kind: CommandKind::Reaped { tid: self.tid },
      });
    }
  }
}

impl std::fmt::Debug for SocketBase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SocketBase")
      .field("type", &self.socket_type.name())
      .field("sid", &self.sid)
      .field("tid", &self.tid)
      .field("pipes", &self.pipes.len())
      .field("closing", &self.closing)
      .finish()
  }
}
