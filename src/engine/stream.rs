use crate::engine::{Engine, EngineStatus};
use crate::error::MqError;
use crate::message::{Blob, Msg};
use crate::protocol::{FrameCodec, Greeting, GreetingDecoder};
use crate::runtime::io_object::IoCtx;
use crate::session::SessionCore;
use bytes::BytesMut;
use std::io::{Read, Write};

/// Soft cap on the bytes encoded ahead of the wire; more messages are
/// pulled once the buffer drains.
const OUT_BATCH_SIZE: usize = 8192;
const IN_CHUNK_SIZE: usize = 8192;

/// The OS stream an engine drives. TCP and IPC share all framing logic.
pub(crate) enum StreamFd {
  Tcp(std::net::TcpStream),
  #[cfg(unix)]
  Unix(std::os::unix::net::UnixStream),
}

impl StreamFd {
  fn raw_fd(&self) -> std::os::unix::io::RawFd {
    use std::os::unix::io::AsRawFd;
    match self {
      StreamFd::Tcp(s) => s.as_raw_fd(),
      #[cfg(unix)]
      StreamFd::Unix(s) => s.as_raw_fd(),
    }
  }

  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    match self {
      StreamFd::Tcp(s) => s.read(buf),
      #[cfg(unix)]
      StreamFd::Unix(s) => s.read(buf),
    }
  }

  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    match self {
      StreamFd::Tcp(s) => s.write(buf),
      #[cfg(unix)]
      StreamFd::Unix(s) => s.write(buf),
    }
  }
}

/// Framed engine over a nonblocking stream: exchanges the greeting, then
/// pumps messages between the wire and the session's pipe, obeying the
/// pipe's flow control in both directions.
pub(crate) struct StreamEngine {
  stream: StreamFd,
  handle: Option<usize>,
  inbuf: BytesMut,
  outbuf: BytesMut,
  codec: FrameCodec,
  /// Present until the peer's greeting has been fully parsed.
  greeting: Option<GreetingDecoder>,
  local_identity: Option<Blob>,
  /// Decoded message the session refused (watermark); retried on
  /// restart_input.
  pending_in: Option<Msg>,
  input_stopped: bool,
  output_stopped: bool,
}

impl StreamEngine {
  pub fn new(stream: StreamFd, local_identity: Option<Blob>) -> Self {
    Self {
      stream,
      handle: None,
      inbuf: BytesMut::with_capacity(IN_CHUNK_SIZE),
      outbuf: BytesMut::with_capacity(OUT_BATCH_SIZE),
      codec: FrameCodec::new(),
      greeting: Some(GreetingDecoder::new()),
      local_identity,
      pending_in: None,
      input_stopped: false,
      output_stopped: false,
    }
  }

  /// Feeds buffered wire bytes through the greeting and frame decoders
  /// into the session.
  fn process_input(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> Result<(), MqError> {
    if let Some(decoder) = self.greeting.as_mut() {
      match decoder.decode(&mut self.inbuf)? {
        Some(greeting) => {
          self.greeting = None;
          session.engine_ready(io, greeting.identity);
        }
        None => return Ok(()),
      }
    }
    if let Some(msg) = self.pending_in.take() {
      if let Err(refused) = session.push_msg(msg) {
        self.pending_in = Some(refused);
        self.stall_input(io);
        return Ok(());
      }
    }
    while let Some(msg) = self.codec.decode(&mut self.inbuf)? {
      if let Err(refused) = session.push_msg(msg) {
        self.pending_in = Some(refused);
        self.stall_input(io);
        break;
      }
    }
    session.flush();
    Ok(())
  }

  fn stall_input(&mut self, io: &mut IoCtx<'_>) {
    if let Some(handle) = self.handle {
      io.reactor.reset_pollin(handle);
    }
    self.input_stopped = true;
  }

  /// Pulls messages from the session and writes as much as the socket
  /// accepts. Returns Detach on a transport fault.
  fn pump_output(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus {
    loop {
      // Top up the buffer from the pipe.
      let mut no_more = false;
      while self.outbuf.len() < OUT_BATCH_SIZE {
        match session.pull_msg() {
          Some(msg) => self.codec.encode(&msg, &mut self.outbuf),
          None => {
            no_more = true;
            break;
          }
        }
      }
      if self.outbuf.is_empty() {
        if let Some(handle) = self.handle {
          io.reactor.reset_pollout(handle);
        }
        self.output_stopped = true;
        return EngineStatus::Ok;
      }
      match self.stream.write(&self.outbuf) {
        Ok(0) => return EngineStatus::Detach,
        Ok(n) => {
          let _ = self.outbuf.split_to(n);
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
          if let Some(handle) = self.handle {
            io.reactor.set_pollout(handle);
          }
          self.output_stopped = false;
          return EngineStatus::Ok;
        }
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => {
          tracing::debug!(error = %e, "stream write failed");
          return EngineStatus::Detach;
        }
      }
      if no_more && self.outbuf.is_empty() {
        if let Some(handle) = self.handle {
          io.reactor.reset_pollout(handle);
        }
        self.output_stopped = true;
        return EngineStatus::Ok;
      }
    }
  }
}

impl Engine for StreamEngine {
  fn plug(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) {
    let handle = io.reactor.add_fd(self.stream.raw_fd(), session.oid());
    io.reactor.set_pollin(handle);
    io.reactor.set_pollout(handle);
    self.handle = Some(handle);
    Greeting::new(self.local_identity.clone()).encode(&mut self.outbuf);
    tracing::trace!(oid = session.oid(), "stream engine plugged");
  }

  fn terminate(&mut self, io: &mut IoCtx<'_>) {
    if let Some(handle) = self.handle.take() {
      io.reactor.remove_fd(handle);
    }
  }

  fn restart_input(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus {
    if !self.input_stopped {
      return EngineStatus::Ok;
    }
    self.input_stopped = false;
    if let Some(handle) = self.handle {
      io.reactor.set_pollin(handle);
    }
    match self.process_input(io, session) {
      Ok(()) => EngineStatus::Ok,
      Err(e) => {
        tracing::debug!(error = %e, "protocol error on restart");
        EngineStatus::Detach
      }
    }
  }

  fn restart_output(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus {
    self.output_stopped = false;
    self.pump_output(io, session)
  }

  fn in_event(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus {
    let mut chunk = [0u8; IN_CHUNK_SIZE];
    loop {
      if self.input_stopped {
        break;
      }
      match self.stream.read(&mut chunk) {
        Ok(0) => return EngineStatus::Detach,
        Ok(n) => {
          self.inbuf.extend_from_slice(&chunk[..n]);
          if let Err(e) = self.process_input(io, session) {
            tracing::debug!(error = %e, "protocol error");
            return EngineStatus::Detach;
          }
          if n < chunk.len() {
            break;
          }
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => {
          tracing::debug!(error = %e, "stream read failed");
          return EngineStatus::Detach;
        }
      }
    }
    EngineStatus::Ok
  }

  fn out_event(&mut self, io: &mut IoCtx<'_>, session: &mut SessionCore) -> EngineStatus {
    self.pump_output(io, session)
  }

  fn output_pending(&self) -> bool {
    !self.outbuf.is_empty()
  }
}
