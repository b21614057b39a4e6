use crate::context::CtxInner;
use crate::engine::{Engine, StreamEngine, StreamFd};
use crate::error::MqError;
use crate::runtime::command::{CmdAddr, CmdTarget, Command, CommandKind};
use crate::runtime::io_object::{Disposition, IoCtx, IoObject};
use crate::session::SessionBase;
use crate::socket::options::SocketOptions;
use crate::transport::endpoint::Endpoint;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::Arc;

/// Resolves a `host:port` address part; `*` stands for any interface and
/// port `*` (or 0) for an ephemeral port.
pub(crate) fn resolve_tcp(address: &str, uri: &str) -> Result<SocketAddr, MqError> {
  let Some(colon) = address.rfind(':') else {
    return Err(MqError::AddrInvalid(uri.to_string()));
  };
  let (host, port_str) = (&address[..colon], &address[colon + 1..]);
  let host = if host == "*" { "0.0.0.0" } else { host };
  let port: u16 = if port_str == "*" {
    0
  } else {
    port_str.parse().map_err(|_| MqError::AddrInvalid(uri.to_string()))?
  };
  (host, port)
    .to_socket_addrs()
    .map_err(|e| MqError::from_io_endpoint(e, uri))?
    .next()
    .ok_or_else(|| MqError::AddrInvalid(uri.to_string()))
}

/// Applies per-connection socket options the moment a stream exists.
pub(crate) fn apply_stream_options(sock: &Socket, options: &SocketOptions) {
  if let Err(e) = sock.set_nonblocking(true) {
    tracing::warn!(error = %e, "failed to set stream nonblocking");
  }
  let _ = sock.set_nodelay(options.tcp_nodelay);
  if let Some(sndbuf) = options.sndbuf {
    let _ = sock.set_send_buffer_size(sndbuf);
  }
  if let Some(rcvbuf) = options.rcvbuf {
    let _ = sock.set_recv_buffer_size(rcvbuf);
  }
}

/// A nonblocking connect in flight, or one that completed immediately.
pub(crate) enum ConnectProgress {
  Done(Socket),
  Pending(Socket),
}

/// Starts a nonblocking connect towards a TCP or IPC endpoint.
pub(crate) fn start_connect(endpoint: &Endpoint, options: &SocketOptions) -> Result<ConnectProgress, MqError> {
  let (sock, addr) = match endpoint {
    Endpoint::Tcp(address, uri) => {
      let addr = resolve_tcp(address, uri)?;
      let domain = Domain::for_address(addr);
      let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| MqError::from_io_endpoint(e, uri))?;
      (sock, SockAddr::from(addr))
    }
    Endpoint::Ipc(path, uri) => {
      let sock =
        Socket::new(Domain::UNIX, Type::STREAM, None).map_err(|e| MqError::from_io_endpoint(e, uri))?;
      let addr = SockAddr::unix(path).map_err(|e| MqError::from_io_endpoint(e, uri))?;
      (sock, addr)
    }
    other => return Err(MqError::ProtocolNotSupported(other.uri())),
  };
  apply_stream_options(&sock, options);
  match sock.connect(&addr) {
    Ok(()) => Ok(ConnectProgress::Done(sock)),
    Err(e)
      if e.raw_os_error() == Some(libc::EINPROGRESS)
        || e.kind() == std::io::ErrorKind::WouldBlock =>
    {
      Ok(ConnectProgress::Pending(sock))
    }
    Err(e) => Err(MqError::from_io_endpoint(e, &endpoint.uri())),
  }
}

/// Wraps a connected socket into the engine-facing stream type.
pub(crate) fn into_stream(sock: Socket, endpoint: &Endpoint) -> StreamFd {
  match endpoint {
    Endpoint::Ipc(..) => {
      let fd = sock.into_raw_fd();
      StreamFd::Unix(unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) })
    }
    _ => {
      let fd = sock.into_raw_fd();
      StreamFd::Tcp(unsafe { std::net::TcpStream::from_raw_fd(fd) })
    }
  }
}

enum ListenerFd {
  Tcp(TcpListener),
  Unix(std::os::unix::net::UnixListener),
}

impl ListenerFd {
  fn raw_fd(&self) -> std::os::unix::io::RawFd {
    match self {
      ListenerFd::Tcp(l) => l.as_raw_fd(),
      ListenerFd::Unix(l) => l.as_raw_fd(),
    }
  }
}

/// Accepting side of the stream transports. Lives on an I/O thread; each
/// accepted connection becomes a session (on the least loaded thread)
/// with a stream engine attached.
pub(crate) struct StreamListener {
  ctx: Arc<CtxInner>,
  socket: CmdAddr,
  oid: usize,
  options: SocketOptions,
  listener: ListenerFd,
  handle: Option<usize>,
  uri: String,
}

impl StreamListener {
  /// Binds a TCP listener synchronously so bind errors surface to the
  /// caller. Returns the listener and the concrete URI (with the real
  /// port when an ephemeral one was requested).
  pub fn bind_tcp(
    ctx: Arc<CtxInner>,
    socket: CmdAddr,
    options: SocketOptions,
    address: &str,
    uri: &str,
  ) -> Result<(Self, String), MqError> {
    let addr = resolve_tcp(address, uri)?;
    let domain = Domain::for_address(addr);
    let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
      .map_err(|e| MqError::from_io_endpoint(e, uri))?;
    sock
      .set_reuse_address(true)
      .and_then(|_| sock.set_nonblocking(true))
      .and_then(|_| sock.bind(&SockAddr::from(addr)))
      .and_then(|_| sock.listen(options.backlog))
      .map_err(|e| MqError::from_io_endpoint(e, uri))?;
    let listener: TcpListener = sock.into();
    let local = listener
      .local_addr()
      .map_err(|e| MqError::from_io_endpoint(e, uri))?;
    let resolved_uri = format!("tcp://{local}");
    Ok((
      Self {
        ctx,
        socket,
        oid: 0,
        options,
        listener: ListenerFd::Tcp(listener),
        handle: None,
        uri: resolved_uri.clone(),
      },
      resolved_uri,
    ))
  }

  /// Binds a unix-domain listener for `ipc://` endpoints.
  pub fn bind_ipc(
    ctx: Arc<CtxInner>,
    socket: CmdAddr,
    options: SocketOptions,
    path: &std::path::Path,
    uri: &str,
  ) -> Result<(Self, String), MqError> {
    let listener =
      std::os::unix::net::UnixListener::bind(path).map_err(|e| MqError::from_io_endpoint(e, uri))?;
    listener
      .set_nonblocking(true)
      .map_err(|e| MqError::from_io_endpoint(e, uri))?;
    Ok((
      Self {
        ctx,
        socket,
        oid: 0,
        options,
        listener: ListenerFd::Unix(listener),
        handle: None,
        uri: uri.to_string(),
      },
      uri.to_string(),
    ))
  }

  pub fn plug(&mut self, io: &mut IoCtx<'_>, oid: usize) {
    self.oid = oid;
    let handle = io.reactor.add_fd(self.listener.raw_fd(), oid);
    io.reactor.set_pollin(handle);
    self.handle = Some(handle);
    tracing::debug!(uri = %self.uri, oid, "listener plugged");
  }

  pub fn process_command(&mut self, io: &mut IoCtx<'_>, _target: CmdTarget, kind: CommandKind) -> Disposition {
    match kind {
      CommandKind::Term => {
        if let Some(handle) = self.handle.take() {
          io.reactor.remove_fd(handle);
        }
        self.ctx.send_cmd(Command {
          dest: self.socket,
          kind: CommandKind::TermAck { oid: self.oid },
        });
        Disposition::Remove
      }
      other => {
        tracing::warn!(cmd = ?std::mem::discriminant(&other), "unexpected listener command");
        Disposition::Keep
      }
    }
  }

  pub fn in_event(&mut self, _io: &mut IoCtx<'_>, _handle: usize) -> Disposition {
    loop {
      let accepted = match &self.listener {
        ListenerFd::Tcp(l) => l.accept().map(|(s, _)| Socket::from(s)),
        ListenerFd::Unix(l) => l.accept().map(|(s, _)| {
          let fd = s.into_raw_fd();
          unsafe { Socket::from_raw_fd(fd) }
        }),
      };
      match accepted {
        Ok(sock) => self.launch_session(sock),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => {
          tracing::warn!(uri = %self.uri, error = %e, "accept failed");
          break;
        }
      }
    }
    Disposition::Keep
  }

  fn launch_session(&mut self, sock: Socket) {
    apply_stream_options(&sock, &self.options);
    let io_tid = match self.ctx.choose_io_thread() {
      Ok(tid) => tid,
      Err(_) => return,
    };
    let session_oid = self.ctx.next_object_id();
    let session_addr = CmdAddr {
      tid: io_tid,
      target: CmdTarget::Object(session_oid),
    };
    let session = SessionBase::for_accept(
      Arc::clone(&self.ctx),
      io_tid,
      self.socket,
      self.options.clone(),
      self.uri.clone(),
    );
    let stream = match &self.listener {
      ListenerFd::Tcp(_) => {
        let fd = sock.into_raw_fd();
        StreamFd::Tcp(unsafe { std::net::TcpStream::from_raw_fd(fd) })
      }
      ListenerFd::Unix(_) => {
        let fd = sock.into_raw_fd();
        StreamFd::Unix(unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) })
      }
    };
    let engine: Box<dyn Engine> = Box::new(StreamEngine::new(stream, self.options.identity.clone()));

    // Ownership first, so a closing socket knows to terminate the child.
    self.ctx.send_cmd(Command {
      dest: self.socket,
      kind: CommandKind::Own { child: session_addr },
    });
    self.ctx.send_cmd(Command {
      dest: CmdAddr {
        tid: io_tid,
        target: CmdTarget::Own,
      },
      kind: CommandKind::Plug {
        oid: session_oid,
        object: IoObject::Session(Box::new(session)),
      },
    });
    self.ctx.send_cmd(Command {
      dest: session_addr,
      kind: CommandKind::Attach { engine },
    });
    tracing::debug!(uri = %self.uri, session_oid, io_tid, "connection accepted");
  }

  pub fn out_event(&mut self, _io: &mut IoCtx<'_>, _handle: usize) -> Disposition {
    Disposition::Keep
  }

  pub fn timer_event(&mut self, _io: &mut IoCtx<'_>, _timer_id: u64) -> Disposition {
    Disposition::Keep
  }
}
