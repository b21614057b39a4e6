use crate::error::MqError;
use crate::message::{Msg, SocketFlags};
use crate::socket::core::SocketBase;

/// The messaging pattern a socket participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
  Pair,
  Pub,
  Sub,
  Req,
  Rep,
  Dealer,
  Router,
  Pull,
  Push,
  XPub,
  XSub,
}

impl SocketType {
  pub fn name(&self) -> &'static str {
    match self {
      SocketType::Pair => "PAIR",
      SocketType::Pub => "PUB",
      SocketType::Sub => "SUB",
      SocketType::Req => "REQ",
      SocketType::Rep => "REP",
      SocketType::Dealer => "DEALER",
      SocketType::Router => "ROUTER",
      SocketType::Pull => "PULL",
      SocketType::Push => "PUSH",
      SocketType::XPub => "XPUB",
      SocketType::XSub => "XSUB",
    }
  }
}

/// User-facing socket handle.
///
/// A socket is not internally synchronized: it must be used from one
/// thread at a time. Moving it to another thread is fine; sharing it
/// concurrently is not, which Rust's ownership rules enforce since every
/// operation takes `&mut self`.
///
/// Dropping the handle closes the socket; queued messages are flushed
/// according to the Linger option.
#[derive(Debug)]
pub struct Socket {
  base: Option<Box<SocketBase>>,
}

impl Socket {
  pub(crate) fn from_base(base: SocketBase) -> Self {
    Self {
      base: Some(Box::new(base)),
    }
  }

  fn base_mut(&mut self) -> &mut SocketBase {
    // The Option is only empty after close(), which consumes self.
    self.base.as_mut().expect("socket already closed")
  }

  /// Binds to a local endpoint, e.g. `tcp://127.0.0.1:5555` or
  /// `inproc://name`. Binding `tcp` port 0 picks an ephemeral port,
  /// readable back through the LastEndpoint option.
  pub fn bind(&mut self, endpoint: &str) -> Result<(), MqError> {
    self.base_mut().bind(endpoint)
  }

  /// Connects to a remote or in-process endpoint.
  pub fn connect(&mut self, endpoint: &str) -> Result<(), MqError> {
    self.base_mut().connect(endpoint)
  }

  /// Stops listening on a bound endpoint. Existing connections survive.
  pub fn unbind(&mut self, endpoint: &str) -> Result<(), MqError> {
    self.base_mut().term_endpoint(endpoint)
  }

  /// Drops the connection to an endpoint established with `connect`.
  pub fn disconnect(&mut self, endpoint: &str) -> Result<(), MqError> {
    self.base_mut().term_endpoint(endpoint)
  }

  /// Sends one frame. `SocketFlags::SEND_MORE` marks a non-final frame of
  /// a multi-part message; `SocketFlags::DONT_WAIT` fails with
  /// `MqError::Again` instead of blocking.
  pub fn send(&mut self, msg: Msg, flags: SocketFlags) -> Result<(), MqError> {
    self.base_mut().send(msg, flags)
  }

  /// Receives one frame, blocking per the ReceiveTimeout option unless
  /// `SocketFlags::DONT_WAIT` is given.
  pub fn recv(&mut self, flags: SocketFlags) -> Result<Msg, MqError> {
    self.base_mut().recv(flags)
  }

  /// True when the last received frame was part of a multi-part message
  /// with more frames to follow.
  pub fn rcvmore(&self) -> bool {
    self.base.as_ref().map_or(false, |b| b.rcvmore())
  }

  /// Sets a socket option from its raw byte encoding.
  pub fn set_option(&mut self, option: i32, value: &[u8]) -> Result<(), MqError> {
    self.base_mut().set_option(option, value)
  }

  /// Reads a socket option in its raw byte encoding.
  pub fn get_option(&mut self, option: i32) -> Result<Vec<u8>, MqError> {
    self.base_mut().get_option(option)
  }

  /// Convenience: subscribe a SUB socket to a topic prefix.
  pub fn subscribe(&mut self, topic: &[u8]) -> Result<(), MqError> {
    self.set_option(crate::socket::options::SUBSCRIBE, topic)
  }

  /// Convenience: drop a SUB socket's subscription.
  pub fn unsubscribe(&mut self, topic: &[u8]) -> Result<(), MqError> {
    self.set_option(crate::socket::options::UNSUBSCRIBE, topic)
  }

  /// The readiness bitmap (`POLL_IN` | `POLL_OUT`).
  pub fn events(&mut self) -> Result<u32, MqError> {
    self.base_mut().events()
  }

  /// The fd that signals socket activity; the Poller waits on this.
  pub(crate) fn mailbox_fd(&self) -> std::os::unix::io::RawFd {
    self.base.as_ref().map(|b| b.mailbox_fd()).unwrap_or(-1)
  }

  /// Closes the socket, handing it to the reaper for finalization.
  /// Closing twice is impossible by construction (consumes the handle);
  /// dropping after close is a no-op.
  pub fn close(mut self) {
    if let Some(base) = self.base.take() {
      SocketBase::close(base);
    }
  }
}

impl Drop for Socket {
  fn drop(&mut self) {
    if let Some(base) = self.base.take() {
      SocketBase::close(base);
    }
  }
}
