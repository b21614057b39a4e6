use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::PipeSet;
use crate::socket::xpub_socket::XPubSocket;

/// PUB: XPUB routing with the subscription traffic consumed internally;
/// receiving on a PUB socket is not supported.
#[derive(Debug)]
pub(crate) struct PubSocket {
  inner: XPubSocket,
}

impl PubSocket {
  pub fn new() -> Self {
    Self {
      inner: XPubSocket::new(false),
    }
  }

  pub fn inner_mut(&mut self) -> &mut XPubSocket {
    &mut self.inner
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    self.inner.xsend(set, msg)
  }

  pub fn xrecv(&mut self, _set: &mut PipeSet) -> Result<Msg, MqError> {
    Err(MqError::Unsupported("PUB sockets cannot receive"))
  }
}
