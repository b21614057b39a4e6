use crate::error::MqError;
use crate::message::Msg;
use crate::socket::options;
use crate::socket::patterns::PipeSet;
use crate::socket::xpub_socket::subscription_msg;
use crate::socket::xsub_socket::XSubSocket;

/// SUB: filtered XSUB with subscriptions driven purely through the
/// Subscribe/Unsubscribe options; direct sends are not supported.
#[derive(Debug)]
pub(crate) struct SubSocket {
  inner: XSubSocket,
}

impl SubSocket {
  pub fn new() -> Self {
    Self {
      inner: XSubSocket::new(true),
    }
  }

  pub fn inner_mut(&mut self) -> &mut XSubSocket {
    &mut self.inner
  }

  pub fn xsend(&mut self, _set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    Err((msg, MqError::Unsupported("SUB sockets cannot send")))
  }

  pub fn xsetsockopt(&mut self, set: &mut PipeSet, option: i32, value: &[u8]) -> Result<bool, MqError> {
    match option {
      options::SUBSCRIBE => {
        let msg = subscription_msg(true, value);
        self
          .inner
          .xsend(set, msg)
          .map_err(|(_, e)| e)?;
        Ok(true)
      }
      options::UNSUBSCRIBE => {
        let msg = subscription_msg(false, value);
        self
          .inner
          .xsend(set, msg)
          .map_err(|(_, e)| e)?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  pub fn xhas_out(&mut self, _set: &mut PipeSet) -> bool {
    false
  }
}
