use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::PipeSet;
use crate::socket::router_socket::RouterSocket;

/// REP: alternates receive and send. The routing envelope (identity
/// frames up to and including the empty delimiter) of each request is fed
/// straight back into the underlying ROUTER's outbound path, so the reply
/// returns to the requester without the application ever seeing the
/// envelope.
#[derive(Debug, Default)]
pub(crate) struct RepSocket {
  router: RouterSocket,
  sending_reply: bool,
  request_begins: bool,
}

impl RepSocket {
  pub fn new() -> Self {
    Self {
      router: RouterSocket::new(),
      sending_reply: false,
      request_begins: true,
    }
  }

  pub fn router_mut(&mut self) -> &mut RouterSocket {
    &mut self.router
  }

  pub fn xattach_pipe(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.router.xattach_pipe(set, pipe_id);
  }

  pub fn xread_activated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.router.xread_activated(set, pipe_id);
  }

  pub fn xpipe_terminated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.router.xpipe_terminated(set, pipe_id);
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    if !self.sending_reply {
      return Err((msg, MqError::Fsm));
    }
    let more = msg.is_more();
    self.router.xsend(set, msg)?;
    if !more {
      self.sending_reply = false;
    }
    Ok(())
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    if self.sending_reply {
      return Err(MqError::Fsm);
    }
    if self.request_begins {
      // Feed the envelope (identity frames and the empty delimiter) into
      // the router's outbound path to pre-address the reply.
      loop {
        let msg = self.router.xrecv(set)?;
        if !msg.is_more() {
          // Malformed request without a delimiter: drop it, abandon any
          // partially fed envelope, and try the next message.
          tracing::debug!("REP dropping request without envelope delimiter");
          self.router.abort_out(set);
          continue;
        }
        let bottom = msg.size() == 0;
        if let Err((dropped, _)) = self.router.xsend(set, msg) {
          drop(dropped);
        }
        if bottom {
          break;
        }
      }
      self.request_begins = false;
    }
    let msg = self.router.xrecv(set)?;
    if !msg.is_more() {
      self.sending_reply = true;
      self.request_begins = true;
    }
    Ok(msg)
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    if self.sending_reply {
      return false;
    }
    self.router.xhas_in(set)
  }

  pub fn xhas_out(&mut self, set: &mut PipeSet) -> bool {
    if !self.sending_reply {
      return false;
    }
    self.router.xhas_out(set)
  }
}
