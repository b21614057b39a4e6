use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::{LoadBalancer, PipeSet};

/// PUSH: load-balances outgoing messages across writable peers.
#[derive(Debug, Default)]
pub(crate) struct PushSocket {
  lb: LoadBalancer,
}

impl PushSocket {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn xattach_pipe(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.lb.attach(pipe_id);
  }

  pub fn xwrite_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.lb.activated(pipe_id);
  }

  pub fn xpipe_terminated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.lb.terminated(pipe_id);
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    self.lb.send(set, msg)
  }

  pub fn xrecv(&mut self, _set: &mut PipeSet) -> Result<Msg, MqError> {
    Err(MqError::Unsupported("PUSH sockets cannot receive"))
  }

  pub fn xhas_out(&mut self, set: &mut PipeSet) -> bool {
    self.lb.has_out(set)
  }
}
