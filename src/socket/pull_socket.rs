use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::{FairQueue, PipeSet};

/// PULL: fair-queues incoming messages from all peers.
#[derive(Debug, Default)]
pub(crate) struct PullSocket {
  fq: FairQueue,
}

impl PullSocket {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn xattach_pipe(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.attach(pipe_id);
  }

  pub fn xread_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.activated(pipe_id);
  }

  pub fn xpipe_terminated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.terminated(pipe_id);
  }

  pub fn xsend(&mut self, _set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    Err((msg, MqError::Unsupported("PULL sockets cannot send")))
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    self.fq.recv(set)
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    self.fq.has_in(set)
  }
}
