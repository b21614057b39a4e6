use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::{FairQueue, LoadBalancer, PipeSet};

/// DEALER: round-robin on send, fair-queue on receive, no added frames.
#[derive(Debug, Default)]
pub(crate) struct DealerSocket {
  lb: LoadBalancer,
  fq: FairQueue,
}

impl DealerSocket {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn xattach_pipe(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.lb.attach(pipe_id);
    self.fq.attach(pipe_id);
  }

  pub fn xread_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.activated(pipe_id);
  }

  pub fn xwrite_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.lb.activated(pipe_id);
  }

  pub fn xpipe_terminated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.lb.terminated(pipe_id);
    self.fq.terminated(pipe_id);
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    self.lb.send(set, msg)
  }

  /// Like `xsend`, reporting the pipe the frame went to (used by REQ to
  /// pin the reply pipe).
  pub fn xsend_pipe(&mut self, set: &mut PipeSet, msg: Msg) -> Result<usize, (Msg, MqError)> {
    self.lb.send_pipe(set, msg)
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    self.fq.recv(set)
  }

  pub fn xrecv_pipe(&mut self, set: &mut PipeSet) -> Result<(Msg, usize), MqError> {
    self.fq.recv_pipe(set)
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    self.fq.has_in(set)
  }

  pub fn xhas_out(&mut self, set: &mut PipeSet) -> bool {
    self.lb.has_out(set)
  }
}
