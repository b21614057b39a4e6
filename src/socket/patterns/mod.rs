//! Building blocks shared by the per-type socket patterns: round-robin
//! rings for fair queueing and load balancing, the multicast distributor,
//! and the subscription tries.

mod distributor;
mod fair_queue;
mod load_balancer;
mod trie;

pub(crate) use distributor::Distributor;
pub(crate) use fair_queue::FairQueue;
pub(crate) use load_balancer::LoadBalancer;
pub(crate) use trie::{Mtrie, Trie};

use crate::message::Msg;
use crate::runtime::pipe::Pipe;
use std::collections::HashMap;

/// The pipes attached to a socket, keyed by pipe id. Pattern state refers
/// to pipes by id only; all reads and writes go through this set.
#[derive(Debug, Default)]
pub(crate) struct PipeSet {
  pipes: HashMap<usize, Pipe>,
}

impl PipeSet {
  pub fn insert(&mut self, pipe: Pipe) {
    self.pipes.insert(pipe.id(), pipe);
  }

  pub fn remove(&mut self, id: usize) -> Option<Pipe> {
    self.pipes.remove(&id)
  }

  pub fn get_mut(&mut self, id: usize) -> Option<&mut Pipe> {
    self.pipes.get_mut(&id)
  }

  pub fn get(&self, id: usize) -> Option<&Pipe> {
    self.pipes.get(&id)
  }

  pub fn is_empty(&self) -> bool {
    self.pipes.is_empty()
  }

  pub fn len(&self) -> usize {
    self.pipes.len()
  }

  pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
    self.pipes.keys().copied()
  }

  pub fn check_read(&mut self, id: usize) -> bool {
    self.pipes.get_mut(&id).map_or(false, |p| p.check_read())
  }

  pub fn read(&mut self, id: usize) -> Option<Msg> {
    self.pipes.get_mut(&id).and_then(|p| p.read())
  }

  pub fn check_write(&mut self, id: usize) -> bool {
    self.pipes.get_mut(&id).map_or(false, |p| p.check_write())
  }

  /// Writes into a pipe, handing the message back on refusal.
  pub fn write(&mut self, id: usize, msg: Msg) -> Result<(), Msg> {
    match self.pipes.get_mut(&id) {
      Some(p) => p.write(msg),
      None => Err(msg),
    }
  }

  pub fn flush(&mut self, id: usize) {
    if let Some(p) = self.pipes.get_mut(&id) {
      p.flush();
    }
  }

  pub fn rollback(&mut self, id: usize) {
    if let Some(p) = self.pipes.get_mut(&id) {
      p.rollback();
    }
  }

  pub fn terminate(&mut self, id: usize, delay: bool) {
    if let Some(p) = self.pipes.get_mut(&id) {
      p.terminate(delay);
    }
  }
}
