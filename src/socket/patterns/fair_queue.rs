use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::PipeSet;

/// Round-robin ring over readable pipes, used by every pattern that
/// receives from more than one peer.
///
/// `pipes[..active]` are the pipes believed readable; the tail holds
/// deactivated pipes awaiting an ActivateRead. While a multi-part message
/// is in flight the ring stays pinned to the current pipe so frames are
/// never interleaved.
#[derive(Debug, Default)]
pub(crate) struct FairQueue {
  pipes: Vec<usize>,
  active: usize,
  current: usize,
  more: bool,
}

impl FairQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn attach(&mut self, pipe_id: usize) {
    self.pipes.push(pipe_id);
    let last = self.pipes.len() - 1;
    self.pipes.swap(last, self.active);
    self.active += 1;
  }

  pub fn activated(&mut self, pipe_id: usize) {
    if let Some(pos) = self.pipes.iter().position(|&p| p == pipe_id) {
      if pos >= self.active {
        self.pipes.swap(pos, self.active);
        self.active += 1;
      }
    }
  }

  pub fn terminated(&mut self, pipe_id: usize) {
    let Some(pos) = self.pipes.iter().position(|&p| p == pipe_id) else {
      return;
    };
    if pos == self.current && self.more {
      // The pinned pipe died mid-message; the rest of the message is
      // gone, so unpin rather than stitching frames from another peer.
      self.more = false;
    }
    if pos < self.active {
      self.active -= 1;
      self.pipes.swap(pos, self.active);
      if self.current == self.active && self.active > 0 {
        self.current = 0;
      }
    }
    // The terminated pipe now sits in the inactive tail; drop it.
    if let Some(tail_pos) = self.pipes.iter().position(|&p| p == pipe_id) {
      self.pipes.swap_remove(tail_pos);
    }
    if self.active > 0 && self.current >= self.active {
      self.current = 0;
    }
  }

  /// Pops the next frame, rotating to the next pipe at message
  /// boundaries. Fails with `Again` when no active pipe has data.
  pub fn recv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    self.recv_pipe(set).map(|(msg, _)| msg)
  }

  /// Like `recv`, but also reports which pipe the frame came from.
  pub fn recv_pipe(&mut self, set: &mut PipeSet) -> Result<(Msg, usize), MqError> {
    while self.active > 0 {
      let id = self.pipes[self.current];
      match set.read(id) {
        Some(msg) => {
          self.more = msg.is_more();
          if !self.more {
            self.current = (self.current + 1) % self.active;
          }
          return Ok((msg, id));
        }
        None => {
          // Complete messages are published atomically, so a dry pipe
          // can only happen at a message boundary.
          debug_assert!(!self.more);
          self.active -= 1;
          self.pipes.swap(self.current, self.active);
          if self.current == self.active && self.active > 0 {
            self.current = 0;
          }
        }
      }
    }
    Err(MqError::Again)
  }

  pub fn has_in(&mut self, set: &mut PipeSet) -> bool {
    if self.more {
      return true;
    }
    while self.active > 0 {
      let id = self.pipes[self.current];
      if set.check_read(id) {
        return true;
      }
      self.active -= 1;
      self.pipes.swap(self.current, self.active);
      if self.current == self.active && self.active > 0 {
        self.current = 0;
      }
    }
    false
  }
}
