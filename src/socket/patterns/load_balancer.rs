use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::PipeSet;

/// Round-robin ring over writable pipes, used by PUSH, DEALER and REQ.
///
/// Mirrors `FairQueue` on the outbound side: `pipes[..active]` are
/// believed writable, a multi-part message stays pinned to one pipe, and
/// a pipe that refuses a write is deactivated until the peer returns
/// credit with ActivateWrite.
#[derive(Debug, Default)]
pub(crate) struct LoadBalancer {
  pipes: Vec<usize>,
  active: usize,
  current: usize,
  /// A multi-part message is in flight on `pipes[current]`.
  more: bool,
  /// The pipe carrying the current message terminated; swallow the
  /// remaining frames.
  dropping: bool,
}

impl LoadBalancer {
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
      self.dropping = true;
    }
    if pos < self.active {
      self.active -= 1;
      self.pipes.swap(pos, self.active);
      if self.current == self.active && self.active > 0 {
        self.current = 0;
      }
    }
    if let Some(tail_pos) = self.pipes.iter().position(|&p| p == pipe_id) {
      self.pipes.swap_remove(tail_pos);
    }
    if self.active > 0 && self.current >= self.active {
      self.current = 0;
    }
  }

  /// Sends one frame, picking a pipe at message start and sticking to it
  /// until the final frame. Fails with `Again` when nothing is writable.
  pub fn send(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    self.send_pipe(set, msg).map(|_| ())
  }

  /// Like `send`, but reports which pipe carried the frame.
  pub fn send_pipe(&mut self, set: &mut PipeSet, mut msg: Msg) -> Result<usize, (Msg, MqError)> {
    if self.dropping {
      // The message is swallowed, which counts as delivery for the FSM.
      self.dropping = msg.is_more();
      self.more = false;
      drop(msg);
      return Ok(usize::MAX);
    }
    while self.active > 0 {
      let id = self.pipes[self.current];
      let more = msg.is_more();
      match set.write(id, msg) {
        Ok(()) => {
          self.more = more;
          if !more {
            set.flush(id);
            self.current = (self.current + 1) % self.active;
          }
          return Ok(id);
        }
        Err(returned) => {
          msg = returned;
          if self.more {
            // The chosen pipe died mid-message; drop the rest.
            self.dropping = more;
            self.more = false;
            drop(msg);
            return Ok(usize::MAX);
          }
          self.active -= 1;
          self.pipes.swap(self.current, self.active);
          if self.current == self.active && self.active > 0 {
            self.current = 0;
          }
        }
      }
    }
    Err((msg, MqError::Again))
  }

  pub fn has_out(&mut self, set: &mut PipeSet) -> bool {
    if self.more {
      return true;
    }
    while self.active > 0 {
      let id = self.pipes[self.current];
      if set.check_write(id) {
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
