use crate::message::Msg;
use crate::socket::patterns::PipeSet;

/// Multicast set used by PUB/XPUB: distributes each message to the pipes
/// marked by the subscription match, dropping it for pipes that hit their
/// watermark (a publisher never blocks).
///
/// The pipe list is partitioned as `[0..matching)` marked for the current
/// message, `[matching..active)` unmarked but writable, `[active..eligible)`
/// writable once the in-flight multi-part message completes, and
/// `[eligible..)` blocked on the watermark.
#[derive(Debug, Default)]
pub(crate) struct Distributor {
  pipes: Vec<usize>,
  matching: usize,
  active: usize,
  eligible: usize,
  /// A multi-part message is partially distributed.
  more: bool,
}

impl Distributor {
  pub fn new() -> Self {
    Self::default()
  }

  fn position(&self, pipe_id: usize) -> Option<usize> {
    self.pipes.iter().position(|&p| p == pipe_id)
  }

  fn swap(&mut self, a: usize, b: usize) {
    self.pipes.swap(a, b);
  }

  pub fn attach(&mut self, pipe_id: usize) {
    self.pipes.push(pipe_id);
    let last = self.pipes.len() - 1;
    self.swap(last, self.eligible);
    self.eligible += 1;
    if !self.more {
      let pos = self.eligible - 1;
      self.swap(pos, self.active);
      self.active += 1;
    }
  }

  /// Marks a pipe to receive the message being distributed.
  pub fn match_pipe(&mut self, pipe_id: usize) {
    let Some(pos) = self.position(pipe_id) else {
      return;
    };
    if pos < self.matching || pos >= self.eligible {
      return;
    }
    self.swap(pos, self.matching);
    self.matching += 1;
  }

  /// Clears the per-message marks.
  pub fn unmatch(&mut self) {
    self.matching = 0;
  }

  pub fn activated(&mut self, pipe_id: usize) {
    let Some(pos) = self.position(pipe_id) else {
      return;
    };
    if pos < self.eligible {
      return;
    }
    self.swap(pos, self.eligible);
    self.eligible += 1;
    if !self.more {
      let pos = self.eligible - 1;
      self.swap(pos, self.active);
      self.active += 1;
    }
  }

  pub fn terminated(&mut self, pipe_id: usize) {
    let Some(mut pos) = self.position(pipe_id) else {
      return;
    };
    if pos < self.matching {
      self.swap(pos, self.matching - 1);
      self.matching -= 1;
      pos = self.matching;
    }
    if pos < self.active {
      self.swap(pos, self.active - 1);
      self.active -= 1;
      pos = self.active;
    }
    if pos < self.eligible {
      self.swap(pos, self.eligible - 1);
      self.eligible -= 1;
      pos = self.eligible;
    }
    self.pipes.swap_remove(pos);
  }

  /// Sends a frame to every marked pipe. After the final frame all
  /// eligible pipes become active again and the marks reset.
  pub fn send_to_matching(&mut self, set: &mut PipeSet, msg: Msg) {
    let msg_more = msg.is_more();
    self.distribute(set, msg);
    if !msg_more {
      self.active = self.eligible;
      self.matching = 0;
    }
    self.more = msg_more;
  }

  /// Sends a frame to every active pipe (used for subscription
  /// broadcasts going upstream).
  pub fn send_to_all(&mut self, set: &mut PipeSet, msg: Msg) {
    self.matching = self.active;
    self.send_to_matching(set, msg);
  }

  fn distribute(&mut self, set: &mut PipeSet, msg: Msg) {
    if self.matching == 0 {
      return;
    }
    if self.matching == 1 {
      self.write(set, 0, msg);
      return;
    }
    let mut i = 0;
    while i < self.matching {
      if self.write(set, i, msg.clone()) {
        i += 1;
      }
    }
  }

  /// Writes to the pipe at `pos` in the marked region. On refusal the
  /// partially written message is rolled back and the pipe drops out of
  /// the marked and active regions until it is re-activated.
  fn write(&mut self, set: &mut PipeSet, pos: usize, msg: Msg) -> bool {
    let id = self.pipes[pos];
    let msg_more = msg.is_more();
    match set.write(id, msg) {
      Ok(()) => {
        if !msg_more {
          set.flush(id);
        }
        true
      }
      Err(dropped) => {
        drop(dropped);
        set.rollback(id);
        // Demote out of matching, active and eligible; the pipe rejoins
        // via activated() once the peer returns credit.
        self.swap(pos, self.matching - 1);
        self.matching -= 1;
        self.swap(self.matching, self.active - 1);
        self.active -= 1;
        self.swap(self.active, self.eligible - 1);
        self.eligible -= 1;
        false
      }
    }
  }

  /// A publisher can always accept a message; pipes over their watermark
  /// simply miss it.
  pub fn has_out(&self) -> bool {
    true
  }
}
