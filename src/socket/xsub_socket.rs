use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::{Distributor, FairQueue, PipeSet, Trie};
use crate::socket::xpub_socket::subscription_msg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
  None,
  /// Remaining frames of a matched message are delivered as-is.
  Deliver,
  /// Remaining frames of a filtered-out message are swallowed.
  Skip,
}

/// XSUB: fair-queued delivery from all publishers; subscription messages
/// travel upstream as ordinary frames. SUB reuses this with filtering on
/// and direct sends disabled.
#[derive(Debug)]
pub(crate) struct XSubSocket {
  fq: FairQueue,
  dist: Distributor,
  subscriptions: Trie,
  /// Whether inbound messages are matched against the local trie (SUB)
  /// or passed through untouched (XSUB).
  filter: bool,
  in_flight: InFlight,
  /// First frame of a matched message buffered by `xhas_in`.
  has_message: Option<Msg>,
  /// An outgoing multi-part message is mid-flight.
  more_out: bool,
}

impl XSubSocket {
  pub fn new(filter: bool) -> Self {
    Self {
      fq: FairQueue::new(),
      dist: Distributor::new(),
      subscriptions: Trie::new(),
      filter,
      in_flight: InFlight::None,
      has_message: None,
      more_out: false,
    }
  }

  pub fn xattach_pipe(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.fq.attach(pipe_id);
    self.dist.attach(pipe_id);
    self.resend_subscriptions(set, pipe_id);
  }

  /// After a transport hiccup the fresh pipe has no subscription state;
  /// replay the whole set.
  pub fn xhiccuped(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.resend_subscriptions(set, pipe_id);
  }

  fn resend_subscriptions(&mut self, set: &mut PipeSet, pipe_id: usize) {
    let mut msgs = Vec::new();
    self.subscriptions.for_each(|prefix| {
      msgs.push(subscription_msg(true, prefix));
    });
    if msgs.is_empty() {
      return;
    }
    for msg in msgs {
      if set.write(pipe_id, msg).is_err() {
        tracing::debug!(pipe_id, "dropping subscription replay: pipe refused write");
        break;
      }
    }
    set.flush(pipe_id);
  }

  pub fn xread_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.activated(pipe_id);
  }

  pub fn xwrite_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.dist.activated(pipe_id);
  }

  pub fn xpipe_terminated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.terminated(pipe_id);
    self.dist.terminated(pipe_id);
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    let starting = !self.more_out;
    self.more_out = msg.is_more();
    if starting {
      if let Some((&first, topic)) = msg.data().unwrap_or(&[]).split_first() {
        if first == 1 {
          // Forward only subscriptions that are new to this socket.
          if self.subscriptions.add(topic) {
            self.dist.send_to_all(set, msg);
          }
          return Ok(());
        }
        if first == 0 {
          if self.subscriptions.remove(topic) {
            self.dist.send_to_all(set, msg);
          }
          return Ok(());
        }
      }
    }
    // Anything else is an upstream message; broadcast it.
    self.dist.send_to_all(set, msg);
    Ok(())
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    if let Some(msg) = self.has_message.take() {
      self.in_flight = if msg.is_more() {
        InFlight::Deliver
      } else {
        InFlight::None
      };
      return Ok(msg);
    }
    loop {
      let msg = self.fq.recv(set)?;
      match self.in_flight {
        InFlight::Deliver => {
          if !msg.is_more() {
            self.in_flight = InFlight::None;
          }
          return Ok(msg);
        }
        InFlight::Skip => {
          if !msg.is_more() {
            self.in_flight = InFlight::None;
          }
        }
        InFlight::None => {
          let matches = !self.filter || self.subscriptions.check(msg.data().unwrap_or(&[]));
          if matches {
            self.in_flight = if msg.is_more() {
              InFlight::Deliver
            } else {
              InFlight::None
            };
            return Ok(msg);
          }
          if msg.is_more() {
            self.in_flight = InFlight::Skip;
          }
        }
      }
    }
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    if self.in_flight == InFlight::Deliver || self.has_message.is_some() {
      return true;
    }
    if !self.filter {
      return self.fq.has_in(set);
    }
    // With filtering on, look ahead: drop non-matching messages until a
    // match is found, buffering its first frame for the next recv.
    loop {
      match self.fq.recv(set) {
        Err(_) => return false,
        Ok(msg) => match self.in_flight {
          InFlight::Deliver => {
            // Unreachable by the guard above, kept for completeness.
            self.has_message = Some(msg);
            return true;
          }
          InFlight::Skip => {
            if !msg.is_more() {
              self.in_flight = InFlight::None;
            }
          }
          InFlight::None => {
            if self.subscriptions.check(msg.data().unwrap_or(&[])) {
              self.has_message = Some(msg);
              return true;
            }
            if msg.is_more() {
              self.in_flight = InFlight::Skip;
            }
          }
        },
      }
    }
  }

  pub fn xhas_out(&mut self, _set: &mut PipeSet) -> bool {
    // Subscription traffic is never refused.
    true
  }
}
