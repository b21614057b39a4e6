use crate::error::MqError;
use crate::message::Msg;
use crate::socket::options;
use crate::socket::patterns::{Distributor, Mtrie, PipeSet};
use std::collections::VecDeque;

/// Wire form of a subscription message: one byte (0 = unsubscribe,
/// 1 = subscribe) followed by the topic prefix.
pub(crate) fn subscription_msg(subscribe: bool, topic: &[u8]) -> Msg {
  let mut bytes = Vec::with_capacity(1 + topic.len());
  bytes.push(subscribe as u8);
  bytes.extend_from_slice(topic);
  Msg::from_vec(bytes)
}

/// XPUB: topic-routed distribution plus user-visible subscription
/// traffic. PUB reuses this with notifications disabled.
#[derive(Debug)]
pub(crate) struct XPubSocket {
  dist: Distributor,
  subscriptions: Mtrie,
  /// Subscription messages awaiting the user's recv (XPUB only).
  pending: VecDeque<Msg>,
  /// Deliver duplicate subscriptions too.
  verbose: bool,
  /// Don't touch the trie on peer subscriptions; the user drives it.
  manual: bool,
  /// Pipe whose subscription arrived last; target of manual updates.
  last_pipe: Option<usize>,
  welcome_msg: Option<Msg>,
  /// Whether subscription events are queued for the user at all.
  notifications: bool,
  /// An outgoing multi-part message is mid-flight.
  more_out: bool,
}

impl XPubSocket {
  pub fn new(notifications: bool) -> Self {
    Self {
      dist: Distributor::new(),
      subscriptions: Mtrie::new(),
      pending: VecDeque::new(),
      verbose: false,
      manual: false,
      last_pipe: None,
      welcome_msg: None,
      notifications,
      more_out: false,
    }
  }

  pub fn xattach_pipe(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.dist.attach(pipe_id);
    if let Some(welcome) = self.welcome_msg.clone() {
      if set.write(pipe_id, welcome).is_ok() {
        set.flush(pipe_id);
      }
    }
    // Subscriptions the peer queued before we attached are already in
    // the pipe and won't trigger an activation command; drain them now.
    self.xread_activated(set, pipe_id);
  }

  pub fn xread_activated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    // Inbound traffic on a publisher is subscription control only.
    while let Some(msg) = set.read(pipe_id) {
      self.process_subscription(msg, pipe_id);
    }
  }

  fn process_subscription(&mut self, msg: Msg, pipe_id: usize) {
    let data = msg.data().unwrap_or(&[]);
    let Some((&first, topic)) = data.split_first() else {
      tracing::debug!(pipe_id, "ignoring empty subscription frame");
      return;
    };
    if first > 1 {
      tracing::debug!(pipe_id, "ignoring malformed subscription frame");
      return;
    }
    let subscribe = first == 1;
    let unique = if self.manual {
      self.last_pipe = Some(pipe_id);
      false
    } else if subscribe {
      self.subscriptions.add(topic, pipe_id)
    } else {
      self.subscriptions.remove(topic, pipe_id)
    };
    if self.notifications && (unique || (subscribe && self.verbose) || self.manual) {
      self.pending.push_back(msg);
    }
  }

  pub fn xwrite_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.dist.activated(pipe_id);
  }

  pub fn xpipe_terminated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    let notifications = self.notifications && !self.manual;
    let pending = &mut self.pending;
    self.subscriptions.remove_pipe(pipe_id, |prefix| {
      // A vanished node is an implicit unsubscription.
      if notifications {
        pending.push_back(subscription_msg(false, prefix));
      }
    });
    self.dist.terminated(pipe_id);
    if self.last_pipe == Some(pipe_id) {
      self.last_pipe = None;
    }
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    let starting = !self.more_out;
    if starting && self.manual {
      // In manual mode the user applies subscription state explicitly,
      // targeting the pipe whose subscription was read last.
      let data = msg.data().unwrap_or(&[]);
      if let Some((&first, topic)) = data.split_first() {
        if first <= 1 {
          if let Some(pipe) = self.last_pipe {
            if first == 1 {
              self.subscriptions.add(topic, pipe);
            } else {
              self.subscriptions.remove(topic, pipe);
            }
          }
          return Ok(());
        }
      }
    }

    if starting {
      // The match phase runs once per message, on the first frame.
      let payload = msg.data().unwrap_or(&[]);
      let dist = &mut self.dist;
      self.subscriptions.match_with(payload, |pipe| dist.match_pipe(pipe));
    }
    self.more_out = msg.is_more();
    self.dist.send_to_matching(set, msg);
    Ok(())
  }

  pub fn xrecv(&mut self, _set: &mut PipeSet) -> Result<Msg, MqError> {
    self.pending.pop_front().ok_or(MqError::Again)
  }

  pub fn xhas_in(&mut self, _set: &mut PipeSet) -> bool {
    !self.pending.is_empty()
  }

  pub fn xhas_out(&mut self, _set: &mut PipeSet) -> bool {
    self.dist.has_out()
  }

  pub fn xsetsockopt(&mut self, option: i32, value: &[u8]) -> Result<bool, MqError> {
    match option {
      options::XPUB_VERBOSE => {
        self.verbose = options::parse_i32(option, value)? != 0;
        Ok(true)
      }
      options::XPUB_MANUAL => {
        self.manual = options::parse_i32(option, value)? != 0;
        Ok(true)
      }
      options::XPUB_WELCOME_MSG => {
        self.welcome_msg = if value.is_empty() {
          None
        } else {
          Some(Msg::from_vec(value.to_vec()))
        };
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  /// Re-sends nothing on hiccup: the subscriber re-issues its
  /// subscriptions, which flow back in through xread_activated.
  pub fn xhiccuped(&mut self, set: &mut PipeSet, pipe_id: usize) {
    let _ = (set, pipe_id);
  }
}
