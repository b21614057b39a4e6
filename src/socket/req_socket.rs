use crate::error::MqError;
use crate::message::{Msg, MsgFlags};
use crate::socket::dealer_socket::DealerSocket;
use crate::socket::options;
use crate::socket::patterns::PipeSet;

/// REQ: strict send/receive alternation on top of DEALER routing. Every
/// request is prefixed with an empty delimiter frame (and, with
/// correlation enabled, a request-id frame before it); replies must carry
/// the matching prefix or they are dropped.
#[derive(Debug)]
pub(crate) struct ReqSocket {
  inner: DealerSocket,
  /// FSM: a request is out and the reply has not been consumed yet.
  receiving_reply: bool,
  /// The next outgoing frame starts a new request.
  message_begins: bool,
  /// The reply's prefix frames have been validated and stripped.
  reply_prefix_done: bool,
  /// Pipe the current request went to.
  reply_pipe: Option<usize>,
  request_id: u32,
  correlate: bool,
  relaxed: bool,
}

impl ReqSocket {
  pub fn new() -> Self {
    Self {
      inner: DealerSocket::new(),
      receiving_reply: false,
      message_begins: true,
      reply_prefix_done: false,
      reply_pipe: None,
      request_id: 0,
      correlate: false,
      relaxed: false,
    }
  }

  pub fn xattach_pipe(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.inner.xattach_pipe(set, pipe_id);
  }

  pub fn xread_activated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.inner.xread_activated(set, pipe_id);
  }

  pub fn xwrite_activated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.inner.xwrite_activated(set, pipe_id);
  }

  pub fn xpipe_terminated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    self.inner.xpipe_terminated(set, pipe_id);
    if self.reply_pipe == Some(pipe_id) {
      self.reply_pipe = None;
    }
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    if self.receiving_reply {
      if !self.relaxed {
        return Err((msg, MqError::Fsm));
      }
      // Relaxed mode: abandon the outstanding request and start over.
      self.receiving_reply = false;
      self.message_begins = true;
      self.reply_prefix_done = false;
    }

    if self.message_begins {
      if self.correlate {
        self.request_id = self.request_id.wrapping_add(1);
        let mut id_frame = Msg::from_vec(self.request_id.to_be_bytes().to_vec());
        id_frame.set_flags(MsgFlags::MORE);
        match self.inner.xsend_pipe(set, id_frame) {
          Ok(pipe) => self.reply_pipe = Some(pipe),
          Err((_, e)) => return Err((msg, e)),
        }
      }
      let mut bottom = Msg::new();
      bottom.set_flags(MsgFlags::MORE);
      match self.inner.xsend_pipe(set, bottom) {
        Ok(pipe) => {
          if !self.correlate {
            self.reply_pipe = Some(pipe);
          }
        }
        Err((_, e)) => return Err((msg, e)),
      }
      self.message_begins = false;
    }

    let more = msg.is_more();
    self.inner.xsend(set, msg)?;
    if !more {
      self.receiving_reply = true;
      self.message_begins = true;
      self.reply_prefix_done = false;
    }
    Ok(())
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    if !self.receiving_reply {
      return Err(MqError::Fsm);
    }
    loop {
      if !self.reply_prefix_done {
        let delimiter = if self.correlate {
          let id_frame = self.inner.xrecv(set)?;
          let matches = id_frame.is_more()
            && id_frame.data() == Some(self.request_id.to_be_bytes().as_slice());
          if !matches {
            tracing::debug!("REQ dropping reply with stale or missing request id");
            self.skip_message(set, id_frame)?;
            continue;
          }
          self.inner.xrecv(set)?
        } else {
          // Strict mode: only the peer the request went to may answer.
          let (delimiter, pipe) = self.inner.xrecv_pipe(set)?;
          if self.reply_pipe.is_some() && self.reply_pipe != Some(pipe) {
            tracing::debug!("REQ dropping reply from unexpected peer");
            self.skip_message(set, delimiter)?;
            continue;
          }
          delimiter
        };
        if !(delimiter.is_more() && delimiter.size() == 0) {
          tracing::debug!("REQ dropping reply without empty delimiter");
          self.skip_message(set, delimiter)?;
          continue;
        }
        self.reply_prefix_done = true;
      }
      let msg = self.inner.xrecv(set)?;
      if !msg.is_more() {
        self.receiving_reply = false;
        self.reply_prefix_done = false;
      }
      return Ok(msg);
    }
  }

  /// Consumes the rest of a bad reply so the queue realigns on a message
  /// boundary.
  fn skip_message(&mut self, set: &mut PipeSet, first: Msg) -> Result<(), MqError> {
    let mut more = first.is_more();
    while more {
      let msg = self.inner.xrecv(set)?;
      more = msg.is_more();
    }
    Ok(())
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    self.receiving_reply && self.inner.xhas_in(set)
  }

  pub fn xhas_out(&mut self, set: &mut PipeSet) -> bool {
    (!self.receiving_reply || self.relaxed) && self.inner.xhas_out(set)
  }

  pub fn xsetsockopt(&mut self, option: i32, value: &[u8]) -> Result<bool, MqError> {
    match option {
      options::REQ_CORRELATE => {
        self.correlate = options::parse_i32(option, value)? != 0;
        Ok(true)
      }
      options::REQ_RELAXED => {
        self.relaxed = options::parse_i32(option, value)? != 0;
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}
