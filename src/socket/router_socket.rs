use crate::error::MqError;
use crate::message::{Blob, Msg, MsgFlags};
use crate::socket::options;
use crate::socket::patterns::{FairQueue, PipeSet};
use rand::Rng;
use std::collections::HashMap;

/// ROUTER: prepends the source pipe's identity on receive; routes on send
/// by consuming a leading identity frame. Unroutable messages are dropped
/// unless mandatory mode is on, in which case the send fails with
/// `HostUnreachable`.
#[derive(Debug, Default)]
pub(crate) struct RouterSocket {
  fq: FairQueue,
  /// identity -> pipe for outbound routing.
  out_map: HashMap<Blob, usize>,
  /// pipe -> identity for inbound envelope synthesis.
  identities: HashMap<usize, Blob>,
  /// First real frame held back while the synthesized identity frame is
  /// delivered to the caller.
  prefetched: Option<Msg>,
  /// An inbound message is mid-delivery.
  in_progress: bool,
  current_out: Option<usize>,
  /// Swallow the remaining frames of an unroutable message.
  dropping_out: bool,
  mandatory: bool,
}

impl RouterSocket {
  pub fn new() -> Self {
    Self::default()
  }

  fn generate_identity(&self) -> Blob {
    // Anonymous peers get a 5-byte identity: a zero byte (reserved
    // namespace) followed by a random u32.
    let mut rng = rand::thread_rng();
    loop {
      let mut bytes = vec![0u8];
      bytes.extend_from_slice(&rng.gen::<u32>().to_be_bytes());
      let blob = Blob::from(bytes);
      if !self.out_map.contains_key(&blob) {
        return blob;
      }
    }
  }

  pub fn xattach_pipe(&mut self, set: &mut PipeSet, pipe_id: usize) {
    let identity = match set.get(pipe_id).and_then(|p| p.identity().cloned()) {
      Some(identity) => {
        if self.out_map.contains_key(&identity) {
          // Identities must be unique within a router; drop the newcomer.
          tracing::debug!(pipe_id, "duplicate peer identity; closing new pipe");
          set.terminate(pipe_id, false);
          return;
        }
        identity
      }
      None => self.generate_identity(),
    };
    self.out_map.insert(identity.clone(), pipe_id);
    self.identities.insert(pipe_id, identity);
    self.fq.attach(pipe_id);
  }

  pub fn xread_activated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.activated(pipe_id);
  }

  pub fn xpipe_terminated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    self.fq.terminated(pipe_id);
    if let Some(identity) = self.identities.remove(&pipe_id) {
      self.out_map.remove(&identity);
    }
    if self.current_out == Some(pipe_id) {
      self.current_out = None;
    }
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    let more = msg.is_more();

    if self.dropping_out {
      if !more {
        self.dropping_out = false;
      }
      return Ok(());
    }

    if self.current_out.is_none() {
      // The first frame addresses the destination and is consumed here.
      if !more {
        // An address with no body cannot be routed anywhere useful.
        return Ok(());
      }
      let identity = Blob::from(msg.data().unwrap_or(&[]));
      match self.out_map.get(&identity).copied() {
        Some(pipe) => {
          if !set.check_write(pipe) {
            if self.mandatory {
              return Err((msg, MqError::Again));
            }
            self.dropping_out = true;
          } else {
            self.current_out = Some(pipe);
          }
        }
        None => {
          if self.mandatory {
            return Err((msg, MqError::HostUnreachable));
          }
          self.dropping_out = true;
        }
      }
      return Ok(());
    }

    let Some(pipe) = self.current_out else {
      return Ok(());
    };
    match set.write(pipe, msg) {
      Ok(()) => {
        if !more {
          set.flush(pipe);
          self.current_out = None;
        }
      }
      Err(dropped) => {
        // The pipe went away mid-message; swallow the rest.
        drop(dropped);
        self.current_out = None;
        self.dropping_out = more;
      }
    }
    Ok(())
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    if let Some(msg) = self.prefetched.take() {
      if !msg.is_more() {
        self.in_progress = false;
      }
      return Ok(msg);
    }
    let (msg, pipe) = self.fq.recv_pipe(set)?;
    if !self.in_progress {
      self.in_progress = true;
      let identity = self.identities.get(&pipe).cloned().unwrap_or_default();
      let mut id_msg = Msg::from_vec(identity.to_vec());
      id_msg.set_flags(MsgFlags::MORE);
      self.prefetched = Some(msg);
      return Ok(id_msg);
    }
    if !msg.is_more() {
      self.in_progress = false;
    }
    Ok(msg)
  }

  /// Abandons a partially addressed outbound message, rolling back any
  /// frames already written. Used by REP when a request is malformed.
  pub fn abort_out(&mut self, set: &mut PipeSet) {
    if let Some(pipe) = self.current_out.take() {
      set.rollback(pipe);
    }
    self.dropping_out = false;
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    self.prefetched.is_some() || self.fq.has_in(set)
  }

  pub fn xhas_out(&mut self, _set: &mut PipeSet) -> bool {
    // Whether a send succeeds depends on the pipe the address resolves
    // to, so the socket itself always reports writable.
    true
  }

  pub fn xsetsockopt(&mut self, option: i32, value: &[u8]) -> Result<bool, MqError> {
    if option == options::ROUTER_MANDATORY {
      self.mandatory = options::parse_i32(option, value)? != 0;
      return Ok(true);
    }
    Ok(false)
  }
}
