use crate::error::MqError;
use crate::message::Msg;
use crate::socket::patterns::PipeSet;

/// PAIR: an exclusive one-to-one conduit. At most one pipe may be
/// attached; later arrivals are terminated on sight.
#[derive(Debug, Default)]
pub(crate) struct PairSocket {
  pipe: Option<usize>,
}

impl PairSocket {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn xattach_pipe(&mut self, set: &mut PipeSet, pipe_id: usize) {
    if self.pipe.is_some() {
      tracing::debug!(pipe_id, "PAIR already connected; rejecting extra pipe");
      set.terminate(pipe_id, false);
      return;
    }
    self.pipe = Some(pipe_id);
  }

  pub fn xpipe_terminated(&mut self, _set: &mut PipeSet, pipe_id: usize) {
    if self.pipe == Some(pipe_id) {
      self.pipe = None;
    }
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    let Some(pipe) = self.pipe else {
      return Err((msg, MqError::Again));
    };
    let more = msg.is_more();
    match set.write(pipe, msg) {
      Ok(()) => {
        if !more {
          set.flush(pipe);
        }
        Ok(())
      }
      Err(msg) => Err((msg, MqError::Again)),
    }
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    self
      .pipe
      .and_then(|pipe| set.read(pipe))
      .ok_or(MqError::Again)
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    self.pipe.map_or(false, |pipe| set.check_read(pipe))
  }

  pub fn xhas_out(&mut self, set: &mut PipeSet) -> bool {
    self.pipe.map_or(false, |pipe| set.check_write(pipe))
  }
}
