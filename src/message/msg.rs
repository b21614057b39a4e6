use crate::message::flags::MsgFlags;
use bytes::Bytes;
use std::fmt;

/// A single message part (frame).
///
/// Small payloads and large payloads are both carried by `Bytes`, which is
/// reference counted; moving a `Msg` into a pipe transfers ownership and
/// cloning (for multicast distribution) is cheap.
#[derive(Clone, Default)]
pub struct Msg {
  data: Option<Bytes>,
  flags: MsgFlags,
}

impl Msg {
  /// Creates an empty message with no data.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a message from a `Vec<u8>`, taking ownership.
  pub fn from_vec(data: Vec<u8>) -> Self {
    Self {
      data: Some(Bytes::from(data)),
      ..Default::default()
    }
  }

  /// Creates a message from `bytes::Bytes`.
  pub fn from_bytes(data: Bytes) -> Self {
    Self {
      data: Some(data),
      ..Default::default()
    }
  }

  /// Creates a message from a static byte slice (zero-copy).
  pub fn from_static(data: &'static [u8]) -> Self {
    Self {
      data: Some(Bytes::from_static(data)),
      ..Default::default()
    }
  }

  /// Creates the end-of-stream sentinel written into a pipe by the
  /// termination handshake.
  pub(crate) fn delimiter() -> Self {
    Self {
      data: None,
      flags: MsgFlags::DELIMITER,
    }
  }

  /// Returns a reference to the message payload bytes, if any.
  pub fn data(&self) -> Option<&[u8]> {
    self.data.as_deref()
  }

  /// Returns the internal `Bytes` object if data is present.
  pub fn data_bytes(&self) -> Option<Bytes> {
    self.data.clone()
  }

  /// Returns the size of the message payload in bytes.
  pub fn size(&self) -> usize {
    self.data.as_ref().map_or(0, |d| d.len())
  }

  /// Returns the flags associated with the message.
  pub fn flags(&self) -> MsgFlags {
    self.flags
  }

  /// Sets the flags for the message (e.g. `MsgFlags::MORE`).
  pub fn set_flags(&mut self, flags: MsgFlags) {
    self.flags = flags;
  }

  /// Adds `flags` to the currently set flags.
  pub fn insert_flags(&mut self, flags: MsgFlags) {
    self.flags |= flags;
  }

  /// Removes `flags` from the currently set flags.
  pub fn remove_flags(&mut self, flags: MsgFlags) {
    self.flags &= !flags;
  }

  // --- Flag helpers ---

  /// Checks if the `MORE` flag is set.
  pub fn is_more(&self) -> bool {
    self.flags.contains(MsgFlags::MORE)
  }

  /// Checks if the `COMMAND` flag is set.
  pub fn is_command(&self) -> bool {
    self.flags.contains(MsgFlags::COMMAND)
  }

  pub(crate) fn is_delimiter(&self) -> bool {
    self.flags.contains(MsgFlags::DELIMITER)
  }

  pub(crate) fn is_identity(&self) -> bool {
    self.flags.contains(MsgFlags::IDENTITY)
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("size", &self.size())
      .field("flags", &self.flags)
      .finish()
  }
}

impl From<Vec<u8>> for Msg {
  fn from(v: Vec<u8>) -> Self {
    Msg::from_vec(v)
  }
}

impl From<&'static [u8]> for Msg {
  fn from(d: &'static [u8]) -> Self {
    Msg::from_static(d)
  }
}
