use bitflags::bitflags;

bitflags! {
  /// Flags associated with a `Msg` indicating its role or attributes.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct MsgFlags: u8 {
    /// More message parts follow this one.
    const MORE = 0b0000_0001;
    /// Internal protocol command frame (never delivered to the user).
    const COMMAND = 0b0000_0010;
    /// Routing identity frame exchanged at connection start.
    const IDENTITY = 0b0000_0100;
    /// Credential frame attached by a security mechanism.
    const CREDENTIAL = 0b0000_1000;
    /// End-of-stream sentinel written into a pipe during termination.
    const DELIMITER = 0b0001_0000;
  }
}

bitflags! {
  /// Flags accepted by `Socket::send` / `Socket::recv`.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct SocketFlags: u8 {
    /// Fail with `MqError::Again` instead of blocking.
    const DONT_WAIT = 0b01;
    /// The frame being sent is part of a multi-part message.
    const SEND_MORE = 0b10;
  }
}
