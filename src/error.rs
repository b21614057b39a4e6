use std::io;
use thiserror::Error;

/// Errors surfaced by the socket-level API.
///
/// Transport-level faults are never reported through this type; engines
/// detach and the session retries, governed by the reconnect interval.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MqError {
  /// A non-blocking operation found no progress possible; safe to retry.
  #[error("Operation would block")]
  Again,

  /// The context is shutting down; the operation will never succeed again
  /// on this handle.
  #[error("Context is terminating")]
  Terminating,

  /// ROUTER in mandatory mode could not route the message.
  #[error("Peer is unreachable or not connected")]
  HostUnreachable,

  /// The pattern's finite state machine disallows the operation now
  /// (e.g. REQ sending twice in a row).
  #[error("Operation cannot be performed in the current socket state")]
  Fsm,

  /// The operation is not supported by this socket type (e.g. recv on PUB).
  #[error("Operation not supported by socket type: {0}")]
  Unsupported(&'static str),

  // --- Bind / connect ---
  #[error("Address already in use: {0}")]
  AddrInUse(String),
  #[error("Endpoint not found: {0}")]
  EndpointNotFound(String),
  #[error("Invalid endpoint: {0}")]
  AddrInvalid(String),
  #[error("Transport protocol not supported: {0}")]
  ProtocolNotSupported(String),
  #[error("Connection closed by peer or transport")]
  ConnectionClosed,

  // --- Resource limits ---
  #[error("Too many open sockets")]
  TooManySockets,

  // --- Options ---
  #[error("Invalid socket option id: {0}")]
  InvalidOption(i32),
  #[error("Invalid value for socket option id {0}")]
  InvalidOptionValue(i32),

  // --- I/O & internal ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  /// An internal invariant was violated or a poll call failed.
  #[error("Internal fault: {0}")]
  Fault(String),
}

impl MqError {
  /// Maps common `io::Error` kinds onto endpoint-aware error variants.
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => MqError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::AddrNotAvailable => MqError::AddrInvalid(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => MqError::EndpointNotFound(endpoint.to_string()),
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => MqError::ConnectionClosed,
      io::ErrorKind::WouldBlock => MqError::Again,
      _ => MqError::Io(e),
    }
  }
}
