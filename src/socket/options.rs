use crate::error::MqError;
use crate::message::Blob;
use std::time::Duration;

// Option ids kept consistent with libzmq where an equivalent exists.
pub const IDENTITY: i32 = 5;
pub const SUBSCRIBE: i32 = 6;
pub const UNSUBSCRIBE: i32 = 7;
pub const RATE: i32 = 8;
pub const RECOVERY_IVL: i32 = 9;
pub const SNDBUF: i32 = 11;
pub const RCVBUF: i32 = 12;
pub const EVENTS: i32 = 15;
pub const LINGER: i32 = 17;
pub const RECONNECT_IVL: i32 = 18;
pub const BACKLOG: i32 = 19;
pub const RECONNECT_IVL_MAX: i32 = 21;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const MULTICAST_HOPS: i32 = 25;
pub const RCVTIMEO: i32 = 27;
pub const SNDTIMEO: i32 = 28;
pub const LAST_ENDPOINT: i32 = 32;
pub const ROUTER_MANDATORY: i32 = 33;
pub const XPUB_VERBOSE: i32 = 40;
pub const REQ_CORRELATE: i32 = 52;
pub const REQ_RELAXED: i32 = 53;
pub const XPUB_MANUAL: i32 = 71;
pub const XPUB_WELCOME_MSG: i32 = 72;

/// `Events` option bit: a message can be received without blocking.
pub const POLL_IN: u32 = 0b01;
/// `Events` option bit: a message can be sent without blocking.
pub const POLL_OUT: u32 = 0b10;

/// Parsed and validated socket options. A snapshot of this struct travels
/// with inproc registrations and session launches, so peers observe the
/// values in force at bind/connect time.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  /// High water marks, in messages. 0 means unbounded.
  pub sndhwm: usize,
  pub rcvhwm: usize,
  /// None = -1 (infinite), Some(ZERO) = immediate, Some(>0) = timeout.
  pub sndtimeo: Option<Duration>,
  pub rcvtimeo: Option<Duration>,
  /// How long a closing socket keeps flushing queued messages.
  pub linger: Option<Duration>,
  pub reconnect_ivl: Duration,
  /// Cap for exponential reconnect backoff; ZERO disables backoff.
  pub reconnect_ivl_max: Duration,
  pub backlog: i32,
  pub identity: Option<Blob>,
  pub router_mandatory: bool,
  pub req_correlate: bool,
  pub req_relaxed: bool,
  pub xpub_verbose: bool,
  pub xpub_manual: bool,
  pub xpub_welcome_msg: Option<Blob>,
  /// Multicast transmission rate in kilobits per second.
  pub rate: u32,
  pub recovery_ivl: Duration,
  pub multicast_hops: u32,
  pub sndbuf: Option<usize>,
  pub rcvbuf: Option<usize>,
  pub tcp_nodelay: bool,
}

impl Default for SocketOptions {
  fn default() -> Self {
    Self {
      sndhwm: 256,
      rcvhwm: 256,
      sndtimeo: None,
      rcvtimeo: None,
      linger: None,
      reconnect_ivl: Duration::from_millis(100),
      reconnect_ivl_max: Duration::ZERO,
      backlog: 100,
      identity: None,
      router_mandatory: false,
      req_correlate: false,
      req_relaxed: false,
      xpub_verbose: false,
      xpub_manual: false,
      xpub_welcome_msg: None,
      rate: 100,
      recovery_ivl: Duration::from_secs(10),
      multicast_hops: 1,
      sndbuf: None,
      rcvbuf: None,
      tcp_nodelay: true,
    }
  }
}

impl SocketOptions {
  /// Applies a raw option value. Pattern-specific options (Subscribe,
  /// RouterMandatory applied live, ...) are routed by the socket before
  /// reaching here.
  pub fn set(&mut self, option: i32, value: &[u8]) -> Result<(), MqError> {
    match option {
      SNDHWM => self.sndhwm = parse_nonneg_i32(option, value)? as usize,
      RCVHWM => self.rcvhwm = parse_nonneg_i32(option, value)? as usize,
      SNDTIMEO => self.sndtimeo = parse_timeout(option, value)?,
      RCVTIMEO => self.rcvtimeo = parse_timeout(option, value)?,
      LINGER => self.linger = parse_timeout(option, value)?,
      RECONNECT_IVL => {
        self.reconnect_ivl = Duration::from_millis(parse_nonneg_i32(option, value)? as u64)
      }
      RECONNECT_IVL_MAX => {
        self.reconnect_ivl_max = Duration::from_millis(parse_nonneg_i32(option, value)? as u64)
      }
      BACKLOG => self.backlog = parse_nonneg_i32(option, value)?,
      IDENTITY => {
        if value.is_empty() || value.len() > 255 {
          return Err(MqError::InvalidOptionValue(option));
        }
        self.identity = Some(Blob::from(value));
      }
      ROUTER_MANDATORY => self.router_mandatory = parse_bool(option, value)?,
      REQ_CORRELATE => self.req_correlate = parse_bool(option, value)?,
      REQ_RELAXED => self.req_relaxed = parse_bool(option, value)?,
      XPUB_VERBOSE => self.xpub_verbose = parse_bool(option, value)?,
      XPUB_MANUAL => self.xpub_manual = parse_bool(option, value)?,
      XPUB_WELCOME_MSG => {
        self.xpub_welcome_msg = if value.is_empty() {
          None
        } else {
          Some(Blob::from(value))
        }
      }
      RATE => self.rate = parse_nonneg_i32(option, value)? as u32,
      RECOVERY_IVL => {
        self.recovery_ivl = Duration::from_millis(parse_nonneg_i32(option, value)? as u64)
      }
      MULTICAST_HOPS => self.multicast_hops = parse_nonneg_i32(option, value)? as u32,
      SNDBUF => self.sndbuf = Some(parse_nonneg_i32(option, value)? as usize),
      RCVBUF => self.rcvbuf = Some(parse_nonneg_i32(option, value)? as usize),
      _ => return Err(MqError::InvalidOption(option)),
    }
    Ok(())
  }

  /// Reads an option back as raw bytes. `Events` and `LastEndpoint` are
  /// handled by the socket, which owns the live state.
  pub fn get(&self, option: i32) -> Result<Vec<u8>, MqError> {
    let encode_i32 = |v: i32| v.to_ne_bytes().to_vec();
    let encode_timeout = |t: Option<Duration>| match t {
      None => encode_i32(-1),
      Some(d) => encode_i32(d.as_millis().min(i32::MAX as u128) as i32),
    };
    Ok(match option {
      SNDHWM => encode_i32(self.sndhwm as i32),
      RCVHWM => encode_i32(self.rcvhwm as i32),
      SNDTIMEO => encode_timeout(self.sndtimeo),
      RCVTIMEO => encode_timeout(self.rcvtimeo),
      LINGER => encode_timeout(self.linger),
      RECONNECT_IVL => encode_i32(self.reconnect_ivl.as_millis() as i32),
      RECONNECT_IVL_MAX => encode_i32(self.reconnect_ivl_max.as_millis() as i32),
      BACKLOG => encode_i32(self.backlog),
      IDENTITY => self.identity.as_ref().map(|b| b.to_vec()).unwrap_or_default(),
      ROUTER_MANDATORY => encode_i32(self.router_mandatory as i32),
      REQ_CORRELATE => encode_i32(self.req_correlate as i32),
      REQ_RELAXED => encode_i32(self.req_relaxed as i32),
      XPUB_VERBOSE => encode_i32(self.xpub_verbose as i32),
      XPUB_MANUAL => encode_i32(self.xpub_manual as i32),
      RATE => encode_i32(self.rate as i32),
      RECOVERY_IVL => encode_i32(self.recovery_ivl.as_millis() as i32),
      MULTICAST_HOPS => encode_i32(self.multicast_hops as i32),
      SNDBUF => encode_i32(self.sndbuf.unwrap_or(0) as i32),
      RCVBUF => encode_i32(self.rcvbuf.unwrap_or(0) as i32),
      _ => return Err(MqError::InvalidOption(option)),
    })
  }
}

pub(crate) fn parse_i32(option: i32, value: &[u8]) -> Result<i32, MqError> {
  let bytes: [u8; 4] = value
    .try_into()
    .map_err(|_| MqError::InvalidOptionValue(option))?;
  Ok(i32::from_ne_bytes(bytes))
}

fn parse_nonneg_i32(option: i32, value: &[u8]) -> Result<i32, MqError> {
  let v = parse_i32(option, value)?;
  if v < 0 {
    return Err(MqError::InvalidOptionValue(option));
  }
  Ok(v)
}

fn parse_bool(option: i32, value: &[u8]) -> Result<bool, MqError> {
  match parse_i32(option, value)? {
    0 => Ok(false),
    1 => Ok(true),
    _ => Err(MqError::InvalidOptionValue(option)),
  }
}

/// -1 maps to "infinite", anything else to a millisecond duration.
fn parse_timeout(option: i32, value: &[u8]) -> Result<Option<Duration>, MqError> {
  let v = parse_i32(option, value)?;
  if v < -1 {
    return Err(MqError::InvalidOptionValue(option));
  }
  Ok(if v == -1 {
    None
  } else {
    Some(Duration::from_millis(v as u64))
  })
}

/// Combines the writer's send watermark with the reader's receive
/// watermark for one pipe direction: the tighter bound wins, and 0 on one
/// side defers to the other (0 on both means unbounded).
pub(crate) fn combined_hwm(send_side: usize, recv_side: usize) -> usize {
  match (send_side, recv_side) {
    (0, r) => r,
    (s, 0) => s,
    (s, r) => s.min(r),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_and_get_roundtrip() {
    let mut opts = SocketOptions::default();
    opts.set(SNDHWM, &4i32.to_ne_bytes()).unwrap();
    assert_eq!(opts.sndhwm, 4);
    assert_eq!(opts.get(SNDHWM).unwrap(), 4i32.to_ne_bytes().to_vec());

    opts.set(RCVTIMEO, &(-1i32).to_ne_bytes()).unwrap();
    assert_eq!(opts.rcvtimeo, None);
    opts.set(RCVTIMEO, &250i32.to_ne_bytes()).unwrap();
    assert_eq!(opts.rcvtimeo, Some(Duration::from_millis(250)));
  }

  #[test]
  fn rejects_bad_values() {
    let mut opts = SocketOptions::default();
    assert!(matches!(
      opts.set(SNDHWM, &(-2i32).to_ne_bytes()),
      Err(MqError::InvalidOptionValue(_))
    ));
    assert!(matches!(opts.set(9999, &[0; 4]), Err(MqError::InvalidOption(_))));
    assert!(matches!(
      opts.set(IDENTITY, &[]),
      Err(MqError::InvalidOptionValue(_))
    ));
  }

  #[test]
  fn hwm_combination_takes_tighter_bound() {
    assert_eq!(combined_hwm(4, 256), 4);
    assert_eq!(combined_hwm(0, 6), 6);
    assert_eq!(combined_hwm(4, 0), 4);
    assert_eq!(combined_hwm(0, 0), 0);
  }
}
