use crate::error::MqError;
use crate::message::Blob;
use bytes::{Buf, BufMut, BytesMut};

/// Greeting layout: 6 signature bytes, a 2-byte identity length, 2
/// reserved bytes, then the identity itself.
pub(crate) const GREETING_HEADER_SIZE: usize = 10;

const SIGNATURE: [u8; 6] = [0xFF, b'C', b'M', b'Q', 0x01, 0x7F];

/// The connection preamble: protocol signature plus the local routing
/// identity (possibly empty).
#[derive(Debug, Clone, Default)]
pub(crate) struct Greeting {
  pub identity: Blob,
}

impl Greeting {
  pub fn new(identity: Option<Blob>) -> Self {
    Self {
      identity: identity.unwrap_or_default(),
    }
  }

  pub fn encode(&self, dst: &mut BytesMut) {
    dst.reserve(GREETING_HEADER_SIZE + self.identity.size());
    dst.put_slice(&SIGNATURE);
    dst.put_u16(self.identity.size() as u16);
    dst.put_slice(&[0u8; 2]);
    dst.put_slice(self.identity.as_ref());
  }
}

/// Incremental greeting parser; `decode` returns `Ok(None)` until the
/// whole preamble has arrived.
#[derive(Debug, Default)]
pub(crate) struct GreetingDecoder {
  identity_len: Option<usize>,
}

impl GreetingDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Greeting>, MqError> {
    let identity_len = match self.identity_len {
      Some(len) => len,
      None => {
        if src.len() < GREETING_HEADER_SIZE {
          return Ok(None);
        }
        if src[..SIGNATURE.len()] != SIGNATURE {
          return Err(MqError::Fault("bad greeting signature".into()));
        }
        let len = u16::from_be_bytes([src[6], src[7]]) as usize;
        src.advance(GREETING_HEADER_SIZE);
        self.identity_len = Some(len);
        len
      }
    };
    if src.len() < identity_len {
      return Ok(None);
    }
    let identity = Blob::from_bytes(src.split_to(identity_len).freeze());
    Ok(Some(Greeting { identity }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip() {
    let mut buf = BytesMut::new();
    Greeting::new(Some(Blob::from_static(b"peer-1"))).encode(&mut buf);
    let mut dec = GreetingDecoder::new();
    let out = dec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(out.identity.as_ref(), b"peer-1");
    assert!(buf.is_empty());
  }

  #[test]
  fn handles_partial_input() {
    let mut full = BytesMut::new();
    Greeting::new(Some(Blob::from_static(b"xy"))).encode(&mut full);
    let bytes: Vec<u8> = full.to_vec();
    let mut dec = GreetingDecoder::new();
    let mut buf = BytesMut::new();
    for &byte in &bytes[..bytes.len() - 1] {
      buf.put_u8(byte);
      assert!(dec.decode(&mut buf).unwrap().is_none());
    }
    buf.put_u8(bytes[bytes.len() - 1]);
    let out = dec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(out.identity.as_ref(), b"xy");
  }

  #[test]
  fn rejects_garbage() {
    let mut buf = BytesMut::from(&[0u8; 16][..]);
    let mut dec = GreetingDecoder::new();
    assert!(dec.decode(&mut buf).is_err());
  }
}
