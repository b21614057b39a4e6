use crate::error::MqError;
use crate::message::{Msg, MsgFlags};
use bytes::{Buf, BufMut, BytesMut};

const FLAG_MORE: u8 = 0x01;
const FLAG_LONG: u8 = 0x02;
const FLAG_COMMAND: u8 = 0x04;

/// Upper bound on a single frame; anything larger is treated as a
/// protocol violation rather than an allocation request.
const MAX_FRAME_SIZE: usize = 1 << 30;

#[derive(Debug, Default, Clone, Copy)]
enum DecodingState {
  #[default]
  ReadHeader,
  ReadBody(FrameHeader),
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
  flags: u8,
  size: usize,
}

/// Message framing: `flags(1) + length(1)` for frames up to 255 bytes,
/// `flags|LONG(1) + length(8, big-endian)` beyond that, then the body.
#[derive(Debug, Default)]
pub(crate) struct FrameCodec {
  decoding_state: DecodingState,
}

impl FrameCodec {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn encode(&mut self, item: &Msg, dst: &mut BytesMut) {
    let data = item.data().unwrap_or(&[]);
    let size = data.len();

    let mut flags = 0u8;
    if item.flags().contains(MsgFlags::MORE) {
      flags |= FLAG_MORE;
    }
    if item.flags().contains(MsgFlags::COMMAND) {
      flags |= FLAG_COMMAND;
    }

    if size <= 255 {
      dst.reserve(2 + size);
      dst.put_u8(flags);
      dst.put_u8(size as u8);
    } else {
      flags |= FLAG_LONG;
      dst.reserve(9 + size);
      dst.put_u8(flags);
      dst.put_u64(size as u64);
    }
    dst.put_slice(data);
  }

  pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Msg>, MqError> {
    loop {
      match self.decoding_state {
        DecodingState::ReadHeader => {
          if src.len() < 2 {
            return Ok(None);
          }
          let flags = src[0];
          let (size, header_len) = if flags & FLAG_LONG != 0 {
            if src.len() < 9 {
              return Ok(None);
            }
            let mut len_bytes = [0u8; 8];
            len_bytes.copy_from_slice(&src[1..9]);
            (u64::from_be_bytes(len_bytes) as usize, 9)
          } else {
            (src[1] as usize, 2)
          };
          if size > MAX_FRAME_SIZE {
            return Err(MqError::Fault(format!("frame of {size} bytes exceeds limit")));
          }
          src.advance(header_len);
          self.decoding_state = DecodingState::ReadBody(FrameHeader { flags, size });
        }
        DecodingState::ReadBody(header) => {
          if src.len() < header.size {
            return Ok(None);
          }
          let body = src.split_to(header.size).freeze();
          self.decoding_state = DecodingState::ReadHeader;
          let mut msg = Msg::from_bytes(body);
          let mut flags = MsgFlags::empty();
          if header.flags & FLAG_MORE != 0 {
            flags |= MsgFlags::MORE;
          }
          if header.flags & FLAG_COMMAND != 0 {
            flags |= MsgFlags::COMMAND;
          }
          msg.set_flags(flags);
          return Ok(Some(msg));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_frame_roundtrip() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    let mut msg = Msg::from_static(b"hello");
    msg.set_flags(MsgFlags::MORE);
    codec.encode(&msg, &mut buf);
    assert_eq!(buf[0], FLAG_MORE);
    assert_eq!(buf[1], 5);
    let out = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(out.data(), Some(&b"hello"[..]));
    assert!(out.is_more());
    assert!(buf.is_empty());
  }

  #[test]
  fn long_frame_roundtrip() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    let payload = vec![0xAB; 300];
    codec.encode(&Msg::from_vec(payload.clone()), &mut buf);
    assert_eq!(buf[0], FLAG_LONG);
    let out = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(out.data(), Some(payload.as_slice()));
    assert!(!out.is_more());
  }

  #[test]
  fn decode_across_partial_reads() {
    let mut codec = FrameCodec::new();
    let mut encoded = BytesMut::new();
    codec.encode(&Msg::from_static(b"abc"), &mut encoded);
    let bytes = encoded.to_vec();

    let mut buf = BytesMut::new();
    for &b in &bytes[..bytes.len() - 1] {
      buf.put_u8(b);
      assert!(codec.decode(&mut buf).unwrap().is_none());
    }
    buf.put_u8(bytes[bytes.len() - 1]);
    let out = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(out.data(), Some(&b"abc"[..]));
  }

  #[test]
  fn several_frames_in_one_buffer() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    for payload in [&b"one"[..], &b"two"[..], &b"three"[..]] {
      codec.encode(&Msg::from_bytes(payload.to_vec().into()), &mut buf);
    }
    for payload in [&b"one"[..], &b"two"[..], &b"three"[..]] {
      let out = codec.decode(&mut buf).unwrap().unwrap();
      assert_eq!(out.data(), Some(payload));
    }
    assert!(codec.decode(&mut buf).unwrap().is_none());
  }
}
