// tests/tcp_stream.rs

use coremq::socket::options;
use coremq::{Msg, SocketFlags, SocketType};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn test_large_frames_over_tcp() {
  let ctx = common::test_context();
  let port = common::free_tcp_port();
  let endpoint = format!("tcp://127.0.0.1:{port}");

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();
  common::settle();

  // Beyond the short-frame limit, exercising the 8-byte length form.
  let big: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
  push
    .send(Msg::from_vec(big.clone()), SocketFlags::empty())
    .unwrap();

  let msg = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
  assert_eq!(msg.size(), big.len());
  assert_eq!(msg.data().unwrap(), big.as_slice());

  push.close();
  pull.close();
  ctx.term().unwrap();
}

#[test]
fn test_multipart_never_interleaves_over_tcp() {
  let ctx = common::test_context();
  let port = common::free_tcp_port();
  let endpoint = format!("tcp://127.0.0.1:{port}");

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();
  common::settle();

  for i in 0..20u8 {
    push
      .send(Msg::from_vec(vec![i]), SocketFlags::SEND_MORE)
      .unwrap();
    push
      .send(Msg::from_vec(vec![i, i]), SocketFlags::empty())
      .unwrap();
  }
  for i in 0..20u8 {
    let head = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
    assert_eq!(head.data().unwrap(), &[i]);
    assert!(pull.rcvmore());
    let tail = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
    assert_eq!(tail.data().unwrap(), &[i, i]);
    assert!(!pull.rcvmore());
  }

  push.close();
  pull.close();
  ctx.term().unwrap();
}

#[test]
fn test_dealer_router_identity_over_tcp() {
  let ctx = common::test_context();
  let port = common::free_tcp_port();
  let endpoint = format!("tcp://127.0.0.1:{port}");

  let mut router = ctx.socket(SocketType::Router).unwrap();
  router.bind(&endpoint).unwrap();

  let mut dealer = ctx.socket(SocketType::Dealer).unwrap();
  dealer.set_option(options::IDENTITY, b"remote-1").unwrap();
  dealer.connect(&endpoint).unwrap();
  common::settle();

  dealer
    .send(Msg::from_static(b"ping"), SocketFlags::empty())
    .unwrap();

  // The greeting carried the identity across the wire.
  let identity = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();
  assert_eq!(identity.data().unwrap(), b"remote-1");
  let payload = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();
  assert_eq!(payload.data().unwrap(), b"ping");

  router
    .send(Msg::from_static(b"remote-1"), SocketFlags::SEND_MORE)
    .unwrap();
  router
    .send(Msg::from_static(b"pong"), SocketFlags::empty())
    .unwrap();
  let reply = common::recv_within(&mut dealer, LONG_TIMEOUT).unwrap();
  assert_eq!(reply.data().unwrap(), b"pong");

  router.close();
  dealer.close();
  ctx.term().unwrap();
}

#[test]
fn test_tcp_backpressure_applies_hwm() {
  let ctx = common::test_context();
  let port = common::free_tcp_port();
  let endpoint = format!("tcp://127.0.0.1:{port}");

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.set_option(options::RCVHWM, &2i32.to_ne_bytes()).unwrap();
  pull.bind(&endpoint).unwrap();

  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.set_option(options::SNDHWM, &2i32.to_ne_bytes()).unwrap();
  push.connect(&endpoint).unwrap();
  common::settle();

  // Push far more than the watermarks hold; everything must arrive once
  // the reader keeps up.
  let producer = std::thread::spawn(move || {
    for i in 0..200u8 {
      push
        .send(Msg::from_vec(vec![i]), SocketFlags::empty())
        .unwrap();
    }
    push
  });

  for i in 0..200u8 {
    let msg = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
    assert_eq!(msg.data().unwrap(), &[i]);
  }

  let push = producer.join().unwrap();
  push.close();
  pull.close();
  ctx.term().unwrap();
}
