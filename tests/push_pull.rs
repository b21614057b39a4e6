// tests/push_pull.rs

use coremq::socket::options;
use coremq::{Msg, MqError, SocketFlags, SocketType};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn test_push_pull_basic_inproc() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();

  for payload in [&b"one"[..], &b"two"[..], &b"three"[..]] {
    push
      .send(Msg::from_bytes(payload.to_vec().into()), SocketFlags::empty())
      .unwrap();
  }
  for payload in [&b"one"[..], &b"two"[..], &b"three"[..]] {
    let msg = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
    assert_eq!(msg.data().unwrap(), payload);
  }

  push.close();
  pull.close();
  ctx.term().unwrap();
}

#[test]
fn test_hwm_backpressure() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();

  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.set_option(options::SNDHWM, &4i32.to_ne_bytes()).unwrap();
  push.connect(&endpoint).unwrap();

  // Four messages fit; the fifth is refused while PULL doesn't read.
  for i in 0..4u8 {
    push
      .send(Msg::from_vec(vec![i]), SocketFlags::DONT_WAIT)
      .unwrap();
  }
  assert!(matches!(
    push.send(Msg::from_vec(vec![4]), SocketFlags::DONT_WAIT),
    Err(MqError::Again)
  ));

  // Draining the queue returns credit to the writer.
  for i in 0..4u8 {
    let msg = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
    assert_eq!(msg.data().unwrap(), &[i]);
  }
  let deadline = std::time::Instant::now() + LONG_TIMEOUT;
  loop {
    match push.send(Msg::from_vec(vec![9]), SocketFlags::DONT_WAIT) {
      Ok(()) => break,
      Err(MqError::Again) => {
        assert!(std::time::Instant::now() < deadline, "credit never came back");
        std::thread::sleep(Duration::from_millis(2));
      }
      Err(e) => panic!("unexpected error: {e:?}"),
    }
  }
  let msg = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
  assert_eq!(msg.data().unwrap(), &[9]);

  push.close();
  pull.close();
  ctx.term().unwrap();
}

#[test]
fn test_push_round_robins_across_pulls() {
  let ctx = common::test_context();
  let endpoint_a = common::unique_inproc_endpoint();
  let endpoint_b = common::unique_inproc_endpoint();

  let mut pull_a = ctx.socket(SocketType::Pull).unwrap();
  pull_a.bind(&endpoint_a).unwrap();
  let mut pull_b = ctx.socket(SocketType::Pull).unwrap();
  pull_b.bind(&endpoint_b).unwrap();

  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint_a).unwrap();
  push.connect(&endpoint_b).unwrap();
  common::settle();

  for i in 0..6u8 {
    push.send(Msg::from_vec(vec![i]), SocketFlags::empty()).unwrap();
  }

  let mut count_a = 0;
  let mut count_b = 0;
  for _ in 0..3 {
    common::recv_within(&mut pull_a, LONG_TIMEOUT).map(|_| count_a += 1).unwrap();
    common::recv_within(&mut pull_b, LONG_TIMEOUT).map(|_| count_b += 1).unwrap();
  }
  assert_eq!(count_a, 3);
  assert_eq!(count_b, 3);

  push.close();
  pull_a.close();
  pull_b.close();
  ctx.term().unwrap();
}

#[test]
fn test_push_blocks_until_peer_appears() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();
  // No pipe yet (bind pending): a non-blocking send reports Again.
  assert!(matches!(
    push.send(Msg::from_static(b"early"), SocketFlags::DONT_WAIT),
    Err(MqError::Again)
  ));

  let ctx_clone = ctx.clone();
  let endpoint_clone = endpoint.clone();
  let binder = std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(100));
    let mut pull = ctx_clone.socket(SocketType::Pull).unwrap();
    pull.bind(&endpoint_clone).unwrap();
    let msg = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
    assert_eq!(msg.data().unwrap(), b"hello");
    pull.close();
  });

  // The blocking send parks on the mailbox until the bind's pipe lands.
  push
    .send(Msg::from_static(b"hello"), SocketFlags::empty())
    .unwrap();

  binder.join().unwrap();
  push.close();
  ctx.term().unwrap();
}
