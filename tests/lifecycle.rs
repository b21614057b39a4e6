// tests/lifecycle.rs

use coremq::socket::options;
use coremq::{Msg, MqError, SocketFlags, SocketType};
use std::time::Duration;

mod common;

#[test]
fn test_term_without_sockets() {
  let ctx = common::test_context();
  // Lazy start: nothing ever spun up.
  ctx.term().unwrap();
  // Terminating twice is a no-op.
  ctx.term().unwrap();
}

#[test]
fn test_term_after_socket_use() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut a = ctx.socket(SocketType::Pair).unwrap();
  let mut b = ctx.socket(SocketType::Pair).unwrap();
  a.bind(&endpoint).unwrap();
  b.connect(&endpoint).unwrap();
  b.send(Msg::from_static(b"x"), SocketFlags::empty()).unwrap();
  let msg = common::recv_within(&mut a, Duration::from_secs(2)).unwrap();
  assert_eq!(msg.data().unwrap(), b"x");

  a.close();
  b.close();
  ctx.term().unwrap();
}

#[test]
fn test_blocked_recv_unblocks_on_term() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut socket = ctx.socket(SocketType::Pull).unwrap();
  socket.bind(&endpoint).unwrap();

  let ctx_for_term = ctx.clone();
  let waiter = std::thread::spawn(move || {
    // Blocks until the Stop command arrives.
    let result = socket.recv(SocketFlags::empty());
    assert!(matches!(result, Err(MqError::Terminating)));
    // All further calls keep failing the same way.
    assert!(matches!(
      socket.recv(SocketFlags::DONT_WAIT),
      Err(MqError::Terminating)
    ));
    socket.close();
  });

  std::thread::sleep(Duration::from_millis(100));
  ctx_for_term.term().unwrap();
  waiter.join().unwrap();
}

#[test]
fn test_socket_creation_fails_after_term_starts() {
  let ctx = common::test_context();
  let socket = ctx.socket(SocketType::Pull).unwrap();
  socket.close();
  ctx.term().unwrap();
  assert!(matches!(ctx.socket(SocketType::Pull), Err(MqError::Terminating)));
}

#[test]
fn test_too_many_sockets() {
  let ctx = common::test_context();
  ctx.set_max_sockets(2).unwrap();
  let a = ctx.socket(SocketType::Pull).unwrap();
  let b = ctx.socket(SocketType::Pull).unwrap();
  assert!(matches!(ctx.socket(SocketType::Pull), Err(MqError::TooManySockets)));
  // Closing one frees its slot for reuse.
  a.close();
  let deadline = std::time::Instant::now() + Duration::from_secs(2);
  let c = loop {
    match ctx.socket(SocketType::Pull) {
      Ok(socket) => break socket,
      Err(MqError::TooManySockets) => {
        assert!(std::time::Instant::now() < deadline, "slot never freed");
        std::thread::sleep(Duration::from_millis(5));
      }
      Err(e) => panic!("unexpected error: {e:?}"),
    }
  };
  b.close();
  c.close();
  ctx.term().unwrap();
}

#[test]
fn test_send_recv_timeouts_return_again() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.set_option(options::RCVTIMEO, &50i32.to_ne_bytes()).unwrap();
  pull.bind(&endpoint).unwrap();

  let start = std::time::Instant::now();
  assert!(matches!(pull.recv(SocketFlags::empty()), Err(MqError::Again)));
  let elapsed = start.elapsed();
  assert!(elapsed >= Duration::from_millis(50));
  assert!(elapsed < Duration::from_secs(2));

  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.set_option(options::SNDTIMEO, &50i32.to_ne_bytes()).unwrap();
  // No peer: the send times out rather than blocking forever.
  let start = std::time::Instant::now();
  assert!(matches!(
    push.send(Msg::from_static(b"x"), SocketFlags::empty()),
    Err(MqError::Again)
  ));
  assert!(start.elapsed() >= Duration::from_millis(50));

  pull.close();
  push.close();
  ctx.term().unwrap();
}

#[test]
fn test_last_endpoint_reports_ephemeral_port() {
  let ctx = common::test_context();
  let mut socket = ctx.socket(SocketType::Pull).unwrap();
  socket.bind("tcp://127.0.0.1:0").unwrap();
  let raw = socket.get_option(options::LAST_ENDPOINT).unwrap();
  let uri = String::from_utf8(raw).unwrap();
  assert!(uri.starts_with("tcp://127.0.0.1:"));
  let port: u16 = uri.rsplit(':').next().unwrap().parse().unwrap();
  assert_ne!(port, 0);
  socket.close();
  ctx.term().unwrap();
}

#[test]
fn test_unbind_and_disconnect() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();

  push.disconnect(&endpoint).unwrap();
  // Unknown endpoints report EndpointNotFound.
  assert!(matches!(
    push.disconnect("inproc://never-connected"),
    Err(MqError::EndpointNotFound(_))
  ));
  pull.unbind(&endpoint).unwrap();
  // A new bind on the same name succeeds after the unbind.
  let mut pull2 = ctx.socket(SocketType::Pull).unwrap();
  pull2.bind(&endpoint).unwrap();

  pull.close();
  pull2.close();
  push.close();
  ctx.term().unwrap();
}

#[test]
fn test_bind_conflicts_reported() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut a = ctx.socket(SocketType::Pull).unwrap();
  a.bind(&endpoint).unwrap();
  let mut b = ctx.socket(SocketType::Pull).unwrap();
  assert!(matches!(b.bind(&endpoint), Err(MqError::AddrInUse(_))));

  // Malformed and unsupported addresses.
  assert!(matches!(b.bind("bogus"), Err(MqError::AddrInvalid(_))));
  assert!(matches!(
    b.bind("udp://127.0.0.1:9"),
    Err(MqError::ProtocolNotSupported(_))
  ));
  // PGM parses but is rejected for incompatible socket types.
  assert!(matches!(
    b.bind("pgm://239.1.1.1:7500"),
    Err(MqError::AddrInvalid(_))
  ));

  a.close();
  b.close();
  ctx.term().unwrap();
}

#[test]
fn test_events_option_bitmap() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();
  common::settle();

  // PUSH is writable, PULL has nothing to read yet.
  assert_eq!(push.events().unwrap() & options::POLL_OUT, options::POLL_OUT);
  assert_eq!(pull.events().unwrap() & options::POLL_IN, 0);

  push.send(Msg::from_static(b"x"), SocketFlags::empty()).unwrap();
  let deadline = std::time::Instant::now() + Duration::from_secs(2);
  while pull.events().unwrap() & options::POLL_IN == 0 {
    assert!(std::time::Instant::now() < deadline);
    std::thread::sleep(Duration::from_millis(2));
  }

  push.close();
  pull.close();
  ctx.term().unwrap();
}
