// tests/router_dealer.rs

use coremq::socket::options;
use coremq::{Msg, MqError, SocketFlags, SocketType};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn test_dealer_router_envelope() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut router = ctx.socket(SocketType::Router).unwrap();
  router.bind(&endpoint).unwrap();
  let mut dealer = ctx.socket(SocketType::Dealer).unwrap();
  dealer.connect(&endpoint).unwrap();

  dealer
    .send(Msg::from_static(b"work"), SocketFlags::empty())
    .unwrap();

  // ROUTER prepends the peer identity.
  let identity = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();
  assert!(router.rcvmore());
  assert!(!identity.data().unwrap().is_empty());
  let payload = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();
  assert_eq!(payload.data().unwrap(), b"work");
  assert!(!router.rcvmore());

  // Replying requires the identity as the first frame.
  router
    .send(
      Msg::from_bytes(identity.data().unwrap().to_vec().into()),
      SocketFlags::SEND_MORE,
    )
    .unwrap();
  router
    .send(Msg::from_static(b"done"), SocketFlags::empty())
    .unwrap();

  let reply = common::recv_within(&mut dealer, LONG_TIMEOUT).unwrap();
  assert_eq!(reply.data().unwrap(), b"done");

  router.close();
  dealer.close();
  ctx.term().unwrap();
}

#[test]
fn test_router_uses_configured_identity() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut router = ctx.socket(SocketType::Router).unwrap();
  router.bind(&endpoint).unwrap();

  let mut dealer = ctx.socket(SocketType::Dealer).unwrap();
  dealer.set_option(options::IDENTITY, b"worker-7").unwrap();
  dealer.connect(&endpoint).unwrap();

  dealer.send(Msg::from_static(b"hi"), SocketFlags::empty()).unwrap();

  let identity = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();
  assert_eq!(identity.data().unwrap(), b"worker-7");
  let payload = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();
  assert_eq!(payload.data().unwrap(), b"hi");

  router.close();
  dealer.close();
  ctx.term().unwrap();
}

#[test]
fn test_router_mandatory_reports_unroutable() {
  let ctx = common::test_context();

  let mut router = ctx.socket(SocketType::Router).unwrap();
  router
    .set_option(options::ROUTER_MANDATORY, &1i32.to_ne_bytes())
    .unwrap();

  let result = router.send(Msg::from_static(b"nobody"), SocketFlags::SEND_MORE);
  assert!(matches!(result, Err(MqError::HostUnreachable)));

  router.close();
  ctx.term().unwrap();
}

#[test]
fn test_router_drops_unroutable_by_default() {
  let ctx = common::test_context();

  let mut router = ctx.socket(SocketType::Router).unwrap();
  // Without mandatory mode the whole message is swallowed silently.
  router
    .send(Msg::from_static(b"nobody"), SocketFlags::SEND_MORE)
    .unwrap();
  router
    .send(Msg::from_static(b"payload"), SocketFlags::empty())
    .unwrap();

  router.close();
  ctx.term().unwrap();
}

#[test]
fn test_dealer_fair_queues_two_routers() {
  let ctx = common::test_context();
  let endpoint_a = common::unique_inproc_endpoint();
  let endpoint_b = common::unique_inproc_endpoint();

  let mut rep_a = ctx.socket(SocketType::Rep).unwrap();
  rep_a.bind(&endpoint_a).unwrap();
  let mut rep_b = ctx.socket(SocketType::Rep).unwrap();
  rep_b.bind(&endpoint_b).unwrap();

  let mut dealer = ctx.socket(SocketType::Dealer).unwrap();
  dealer.connect(&endpoint_a).unwrap();
  dealer.connect(&endpoint_b).unwrap();
  common::settle();

  // DEALER round-robins requests; both REPs serve one each.
  for _ in 0..2 {
    dealer
      .send(Msg::new(), SocketFlags::SEND_MORE)
      .unwrap();
    dealer
      .send(Msg::from_static(b"job"), SocketFlags::empty())
      .unwrap();
  }
  for rep in [&mut rep_a, &mut rep_b] {
    let job = common::recv_within(rep, LONG_TIMEOUT).unwrap();
    assert_eq!(job.data().unwrap(), b"job");
    rep
      .send(Msg::from_static(b"ack"), SocketFlags::empty())
      .unwrap();
  }
  for _ in 0..2 {
    // Each reply comes back with the empty delimiter attached.
    let delim = common::recv_within(&mut dealer, LONG_TIMEOUT).unwrap();
    assert_eq!(delim.size(), 0);
    assert!(dealer.rcvmore());
    let ack = common::recv_within(&mut dealer, LONG_TIMEOUT).unwrap();
    assert_eq!(ack.data().unwrap(), b"ack");
  }

  rep_a.close();
  rep_b.close();
  dealer.close();
  ctx.term().unwrap();
}

#[test]
fn test_duplicate_identity_rejected() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut router = ctx.socket(SocketType::Router).unwrap();
  router.bind(&endpoint).unwrap();

  let mut first = ctx.socket(SocketType::Dealer).unwrap();
  first.set_option(options::IDENTITY, b"twin").unwrap();
  first.connect(&endpoint).unwrap();
  common::settle();
  // Make sure the first pipe is attached before the twin arrives.
  first.send(Msg::from_static(b"one"), SocketFlags::empty()).unwrap();
  let _ = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();
  let _ = common::recv_within(&mut router, LONG_TIMEOUT).unwrap();

  let mut second = ctx.socket(SocketType::Dealer).unwrap();
  second.set_option(options::IDENTITY, b"twin").unwrap();
  second.connect(&endpoint).unwrap();
  common::settle();

  // The second pipe was closed at attach; its messages never arrive.
  let _ = second.send(Msg::from_static(b"two"), SocketFlags::DONT_WAIT);
  assert!(matches!(
    common::recv_within(&mut router, Duration::from_millis(100)),
    Err(MqError::Again)
  ));

  router.close();
  first.close();
  second.close();
  ctx.term().unwrap();
}
