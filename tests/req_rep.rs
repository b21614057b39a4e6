// tests/req_rep.rs

use coremq::socket::options;
use coremq::{Msg, MqError, SocketFlags, SocketType};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn test_req_rep_inproc_basic() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut rep = ctx.socket(SocketType::Rep).unwrap();
  let mut req = ctx.socket(SocketType::Req).unwrap();
  rep.bind(&endpoint).unwrap();
  req.connect(&endpoint).unwrap();

  req.send(Msg::from_static(b"A"), SocketFlags::empty()).unwrap();
  let request = common::recv_within(&mut rep, LONG_TIMEOUT).unwrap();
  assert_eq!(request.data().unwrap(), b"A");

  rep.send(Msg::from_static(b"B"), SocketFlags::empty()).unwrap();
  let reply = common::recv_within(&mut req, LONG_TIMEOUT).unwrap();
  assert_eq!(reply.data().unwrap(), b"B");

  rep.close();
  req.close();
  ctx.term().unwrap();
}

#[test]
fn test_req_rep_tcp_basic() {
  let ctx = common::test_context();
  let port = common::free_tcp_port();
  let endpoint = format!("tcp://127.0.0.1:{port}");

  let mut rep = ctx.socket(SocketType::Rep).unwrap();
  let mut req = ctx.socket(SocketType::Req).unwrap();

  rep.bind(&endpoint).unwrap();
  req.connect(&endpoint).unwrap();
  common::settle();

  req.send(Msg::from_static(b"A"), SocketFlags::empty()).unwrap();
  let request = common::recv_within(&mut rep, LONG_TIMEOUT).unwrap();
  assert_eq!(request.data().unwrap(), b"A");

  rep.send(Msg::from_static(b"B"), SocketFlags::empty()).unwrap();
  let reply = common::recv_within(&mut req, LONG_TIMEOUT).unwrap();
  assert_eq!(reply.data().unwrap(), b"B");

  // Second round trip over the same connection.
  req.send(Msg::from_static(b"A2"), SocketFlags::empty()).unwrap();
  let request = common::recv_within(&mut rep, LONG_TIMEOUT).unwrap();
  assert_eq!(request.data().unwrap(), b"A2");
  rep.send(Msg::from_static(b"B2"), SocketFlags::empty()).unwrap();
  let reply = common::recv_within(&mut req, LONG_TIMEOUT).unwrap();
  assert_eq!(reply.data().unwrap(), b"B2");

  rep.close();
  req.close();
  ctx.term().unwrap();
}

#[test]
fn test_req_rep_fsm_violations() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut rep = ctx.socket(SocketType::Rep).unwrap();
  let mut req = ctx.socket(SocketType::Req).unwrap();
  rep.bind(&endpoint).unwrap();
  req.connect(&endpoint).unwrap();

  // REQ cannot receive before sending.
  assert!(matches!(req.recv(SocketFlags::DONT_WAIT), Err(MqError::Fsm)));
  // REP cannot send before receiving.
  assert!(matches!(
    rep.send(Msg::from_static(b"nope"), SocketFlags::DONT_WAIT),
    Err(MqError::Fsm)
  ));

  req.send(Msg::from_static(b"A"), SocketFlags::empty()).unwrap();
  // REQ cannot send twice in a row.
  assert!(matches!(
    req.send(Msg::from_static(b"again"), SocketFlags::DONT_WAIT),
    Err(MqError::Fsm)
  ));

  let request = common::recv_within(&mut rep, LONG_TIMEOUT).unwrap();
  assert_eq!(request.data().unwrap(), b"A");
  // REP cannot receive twice before replying.
  assert!(matches!(rep.recv(SocketFlags::DONT_WAIT), Err(MqError::Fsm)));

  rep.send(Msg::from_static(b"B"), SocketFlags::empty()).unwrap();
  let reply = common::recv_within(&mut req, LONG_TIMEOUT).unwrap();
  assert_eq!(reply.data().unwrap(), b"B");
  // And REQ can receive only once per request.
  assert!(matches!(req.recv(SocketFlags::DONT_WAIT), Err(MqError::Fsm)));

  rep.close();
  req.close();
  ctx.term().unwrap();
}

#[test]
fn test_rep_reply_reaches_originating_req_only() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut rep = ctx.socket(SocketType::Rep).unwrap();
  rep.bind(&endpoint).unwrap();

  let mut req_a = ctx.socket(SocketType::Req).unwrap();
  let mut req_b = ctx.socket(SocketType::Req).unwrap();
  req_a.connect(&endpoint).unwrap();
  req_b.connect(&endpoint).unwrap();

  req_a.send(Msg::from_static(b"from-a"), SocketFlags::empty()).unwrap();
  req_b.send(Msg::from_static(b"from-b"), SocketFlags::empty()).unwrap();

  for _ in 0..2 {
    let request = common::recv_within(&mut rep, LONG_TIMEOUT).unwrap();
    let payload = request.data().unwrap().to_vec();
    rep.send(Msg::from_bytes(payload.clone().into()), SocketFlags::empty()).unwrap();
  }

  let reply_a = common::recv_within(&mut req_a, LONG_TIMEOUT).unwrap();
  assert_eq!(reply_a.data().unwrap(), b"from-a");
  let reply_b = common::recv_within(&mut req_b, LONG_TIMEOUT).unwrap();
  assert_eq!(reply_b.data().unwrap(), b"from-b");

  rep.close();
  req_a.close();
  req_b.close();
  ctx.term().unwrap();
}

#[test]
fn test_req_correlate_and_relaxed() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut rep = ctx.socket(SocketType::Rep).unwrap();
  rep.bind(&endpoint).unwrap();

  let mut req = ctx.socket(SocketType::Req).unwrap();
  req.set_option(options::REQ_CORRELATE, &1i32.to_ne_bytes()).unwrap();
  req.set_option(options::REQ_RELAXED, &1i32.to_ne_bytes()).unwrap();
  req.connect(&endpoint).unwrap();

  req.send(Msg::from_static(b"one"), SocketFlags::empty()).unwrap();
  // Relaxed: a new request may be issued without reading the reply.
  req.send(Msg::from_static(b"two"), SocketFlags::empty()).unwrap();

  // Serve both requests; the stale reply to "one" must be dropped by
  // the correlation filter.
  for _ in 0..2 {
    let request = common::recv_within(&mut rep, LONG_TIMEOUT).unwrap();
    let payload = request.data().unwrap().to_vec();
    rep.send(Msg::from_bytes(payload.into()), SocketFlags::empty()).unwrap();
  }

  let reply = common::recv_within(&mut req, LONG_TIMEOUT).unwrap();
  assert_eq!(reply.data().unwrap(), b"two");

  rep.close();
  req.close();
  ctx.term().unwrap();
}
