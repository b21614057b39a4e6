// tests/pub_sub.rs

use coremq::socket::options;
use coremq::{Msg, MqError, SocketFlags, SocketType};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn test_pub_sub_prefix_filtering() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut publisher = ctx.socket(SocketType::Pub).unwrap();
  publisher.bind(&endpoint).unwrap();

  let mut subscriber = ctx.socket(SocketType::Sub).unwrap();
  subscriber.connect(&endpoint).unwrap();
  subscriber.subscribe(b"AB").unwrap();
  common::settle();

  // Matching two-frame message arrives whole.
  publisher
    .send(Msg::from_static(b"AB"), SocketFlags::SEND_MORE)
    .unwrap();
  publisher.send(Msg::from_static(b"1"), SocketFlags::empty()).unwrap();

  let topic = common::recv_within(&mut subscriber, LONG_TIMEOUT).unwrap();
  assert_eq!(topic.data().unwrap(), b"AB");
  assert!(subscriber.rcvmore());
  let body = common::recv_within(&mut subscriber, LONG_TIMEOUT).unwrap();
  assert_eq!(body.data().unwrap(), b"1");

  // Non-matching topic is never delivered.
  publisher.send(Msg::from_static(b"ZZ"), SocketFlags::empty()).unwrap();
  assert!(matches!(
    common::recv_within(&mut subscriber, Duration::from_millis(100)),
    Err(MqError::Again)
  ));

  // After unsubscribing, the previously matching topic stops arriving.
  subscriber.unsubscribe(b"AB").unwrap();
  common::settle();
  publisher
    .send(Msg::from_static(b"AB"), SocketFlags::SEND_MORE)
    .unwrap();
  publisher.send(Msg::from_static(b"1"), SocketFlags::empty()).unwrap();
  assert!(matches!(
    common::recv_within(&mut subscriber, Duration::from_millis(100)),
    Err(MqError::Again)
  ));

  publisher.close();
  subscriber.close();
  ctx.term().unwrap();
}

#[test]
fn test_sub_connect_then_pub_bind_resubscribes() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  // Connect and subscribe before any publisher exists.
  let mut subscriber = ctx.socket(SocketType::Sub).unwrap();
  subscriber.connect(&endpoint).unwrap();
  subscriber.subscribe(b"X").unwrap();

  let mut publisher = ctx.socket(SocketType::Pub).unwrap();
  publisher.bind(&endpoint).unwrap();
  common::settle();

  publisher
    .send(Msg::from_static(b"X"), SocketFlags::SEND_MORE)
    .unwrap();
  publisher
    .send(Msg::from_static(b"hello"), SocketFlags::empty())
    .unwrap();

  let topic = common::recv_within(&mut subscriber, LONG_TIMEOUT).unwrap();
  assert_eq!(topic.data().unwrap(), b"X");
  let body = common::recv_within(&mut subscriber, LONG_TIMEOUT).unwrap();
  assert_eq!(body.data().unwrap(), b"hello");

  publisher.close();
  subscriber.close();
  ctx.term().unwrap();
}

#[test]
fn test_pub_sub_tcp_reconnect_resubscribes() {
  let ctx = common::test_context();
  let port = common::free_tcp_port();
  let endpoint = format!("tcp://127.0.0.1:{port}");

  // Subscriber first; the connecter retries until the bind appears.
  let mut subscriber = ctx.socket(SocketType::Sub).unwrap();
  subscriber.connect(&endpoint).unwrap();
  subscriber.subscribe(b"X").unwrap();

  std::thread::sleep(Duration::from_millis(150));
  let mut publisher = ctx.socket(SocketType::Pub).unwrap();
  publisher.bind(&endpoint).unwrap();
  std::thread::sleep(Duration::from_millis(400));

  // Publish until the (re)connected subscription takes effect.
  let deadline = std::time::Instant::now() + LONG_TIMEOUT;
  let topic = loop {
    publisher
      .send(Msg::from_static(b"X"), SocketFlags::SEND_MORE)
      .unwrap();
    publisher
      .send(Msg::from_static(b"hello"), SocketFlags::empty())
      .unwrap();
    match common::recv_within(&mut subscriber, Duration::from_millis(100)) {
      Ok(msg) => break msg,
      Err(MqError::Again) => {
        assert!(std::time::Instant::now() < deadline, "subscription never arrived");
      }
      Err(e) => panic!("unexpected error: {e:?}"),
    }
  };
  assert_eq!(topic.data().unwrap(), b"X");
  let body = common::recv_within(&mut subscriber, LONG_TIMEOUT).unwrap();
  assert_eq!(body.data().unwrap(), b"hello");

  publisher.close();
  subscriber.close();
  ctx.term().unwrap();
}

#[test]
fn test_xpub_sees_subscription_messages() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut xpub = ctx.socket(SocketType::XPub).unwrap();
  xpub.bind(&endpoint).unwrap();

  let mut subscriber = ctx.socket(SocketType::Sub).unwrap();
  subscriber.connect(&endpoint).unwrap();
  subscriber.subscribe(b"topic").unwrap();
  common::settle();

  let sub_msg = common::recv_within(&mut xpub, LONG_TIMEOUT).unwrap();
  let data = sub_msg.data().unwrap();
  assert_eq!(data[0], 1);
  assert_eq!(&data[1..], b"topic");

  subscriber.unsubscribe(b"topic").unwrap();
  let unsub_msg = common::recv_within(&mut xpub, LONG_TIMEOUT).unwrap();
  let data = unsub_msg.data().unwrap();
  assert_eq!(data[0], 0);
  assert_eq!(&data[1..], b"topic");

  xpub.close();
  subscriber.close();
  ctx.term().unwrap();
}

#[test]
fn test_xsub_sends_raw_subscriptions() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut publisher = ctx.socket(SocketType::Pub).unwrap();
  publisher.bind(&endpoint).unwrap();

  let mut xsub = ctx.socket(SocketType::XSub).unwrap();
  xsub.connect(&endpoint).unwrap();
  xsub
    .send(Msg::from_vec(vec![1, b'T']), SocketFlags::empty())
    .unwrap();
  common::settle();

  publisher
    .send(Msg::from_static(b"T-data"), SocketFlags::empty())
    .unwrap();
  let msg = common::recv_within(&mut xsub, LONG_TIMEOUT).unwrap();
  assert_eq!(msg.data().unwrap(), b"T-data");

  publisher.close();
  xsub.close();
  ctx.term().unwrap();
}

#[test]
fn test_xpub_welcome_message() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut xpub = ctx.socket(SocketType::XPub).unwrap();
  xpub.set_option(options::XPUB_WELCOME_MSG, b"hi there").unwrap();
  xpub.bind(&endpoint).unwrap();

  let mut xsub = ctx.socket(SocketType::XSub).unwrap();
  xsub.connect(&endpoint).unwrap();
  common::settle();

  let welcome = common::recv_within(&mut xsub, LONG_TIMEOUT).unwrap();
  assert_eq!(welcome.data().unwrap(), b"hi there");

  xpub.close();
  xsub.close();
  ctx.term().unwrap();
}

#[test]
fn test_sub_never_sends() {
  let ctx = common::test_context();
  let mut subscriber = ctx.socket(SocketType::Sub).unwrap();
  assert!(matches!(
    subscriber.send(Msg::from_static(b"x"), SocketFlags::DONT_WAIT),
    Err(MqError::Unsupported(_))
  ));
  let mut publisher = ctx.socket(SocketType::Pub).unwrap();
  assert!(matches!(
    publisher.recv(SocketFlags::DONT_WAIT),
    Err(MqError::Unsupported(_))
  ));
  subscriber.close();
  publisher.close();
  ctx.term().unwrap();
}
