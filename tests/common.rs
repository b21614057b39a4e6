// tests/common.rs

#![allow(dead_code)]

use coremq::{Context, Msg, MqError, Socket, SocketFlags};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

static INIT: Once = Once::new();
static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn test_context() -> Context {
  INIT.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
  Context::new().expect("context creation failed")
}

pub fn unique_inproc_endpoint() -> String {
  let n = COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://test-{}-{}", std::process::id(), n)
}

/// Picks a free TCP port by asking the OS for an ephemeral one.
pub fn free_tcp_port() -> u16 {
  let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("ephemeral bind failed");
  listener.local_addr().expect("no local addr").port()
}

/// Polls a socket with DONT_WAIT until a message arrives or the deadline
/// passes.
pub fn recv_within(socket: &mut Socket, timeout: Duration) -> Result<Msg, MqError> {
  let deadline = Instant::now() + timeout;
  loop {
    match socket.recv(SocketFlags::DONT_WAIT) {
      Err(MqError::Again) => {
        if Instant::now() >= deadline {
          return Err(MqError::Again);
        }
        std::thread::sleep(Duration::from_millis(2));
      }
      other => return other,
    }
  }
}

pub fn send_ok(socket: &mut Socket, data: &'static [u8]) {
  socket
    .send(Msg::from_static(data), SocketFlags::empty())
    .expect("send failed");
}

pub fn settle() {
  std::thread::sleep(Duration::from_millis(50));
}
