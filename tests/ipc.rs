// tests/ipc.rs

use coremq::{Msg, SocketFlags, SocketType};
use std::time::Duration;

mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(3);

fn unique_ipc_endpoint() -> (String, std::path::PathBuf) {
  let path = std::env::temp_dir().join(format!(
    "coremq-test-{}-{}.sock",
    std::process::id(),
    std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap()
      .subsec_nanos()
  ));
  (format!("ipc://{}", path.display()), path)
}

#[test]
fn test_push_pull_over_ipc() {
  let ctx = common::test_context();
  let (endpoint, path) = unique_ipc_endpoint();

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();
  common::settle();

  push
    .send(Msg::from_static(b"over-ipc"), SocketFlags::empty())
    .unwrap();
  let msg = common::recv_within(&mut pull, LONG_TIMEOUT).unwrap();
  assert_eq!(msg.data().unwrap(), b"over-ipc");

  push.close();
  pull.close();
  ctx.term().unwrap();
  let _ = std::fs::remove_file(path);
}
