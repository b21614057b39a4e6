// tests/poller.rs

use coremq::{Msg, Poller, SocketFlags, SocketType, Timer};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

mod common;

#[test]
fn test_timer_fires_before_socket_event() {
  let ctx = common::test_context();
  let endpoint = common::unique_inproc_endpoint();

  let mut pull = ctx.socket(SocketType::Pull).unwrap();
  pull.bind(&endpoint).unwrap();
  let mut push = ctx.socket(SocketType::Push).unwrap();
  push.connect(&endpoint).unwrap();

  let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
  let poller = Poller::new().unwrap();

  let timer = Timer::new(Duration::from_millis(50), false);
  {
    let events = Arc::clone(&events);
    poller.add_timer(&timer, move || {
      events.lock().unwrap().push("timer");
    });
  }
  let pull_id = {
    let events = Arc::clone(&events);
    poller.add_socket(pull, move |socket| {
      if socket.recv(SocketFlags::DONT_WAIT).is_ok() {
        events.lock().unwrap().push("socket");
      }
    })
  };

  let loop_poller = poller.clone();
  let loop_thread = std::thread::spawn(move || {
    loop_poller.poll_till_cancelled().unwrap();
  });

  // Message arrives well after the timer's schedule.
  std::thread::sleep(Duration::from_millis(100));
  push
    .send(Msg::from_static(b"m"), SocketFlags::empty())
    .unwrap();

  let deadline = Instant::now() + Duration::from_secs(2);
  loop {
    {
      let seen = events.lock().unwrap();
      if seen.len() >= 2 {
        assert_eq!(*seen, vec!["timer", "socket"]);
        break;
      }
    }
    assert!(Instant::now() < deadline, "poller never delivered both events");
    std::thread::sleep(Duration::from_millis(5));
  }

  poller.cancel_and_join();
  loop_thread.join().unwrap();

  if let Some(pull) = poller.remove_socket(pull_id) {
    pull.close();
  }
  push.close();
  ctx.term().unwrap();
}

#[test]
fn test_timer_never_fires_early_and_rearms_from_now() {
  let poller = Poller::new().unwrap();
  let fired: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

  let timer = Timer::new(Duration::from_millis(40), false);
  {
    let fired = Arc::clone(&fired);
    poller.add_timer(&timer, move || {
      fired.lock().unwrap().push(Instant::now());
    });
  }
  let armed_at = Instant::now();

  // Not invoked before poll_* runs.
  std::thread::sleep(Duration::from_millis(10));
  assert!(fired.lock().unwrap().is_empty());

  // One iteration before the schedule: nothing fires.
  poller.poll_once().unwrap();
  let first = fired.lock().unwrap().first().copied();
  if let Some(t) = first {
    assert!(t.duration_since(armed_at) >= Duration::from_millis(40));
  }

  // Keep polling until it fires; never early.
  let deadline = Instant::now() + Duration::from_secs(2);
  while fired.lock().unwrap().is_empty() {
    poller.poll_once().unwrap();
    assert!(Instant::now() < deadline);
  }
  let fire_time = fired.lock().unwrap()[0];
  assert!(fire_time.duration_since(armed_at) >= Duration::from_millis(40));

  // One-shot: no further firings.
  poller.poll_once().unwrap();
  assert_eq!(fired.lock().unwrap().len(), 1);

  // Re-enabling rearms from now.
  let reenabled_at = Instant::now();
  timer.enable(true);
  let deadline = Instant::now() + Duration::from_secs(2);
  while fired.lock().unwrap().len() < 2 {
    poller.poll_once().unwrap();
    assert!(Instant::now() < deadline);
  }
  let second = fired.lock().unwrap()[1];
  assert!(second.duration_since(reenabled_at) >= Duration::from_millis(40));
}

#[test]
fn test_disabled_timer_does_not_fire() {
  let poller = Poller::new().unwrap();
  let count = Arc::new(Mutex::new(0usize));

  let timer = Timer::new(Duration::from_millis(10), true);
  {
    let count = Arc::clone(&count);
    poller.add_timer(&timer, move || {
      *count.lock().unwrap() += 1;
    });
  }
  timer.enable(false);

  std::thread::sleep(Duration::from_millis(30));
  poller.poll_once().unwrap();
  assert_eq!(*count.lock().unwrap(), 0);
}

#[test]
fn test_raw_fd_callback() {
  let poller = Poller::new().unwrap();
  let hits = Arc::new(Mutex::new(0usize));

  // A unix pipe stands in for an arbitrary OS socket.
  let mut fds = [0i32; 2];
  assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
  let (read_fd, write_fd) = (fds[0], fds[1]);

  {
    let hits = Arc::clone(&hits);
    poller.add_pollin_fd(read_fd, move || {
      let mut buf = [0u8; 8];
      unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
      *hits.lock().unwrap() += 1;
    });
  }

  let one = 1u8;
  unsafe { libc::write(write_fd, &one as *const u8 as *const _, 1) };
  poller.poll_once().unwrap();
  assert_eq!(*hits.lock().unwrap(), 1);

  poller.remove_pollin_fd(read_fd);
  unsafe { libc::write(write_fd, &one as *const u8 as *const _, 1) };
  poller.poll_once().unwrap();
  assert_eq!(*hits.lock().unwrap(), 1);

  unsafe {
    libc::close(read_fd);
    libc::close(write_fd);
  }
}

#[test]
fn test_remove_socket_returns_it() {
  let ctx = common::test_context();
  let poller = Poller::new().unwrap();

  let socket = ctx.socket(SocketType::Pull).unwrap();
  let id = poller.add_socket(socket, |_socket| {});
  let socket = poller.remove_socket(id).expect("socket comes back");
  socket.close();
  ctx.term().unwrap();
}

#[test]
fn test_cancel_and_join_stops_loop() {
  let poller = Poller::new().unwrap();
  let loop_poller = poller.clone();
  let handle = std::thread::spawn(move || loop_poller.poll_till_cancelled());
  std::thread::sleep(Duration::from_millis(50));
  poller.cancel_and_join();
  handle.join().unwrap().unwrap();
}
