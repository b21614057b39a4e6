//! The user-facing reactor: drives any number of sockets, raw OS fds and
//! timers from a single thread. Mutations may come from any thread; they
//! are queued and applied between iterations, so callbacks never race
//! handler-set changes.

use crate::error::MqError;
use crate::runtime::signaler::Signaler;
use crate::socket::options::POLL_IN;
use crate::socket::types::Socket;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Maximum wait of a single poll iteration; `poll_once` uses this as its
/// timeout.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct TimerInner {
  id: u64,
  interval: Mutex<Duration>,
  periodic: bool,
  enabled: AtomicBool,
  next_due: Mutex<Option<Instant>>,
}

/// A poller timer: one-shot or periodic. The handle is shared; cloning
/// it lets any thread enable, disable or retune the timer while it is
/// registered.
#[derive(Debug, Clone)]
pub struct Timer {
  inner: Arc<TimerInner>,
}

impl Timer {
  pub fn new(interval: Duration, periodic: bool) -> Self {
    Self {
      inner: Arc::new(TimerInner {
        id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
        interval: Mutex::new(interval),
        periodic,
        enabled: AtomicBool::new(true),
        next_due: Mutex::new(None),
      }),
    }
  }

  /// Changes the interval; takes effect at the next firing.
  pub fn set_interval(&self, interval: Duration) {
    *self.inner.interval.lock() = interval;
  }

  pub fn interval(&self) -> Duration {
    *self.inner.interval.lock()
  }

  /// Disabling stops further firings without removing the timer;
  /// re-enabling rearms from *now*, not from the original schedule.
  pub fn enable(&self, on: bool) {
    if on {
      *self.inner.next_due.lock() = Some(Instant::now() + *self.inner.interval.lock());
    }
    self.inner.enabled.store(on, Ordering::Release);
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.enabled.load(Ordering::Acquire)
  }

  fn arm_if_unarmed(&self) {
    let mut due = self.inner.next_due.lock();
    if due.is_none() {
      *due = Some(Instant::now() + *self.inner.interval.lock());
    }
  }

  fn due_at(&self) -> Option<Instant> {
    if !self.is_enabled() {
      return None;
    }
    *self.inner.next_due.lock()
  }

  /// Called by the poller after invoking the callback.
  fn fired(&self) {
    if self.inner.periodic {
      *self.inner.next_due.lock() = Some(Instant::now() + *self.inner.interval.lock());
    } else {
      self.inner.enabled.store(false, Ordering::Release);
      *self.inner.next_due.lock() = None;
    }
  }
}

type SocketCallback = Box<dyn FnMut(&mut Socket) + Send>;
type FdCallback = Box<dyn FnMut() + Send>;
type TimerCallback = Box<dyn FnMut() + Send>;

/// Token returned by `add_socket`, used to remove the socket again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(usize);

struct Items {
  sockets: HashMap<usize, (Socket, SocketCallback)>,
  fds: HashMap<RawFd, FdCallback>,
  timers: HashMap<u64, (Timer, TimerCallback)>,
}

enum Op {
  AddSocket {
    id: usize,
    socket: Box<Socket>,
    callback: SocketCallback,
  },
  RemoveSocket {
    id: usize,
    reply: Option<mpsc::Sender<Option<Socket>>>,
  },
  AddFd {
    fd: RawFd,
    callback: FdCallback,
  },
  RemoveFd {
    fd: RawFd,
    reply: Option<mpsc::Sender<()>>,
  },
  AddTimer {
    timer: Timer,
    callback: TimerCallback,
  },
  RemoveTimer {
    id: u64,
    reply: Option<mpsc::Sender<()>>,
  },
}

struct State {
  running: bool,
  loop_thread: Option<ThreadId>,
  /// Present while no loop owns them.
  items: Option<Items>,
  ops: Vec<Op>,
  next_socket_id: usize,
}

struct Shared {
  state: Mutex<State>,
  idle_cv: Condvar,
  signaler: Signaler,
  cancelled: AtomicBool,
}

/// Single-threaded event loop over sockets, raw fds and timers.
///
/// `Poller` handles are cloneable; any clone may add or remove items or
/// cancel the loop, while exactly one thread at a time runs
/// `poll_till_cancelled` / `poll_once`.
#[derive(Clone)]
pub struct Poller {
  shared: Arc<Shared>,
}

impl Poller {
  pub fn new() -> Result<Self, MqError> {
    Ok(Self {
      shared: Arc::new(Shared {
        state: Mutex::new(State {
          running: false,
          loop_thread: None,
          items: Some(Items {
            sockets: HashMap::new(),
            fds: HashMap::new(),
            timers: HashMap::new(),
          }),
          ops: Vec::new(),
          next_socket_id: 1,
        }),
        idle_cv: Condvar::new(),
        signaler: Signaler::new()?,
        cancelled: AtomicBool::new(false),
      }),
    })
  }

  // --- Registration ---

  /// Registers a socket; `callback` runs on the poller thread whenever
  /// the socket is readable. The poller owns the socket until it is
  /// removed.
  pub fn add_socket(
    &self,
    socket: Socket,
    callback: impl FnMut(&mut Socket) + Send + 'static,
  ) -> SocketId {
    let mut state = self.shared.state.lock();
    let id = state.next_socket_id;
    state.next_socket_id += 1;
    let op = Op::AddSocket {
      id,
      socket: Box::new(socket),
      callback: Box::new(callback),
    };
    self.push_op(&mut state, op);
    SocketId(id)
  }

  /// Removes a socket, handing it back. Returns `None` if the id is
  /// unknown, or when called from inside a poller callback (the removal
  /// is then applied right after the current iteration, and the socket
  /// is dropped).
  pub fn remove_socket(&self, id: SocketId) -> Option<Socket> {
    let mut state = self.shared.state.lock();
    if !state.running {
      self.apply_ops_locked(&mut state);
      return state
        .items
        .as_mut()
        .and_then(|items| items.sockets.remove(&id.0))
        .map(|(socket, _)| socket);
    }
    if state.loop_thread == Some(std::thread::current().id()) {
      self.push_op(
        &mut state,
        Op::RemoveSocket { id: id.0, reply: None },
      );
      return None;
    }
    let (tx, rx) = mpsc::channel();
    self.push_op(
      &mut state,
      Op::RemoveSocket {
        id: id.0,
        reply: Some(tx),
      },
    );
    drop(state);
    rx.recv().ok().flatten()
  }

  /// Registers a raw OS fd; `callback` runs when it polls readable.
  pub fn add_pollin_fd(&self, fd: RawFd, callback: impl FnMut() + Send + 'static) {
    let mut state = self.shared.state.lock();
    self.push_op(
      &mut state,
      Op::AddFd {
        fd,
        callback: Box::new(callback),
      },
    );
  }

  pub fn remove_pollin_fd(&self, fd: RawFd) {
    let mut state = self.shared.state.lock();
    if !state.running {
      self.apply_ops_locked(&mut state);
      if let Some(items) = state.items.as_mut() {
        items.fds.remove(&fd);
      }
      return;
    }
    if state.loop_thread == Some(std::thread::current().id()) {
      self.push_op(&mut state, Op::RemoveFd { fd, reply: None });
      return;
    }
    let (tx, rx) = mpsc::channel();
    self.push_op(&mut state, Op::RemoveFd { fd, reply: Some(tx) });
    drop(state);
    let _ = rx.recv();
  }

  /// Registers a timer with its callback. The timer arms when applied.
  pub fn add_timer(&self, timer: &Timer, callback: impl FnMut() + Send + 'static) {
    let mut state = self.shared.state.lock();
    self.push_op(
      &mut state,
      Op::AddTimer {
        timer: timer.clone(),
        callback: Box::new(callback),
      },
    );
  }

  pub fn remove_timer(&self, timer: &Timer) {
    let mut state = self.shared.state.lock();
    if !state.running {
      self.apply_ops_locked(&mut state);
      if let Some(items) = state.items.as_mut() {
        items.timers.remove(&timer.inner.id);
      }
      return;
    }
    if state.loop_thread == Some(std::thread::current().id()) {
      self.push_op(
        &mut state,
        Op::RemoveTimer {
          id: timer.inner.id,
          reply: None,
        },
      );
      return;
    }
    let (tx, rx) = mpsc::channel();
    self.push_op(
      &mut state,
      Op::RemoveTimer {
        id: timer.inner.id,
        reply: Some(tx),
      },
    );
    drop(state);
    let _ = rx.recv();
  }

  fn push_op(&self, state: &mut State, op: Op) {
    state.ops.push(op);
    if state.running {
      self.shared.signaler.send();
    } else {
      self.apply_ops_locked(state);
    }
  }

  fn apply_ops_locked(&self, state: &mut State) {
    if state.items.is_none() {
      return;
    }
    let ops = std::mem::take(&mut state.ops);
    let items = state.items.as_mut().expect("items present");
    Self::apply_ops(items, ops);
  }

  fn apply_ops(items: &mut Items, ops: Vec<Op>) {
    for op in ops {
      match op {
        Op::AddSocket { id, socket, callback } => {
          items.sockets.insert(id, (*socket, callback));
        }
        Op::RemoveSocket { id, reply } => {
          let removed = items.sockets.remove(&id).map(|(socket, _)| socket);
          if let Some(reply) = reply {
            let _ = reply.send(removed);
          }
        }
        Op::AddFd { fd, callback } => {
          items.fds.insert(fd, callback);
        }
        Op::RemoveFd { fd, reply } => {
          items.fds.remove(&fd);
          if let Some(reply) = reply {
            let _ = reply.send(());
          }
        }
        Op::AddTimer { timer, callback } => {
          timer.arm_if_unarmed();
          items.timers.insert(timer.inner.id, (timer, callback));
        }
        Op::RemoveTimer { id, reply } => {
          items.timers.remove(&id);
          if let Some(reply) = reply {
            let _ = reply.send(());
          }
        }
      }
    }
  }

  /// True when a removal for this item is already queued; used so a
  /// callback-initiated remove suppresses later callbacks in the same
  /// iteration.
  fn removal_pending_socket(&self, id: usize) -> bool {
    let state = self.shared.state.lock();
    state
      .ops
      .iter()
      .any(|op| matches!(op, Op::RemoveSocket { id: rid, .. } if *rid == id))
  }

  fn removal_pending_fd(&self, fd: RawFd) -> bool {
    let state = self.shared.state.lock();
    state.ops.iter().any(|op| matches!(op, Op::RemoveFd { fd: rfd, .. } if *rfd == fd))
  }

  // --- Loop ---

  /// Runs iterations until `cancel` is called. Callbacks run serialized
  /// on this thread.
  pub fn poll_till_cancelled(&self) -> Result<(), MqError> {
    let mut items = self.begin_loop()?;
    let mut result = Ok(());
    while !self.shared.cancelled.load(Ordering::Acquire) {
      {
        let mut state = self.shared.state.lock();
        let ops = std::mem::take(&mut state.ops);
        drop(state);
        Self::apply_ops(&mut items, ops);
      }
      if self.shared.cancelled.load(Ordering::Acquire) {
        break;
      }
      if let Err(e) = self.run_iteration(&mut items, POLL_TIMEOUT) {
        result = Err(e);
        break;
      }
    }
    self.end_loop(items);
    result
  }

  /// Runs exactly one iteration, waiting at most `POLL_TIMEOUT`.
  pub fn poll_once(&self) -> Result<(), MqError> {
    let mut items = self.begin_loop()?;
    {
      let mut state = self.shared.state.lock();
      let ops = std::mem::take(&mut state.ops);
      drop(state);
      Self::apply_ops(&mut items, ops);
    }
    let result = self.run_iteration(&mut items, POLL_TIMEOUT);
    self.end_loop(items);
    result
  }

  /// Asks the loop to stop at the next iteration boundary; in-flight
  /// callbacks complete.
  pub fn cancel(&self) {
    self.shared.cancelled.store(true, Ordering::Release);
    self.shared.signaler.send();
  }

  /// Cancels and waits until the loop has actually exited.
  pub fn cancel_and_join(&self) {
    self.cancel();
    let mut state = self.shared.state.lock();
    while state.running {
      self.shared.idle_cv.wait(&mut state);
    }
  }

  fn begin_loop(&self) -> Result<Items, MqError> {
    let mut state = self.shared.state.lock();
    if state.running {
      return Err(MqError::Fault("poller is already being driven".into()));
    }
    state.running = true;
    state.loop_thread = Some(std::thread::current().id());
    Ok(state.items.take().ok_or_else(|| MqError::Fault("poller items missing".into()))?)
  }

  fn end_loop(&self, mut items: Items) {
    let mut state = self.shared.state.lock();
    let ops = std::mem::take(&mut state.ops);
    Self::apply_ops(&mut items, ops);
    state.items = Some(items);
    state.running = false;
    state.loop_thread = None;
    self.shared.cancelled.store(false, Ordering::Release);
    self.shared.idle_cv.notify_all();
  }

  fn run_iteration(&self, items: &mut Items, max_wait: Duration) -> Result<(), MqError> {
    let now = Instant::now();

    // Timeout: zero when anything is already actionable, else until the
    // nearest timer, capped at max_wait.
    let next_due = items
      .timers
      .values()
      .filter_map(|(timer, _)| timer.due_at())
      .min();
    let mut timeout = match next_due {
      Some(due) if due <= now => Duration::ZERO,
      Some(due) => (due - now).min(max_wait),
      None => max_wait,
    };
    for (socket, _) in items.sockets.values_mut() {
      if matches!(socket.events(), Ok(ev) if ev & POLL_IN != 0) {
        timeout = Duration::ZERO;
        break;
      }
    }

    // Wait on the wake signaler, every socket mailbox and every raw fd.
    let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(1 + items.sockets.len() + items.fds.len());
    pollfds.push(libc::pollfd {
      fd: self.shared.signaler.fd(),
      events: libc::POLLIN,
      revents: 0,
    });
    let socket_ids: Vec<usize> = items.sockets.keys().copied().collect();
    for id in &socket_ids {
      pollfds.push(libc::pollfd {
        fd: items.sockets[id].0.mailbox_fd(),
        events: libc::POLLIN,
        revents: 0,
      });
    }
    let fd_ids: Vec<RawFd> = items.fds.keys().copied().collect();
    for fd in &fd_ids {
      pollfds.push(libc::pollfd {
        fd: *fd,
        events: libc::POLLIN,
        revents: 0,
      });
    }

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let rc = loop {
      let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
      if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
          continue;
        }
        return Err(MqError::Fault(format!("poller poll failed: {err}")));
      }
      break rc;
    };

    if rc > 0 && pollfds[0].revents & libc::POLLIN != 0 {
      self.shared.signaler.recv();
    }

    // Timers first.
    let now = Instant::now();
    let due_timers: Vec<u64> = items
      .timers
      .iter()
      .filter(|(_, (timer, _))| matches!(timer.due_at(), Some(due) if due <= now))
      .map(|(&id, _)| id)
      .collect();
    for id in due_timers {
      if let Some((timer, callback)) = items.timers.get_mut(&id) {
        let timer = timer.clone();
        callback();
        timer.fired();
      }
    }

    // Then sockets that are readable.
    for id in socket_ids {
      if self.removal_pending_socket(id) {
        continue;
      }
      if let Some((socket, callback)) = items.sockets.get_mut(&id) {
        if matches!(socket.events(), Ok(ev) if ev & POLL_IN != 0) {
          callback(socket);
        }
      }
    }

    // Then raw fds that polled readable.
    if rc > 0 {
      for (i, fd) in fd_ids.iter().enumerate() {
        let pfd = &pollfds[1 + items.sockets.len() + i];
        if pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) == 0 {
          continue;
        }
        if self.removal_pending_fd(*fd) {
          continue;
        }
        if let Some(callback) = items.fds.get_mut(fd) {
          callback();
        }
      }
    }
    Ok(())
  }
}

impl std::fmt::Debug for Poller {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Poller").finish()
  }
}
