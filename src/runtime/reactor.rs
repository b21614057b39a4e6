use crate::error::MqError;
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token identifying the object an fd or timer belongs to.
pub(crate) type Token = usize;

#[derive(Debug, Clone, Copy)]
struct FdEntry {
  fd: RawFd,
  token: Token,
  pollin: bool,
  pollout: bool,
}

/// A timer that fired; delivered before fd events of the same iteration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FiredTimer {
  pub token: Token,
  pub timer_id: u64,
}

/// An fd that became ready.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadyFd {
  pub handle: usize,
  pub token: Token,
  pub readable: bool,
  pub writable: bool,
  pub error: bool,
}

/// `poll(2)`-based readiness core shared by the I/O threads, the reaper
/// and the user-facing poller.
///
/// Readiness is *returned* from `wait` as a list of events rather than
/// delivered through callbacks, so callers apply handler-set mutations
/// between iterations without reentrancy hazards.
pub(crate) struct Reactor {
  entries: Vec<Option<FdEntry>>,
  free_handles: Vec<usize>,
  timers: BTreeMap<(Instant, u64), (Token, u64)>,
  timer_seq: u64,
  load: Arc<AtomicUsize>,
}

impl Reactor {
  pub fn new() -> Self {
    Self {
      entries: Vec::new(),
      free_handles: Vec::new(),
      timers: BTreeMap::new(),
      timer_seq: 0,
      load: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// Shared view of the number of registered fds, used by the context to
  /// pick the least loaded I/O thread.
  pub fn load_handle(&self) -> Arc<AtomicUsize> {
    Arc::clone(&self.load)
  }

  pub fn add_fd(&mut self, fd: RawFd, token: Token) -> usize {
    let entry = FdEntry {
      fd,
      token,
      pollin: false,
      pollout: false,
    };
    self.load.fetch_add(1, Ordering::Relaxed);
    if let Some(handle) = self.free_handles.pop() {
      self.entries[handle] = Some(entry);
      handle
    } else {
      self.entries.push(Some(entry));
      self.entries.len() - 1
    }
  }

  pub fn remove_fd(&mut self, handle: usize) {
    if let Some(slot) = self.entries.get_mut(handle) {
      if slot.take().is_some() {
        self.load.fetch_sub(1, Ordering::Relaxed);
        self.free_handles.push(handle);
      }
    }
  }

  pub fn set_pollin(&mut self, handle: usize) {
    if let Some(Some(e)) = self.entries.get_mut(handle) {
      e.pollin = true;
    }
  }

  pub fn reset_pollin(&mut self, handle: usize) {
    if let Some(Some(e)) = self.entries.get_mut(handle) {
      e.pollin = false;
    }
  }

  pub fn set_pollout(&mut self, handle: usize) {
    if let Some(Some(e)) = self.entries.get_mut(handle) {
      e.pollout = true;
    }
  }

  pub fn reset_pollout(&mut self, handle: usize) {
    if let Some(Some(e)) = self.entries.get_mut(handle) {
      e.pollout = false;
    }
  }

  /// Arms a timer owned by `token`, firing once after `after`.
  pub fn add_timer(&mut self, after: Duration, token: Token, timer_id: u64) {
    self.timer_seq += 1;
    let seq = self.timer_seq;
    self.timers.insert((Instant::now() + after, seq), (token, timer_id));
  }

  /// Cancels all timers with the given owner and id.
  pub fn cancel_timer(&mut self, token: Token, timer_id: u64) {
    self.timers.retain(|_, v| *v != (token, timer_id));
  }

  fn next_timeout(&self, cap: Option<Duration>) -> Option<Duration> {
    let timer_wait = self.timers.keys().next().map(|(due, _)| {
      due.saturating_duration_since(Instant::now())
    });
    match (timer_wait, cap) {
      (Some(t), Some(c)) => Some(t.min(c)),
      (Some(t), None) => Some(t),
      (None, cap) => cap,
    }
  }

  /// Blocks until a timer is due or an fd becomes ready, up to `cap`
  /// (`None` = no cap beyond the nearest timer). Due timers are returned
  /// first and must be dispatched before fd events.
  pub fn wait(&mut self, cap: Option<Duration>) -> Result<(Vec<FiredTimer>, Vec<ReadyFd>), MqError> {
    let timeout = self.next_timeout(cap);
    let timeout_ms: libc::c_int = match timeout {
      None => -1,
      Some(t) => {
        // Round up so a sub-millisecond deadline doesn't spin hot.
        let ms = t.as_millis().min(i32::MAX as u128 - 1) as libc::c_int;
        if t > Duration::from_millis(ms as u64) {
          ms + 1
        } else {
          ms
        }
      }
    };

    // Build the pollfd set; remember which handle each slot maps to.
    let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(self.entries.len());
    let mut handles: Vec<usize> = Vec::with_capacity(self.entries.len());
    for (handle, slot) in self.entries.iter().enumerate() {
      if let Some(e) = slot {
        let mut events: libc::c_short = 0;
        if e.pollin {
          events |= libc::POLLIN;
        }
        if e.pollout {
          events |= libc::POLLOUT;
        }
        pollfds.push(libc::pollfd {
          fd: e.fd,
          events,
          revents: 0,
        });
        handles.push(handle);
      }
    }

    let rc = loop {
      let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
      if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
          continue;
        }
        return Err(MqError::Fault(format!("poll failed: {err}")));
      }
      break rc;
    };

    // Timers first: collect everything due by now.
    let now = Instant::now();
    let mut fired = Vec::new();
    loop {
      let next = self.timers.iter().next().map(|(&key, &value)| (key, value));
      match next {
        Some(((due, seq), (token, timer_id))) if due <= now => {
          self.timers.remove(&(due, seq));
          fired.push(FiredTimer { token, timer_id });
        }
        _ => break,
      }
    }

    let mut ready = Vec::new();
    if rc > 0 {
      for (i, pfd) in pollfds.iter().enumerate() {
        if pfd.revents == 0 {
          continue;
        }
        let handle = handles[i];
        // A peer hangup still needs a read to observe EOF.
        let readable = pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0;
        let writable = pfd.revents & libc::POLLOUT != 0;
        let error = pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0;
        if let Some(Some(e)) = self.entries.get(handle) {
          ready.push(ReadyFd {
            handle,
            token: e.token,
            readable,
            writable,
            error,
          });
        }
      }
    }
    Ok((fired, ready))
  }
}

impl std::fmt::Debug for Reactor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Reactor")
      .field("fds", &self.load.load(Ordering::Relaxed))
      .field("timers", &self.timers.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::signaler::Signaler;

  #[test]
  fn fd_readiness_is_reported() {
    let sig = Signaler::new().unwrap();
    let mut reactor = Reactor::new();
    let h = reactor.add_fd(sig.fd(), 7);
    reactor.set_pollin(h);
    sig.send();
    let (timers, ready) = reactor.wait(Some(Duration::from_millis(100))).unwrap();
    assert!(timers.is_empty());
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].token, 7);
    assert!(ready[0].readable);
  }

  #[test]
  fn timers_fire_before_fd_events_and_never_early() {
    let sig = Signaler::new().unwrap();
    let mut reactor = Reactor::new();
    let h = reactor.add_fd(sig.fd(), 1);
    reactor.set_pollin(h);
    let start = Instant::now();
    reactor.add_timer(Duration::from_millis(30), 2, 99);
    sig.send();
    // First wait: fd is ready immediately, timer not yet due.
    let (timers, ready) = reactor.wait(Some(Duration::from_millis(5))).unwrap();
    assert!(timers.is_empty());
    assert_eq!(ready.len(), 1);
    sig.recv();
    // Second wait: nothing readable, timer fires at or after its schedule.
    let (timers, _) = reactor.wait(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].timer_id, 99);
    assert!(start.elapsed() >= Duration::from_millis(30));
  }

  #[test]
  fn cancelled_timer_does_not_fire() {
    let mut reactor = Reactor::new();
    reactor.add_timer(Duration::from_millis(10), 3, 5);
    reactor.cancel_timer(3, 5);
    let (timers, _) = reactor.wait(Some(Duration::from_millis(30))).unwrap();
    assert!(timers.is_empty());
  }
}
