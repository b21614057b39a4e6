use crate::error::MqError;
use crate::runtime::command::Command;
use crate::runtime::signaler::Signaler;
use crate::runtime::ypipe::YPipe;
use parking_lot::Mutex;
use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// MPSC command queue with a pollable readiness primitive.
///
/// Writers are serialized by a mutex onto a single SPSC `YPipe`; the
/// signaler is posted only when a flush observes the reader asleep, so the
/// fd becomes readable exactly when the queue transitions from empty to
/// non-empty. The reader tracks its own awake/asleep state in `active`.
///
/// Safety: there is exactly one reader at a time. Sockets enforce this by
/// single-threaded ownership of the `SocketBase`; threads (I/O, reaper)
/// each drain only their own slot's mailbox.
pub(crate) struct Mailbox {
  queue: YPipe<Command>,
  sync: Mutex<()>,
  signaler: Signaler,
  active: Cell<bool>,
}

unsafe impl Sync for Mailbox {}

impl Mailbox {
  pub fn new() -> Result<Self, MqError> {
    Ok(Self {
      queue: YPipe::new(),
      sync: Mutex::new(()),
      signaler: Signaler::new()?,
      active: Cell::new(false),
    })
  }

  /// The fd a reactor can poll to learn the mailbox became non-empty.
  pub fn fd(&self) -> RawFd {
    self.signaler.fd()
  }

  /// Enqueues a command, waking the reader if it was asleep.
  pub fn send(&self, cmd: Command) {
    let _guard = self.sync.lock();
    self.queue.write(cmd, false);
    let reader_awake = self.queue.flush();
    drop(_guard);
    if !reader_awake {
      self.signaler.send();
    }
  }

  /// Pops the oldest command without blocking.
  pub fn try_recv(&self) -> Result<Command, MqError> {
    if self.active.get() {
      if let Some(cmd) = self.queue.read() {
        return Ok(cmd);
      }
      self.active.set(false);
    }
    // The reader is parked; a pending signal means new commands were
    // flushed since.
    match self.signaler.wait(Some(Duration::ZERO)) {
      Ok(()) => {
        self.signaler.recv();
        self.active.set(true);
        match self.queue.read() {
          Some(cmd) => Ok(cmd),
          None => {
            self.active.set(false);
            Err(MqError::Again)
          }
        }
      }
      Err(MqError::Again) => Err(MqError::Again),
      Err(e) => Err(e),
    }
  }

  /// Pops the oldest command, blocking up to `timeout` (`None` = forever).
  pub fn recv(&self, timeout: Option<Duration>) -> Result<Command, MqError> {
    if self.active.get() {
      if let Some(cmd) = self.queue.read() {
        return Ok(cmd);
      }
      self.active.set(false);
    }
    loop {
      self.signaler.wait(timeout)?;
      self.signaler.recv();
      self.active.set(true);
      if let Some(cmd) = self.queue.read() {
        return Ok(cmd);
      }
      self.active.set(false);
    }
  }
}

impl std::fmt::Debug for Mailbox {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mailbox").field("fd", &self.fd()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::command::{CmdAddr, CmdTarget, CommandKind};

  fn stop_cmd() -> Command {
    Command {
      dest: CmdAddr {
        tid: 0,
        target: CmdTarget::Own,
      },
      kind: CommandKind::Stop,
    }
  }

  #[test]
  fn send_then_recv() {
    let mb = Mailbox::new().unwrap();
    mb.send(stop_cmd());
    let cmd = mb.recv(Some(Duration::from_millis(100))).unwrap();
    assert_eq!(cmd.variant_name(), "Stop");
  }

  #[test]
  fn recv_times_out_on_empty() {
    let mb = Mailbox::new().unwrap();
    match mb.recv(Some(Duration::from_millis(10))) {
      Err(MqError::Again) => {}
      other => panic!("expected Again, got {other:?}"),
    }
  }

  #[test]
  fn fifo_order_from_single_sender() {
    let mb = Mailbox::new().unwrap();
    for _ in 0..3 {
      mb.send(stop_cmd());
    }
    for _ in 0..3 {
      mb.try_recv().unwrap();
    }
    assert!(mb.try_recv().is_err());
  }

  #[test]
  fn cross_thread_delivery() {
    let mb = std::sync::Arc::new(Mailbox::new().unwrap());
    let sender = {
      let mb = std::sync::Arc::clone(&mb);
      std::thread::spawn(move || {
        for _ in 0..1000 {
          mb.send(stop_cmd());
        }
      })
    };
    let mut got = 0;
    while got < 1000 {
      if mb.recv(Some(Duration::from_secs(2))).is_ok() {
        got += 1;
      }
    }
    sender.join().unwrap();
  }
}
