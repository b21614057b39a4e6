use crate::error::MqError;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// The readiness primitive behind a mailbox: an fd that becomes readable
/// when the owning mailbox transitions from empty to non-empty.
///
/// Reactors wait on the raw fd together with transport fds, which is what
/// lets a single thread drive many mailboxes and sockets at once.
#[derive(Debug)]
pub(crate) struct Signaler {
  #[cfg(target_os = "linux")]
  fd: RawFd,
  #[cfg(not(target_os = "linux"))]
  read_fd: RawFd,
  #[cfg(not(target_os = "linux"))]
  write_fd: RawFd,
}

impl Signaler {
  #[cfg(target_os = "linux")]
  pub fn new() -> Result<Self, MqError> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
      return Err(MqError::Io(io::Error::last_os_error()));
    }
    Ok(Self { fd })
  }

  #[cfg(not(target_os = "linux"))]
  pub fn new() -> Result<Self, MqError> {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    if rc != 0 {
      return Err(MqError::Io(io::Error::last_os_error()));
    }
    for fd in fds {
      unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
      }
    }
    Ok(Self {
      read_fd: fds[0],
      write_fd: fds[1],
    })
  }

  /// The fd a reactor can poll for readability.
  pub fn fd(&self) -> RawFd {
    #[cfg(target_os = "linux")]
    {
      self.fd
    }
    #[cfg(not(target_os = "linux"))]
    {
      self.read_fd
    }
  }

  /// Posts one wake-up token. Called by mailbox writers with the sync
  /// mutex held, so there is at most one concurrent sender.
  pub fn send(&self) {
    #[cfg(target_os = "linux")]
    let rc = {
      let inc: u64 = 1;
      unsafe { libc::write(self.fd, &inc as *const u64 as *const _, 8) }
    };
    #[cfg(not(target_os = "linux"))]
    let rc = {
      let b: u8 = 1;
      unsafe { libc::write(self.write_fd, &b as *const u8 as *const _, 1) }
    };
    debug_assert!(rc > 0, "signaler write failed: {}", io::Error::last_os_error());
  }

  /// Consumes pending wake-up tokens. A no-op when none are pending.
  pub fn recv(&self) {
    #[cfg(target_os = "linux")]
    {
      let mut buf: u64 = 0;
      unsafe { libc::read(self.fd, &mut buf as *mut u64 as *mut _, 8) };
    }
    #[cfg(not(target_os = "linux"))]
    {
      let mut buf = [0u8; 16];
      unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
    }
  }

  /// Blocks until the signaler becomes readable or the timeout elapses.
  ///
  /// `None` waits forever. Returns `Err(MqError::Again)` on timeout.
  pub fn wait(&self, timeout: Option<Duration>) -> Result<(), MqError> {
    let mut pfd = libc::pollfd {
      fd: self.fd(),
      events: libc::POLLIN,
      revents: 0,
    };
    let timeout_ms: libc::c_int = match timeout {
      None => -1,
      Some(t) => t.as_millis().min(i32::MAX as u128) as libc::c_int,
    };
    loop {
      let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
      if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
          continue;
        }
        return Err(MqError::Fault(format!("signaler poll failed: {err}")));
      }
      if rc == 0 {
        return Err(MqError::Again);
      }
      return Ok(());
    }
  }
}

impl Drop for Signaler {
  fn drop(&mut self) {
    #[cfg(target_os = "linux")]
    unsafe {
      libc::close(self.fd);
    }
    #[cfg(not(target_os = "linux"))]
    unsafe {
      libc::close(self.read_fd);
      libc::close(self.write_fd);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signal_then_wait_returns_immediately() {
    let s = Signaler::new().unwrap();
    s.send();
    s.wait(Some(Duration::from_millis(100))).unwrap();
    s.recv();
  }

  #[test]
  fn wait_times_out_when_unsignaled() {
    let s = Signaler::new().unwrap();
    match s.wait(Some(Duration::from_millis(10))) {
      Err(MqError::Again) => {}
      other => panic!("expected timeout, got {other:?}"),
    }
  }
}
