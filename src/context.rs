use crate::error::MqError;
use crate::runtime::command::{CmdAddr, CmdTarget, Command, CommandKind, Tid};
use crate::runtime::io_thread::IoThread;
use crate::runtime::mailbox::Mailbox;
use crate::runtime::reaper::Reaper;
use crate::socket::core::SocketBase;
use crate::socket::options::SocketOptions;
use crate::socket::types::{Socket, SocketType};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Slot of the terminator mailbox `Context::term` waits on.
pub(crate) const TERM_TID: Tid = 0;
/// Slot of the reaper thread.
pub(crate) const REAPER_TID: Tid = 1;

const DEFAULT_IO_THREADS: usize = 1;
const DEFAULT_MAX_SOCKETS: usize = 1023;

/// What an in-process connector needs to know about a bound socket.
#[derive(Debug, Clone)]
pub(crate) struct InprocEntry {
  pub tid: Tid,
  pub options: SocketOptions,
}

/// A connect that arrived before the matching inproc bind. The bind
/// adopts it by building the pipe pair and mailing one end back.
#[derive(Debug, Clone)]
pub(crate) struct PendingConnect {
  pub tid: Tid,
  pub options: SocketOptions,
}

struct SlotState {
  started: bool,
  empty_slots: Vec<Tid>,
  socket_tids: Vec<Tid>,
}

struct IoThreadHandle {
  tid: Tid,
  load: Arc<AtomicUsize>,
  join: Option<JoinHandle<()>>,
}

/// Process-wide state shared by all `Context` handles.
pub(crate) struct CtxInner {
  /// Mailbox table indexed by slot (tid). Readable on the hot command
  /// path; written only during socket creation/destruction.
  slots: RwLock<Vec<Option<Arc<Mailbox>>>>,
  term_mailbox: Arc<Mailbox>,
  slot_sync: Mutex<SlotState>,
  io_threads: Mutex<Vec<IoThreadHandle>>,
  reaper_join: Mutex<Option<JoinHandle<()>>>,
  terminating: AtomicBool,
  terminated: AtomicBool,
  /// Monotonic id source for pipes, sessions, listeners and timers.
  next_obj_id: AtomicUsize,
  /// Monotonic socket-id counter, independent of slot reuse.
  next_socket_id: AtomicUsize,
  /// In-process endpoint directory plus connects waiting for their bind.
  endpoints: Mutex<HashMap<String, InprocEntry>>,
  pending_connects: Mutex<HashMap<String, Vec<PendingConnect>>>,
  opts: Mutex<CtxConfig>,
}

#[derive(Debug, Clone, Copy)]
struct CtxConfig {
  io_threads: usize,
  max_sockets: usize,
}

impl CtxInner {
  fn new() -> Result<Arc<Self>, MqError> {
    Ok(Arc::new(Self {
      slots: RwLock::new(Vec::new()),
      term_mailbox: Arc::new(Mailbox::new()?),
      slot_sync: Mutex::new(SlotState {
        started: false,
        empty_slots: Vec::new(),
        socket_tids: Vec::new(),
      }),
      io_threads: Mutex::new(Vec::new()),
      reaper_join: Mutex::new(None),
      terminating: AtomicBool::new(false),
      terminated: AtomicBool::new(false),
      next_obj_id: AtomicUsize::new(1),
      next_socket_id: AtomicUsize::new(0),
      endpoints: Mutex::new(HashMap::new()),
      pending_connects: Mutex::new(HashMap::new()),
      opts: Mutex::new(CtxConfig {
        io_threads: DEFAULT_IO_THREADS,
        max_sockets: DEFAULT_MAX_SOCKETS,
      }),
    }))
  }

  pub(crate) fn next_object_id(&self) -> usize {
    self.next_obj_id.fetch_add(1, Ordering::Relaxed)
  }

  pub(crate) fn is_terminating(&self) -> bool {
    self.terminating.load(Ordering::Acquire)
  }

  /// Routes a command to its destination slot. Sending to a freed slot is
  /// a silent drop; the terminator collects whatever is left.
  pub(crate) fn send_cmd(&self, cmd: Command) {
    let slots = self.slots.read();
    match slots.get(cmd.dest.tid as usize) {
      Some(Some(mailbox)) => mailbox.send(cmd),
      _ => {
        tracing::trace!(tid = cmd.dest.tid, cmd = cmd.variant_name(), "command dropped: slot is gone");
      }
    }
  }

  /// Picks the I/O thread with the fewest registered fds.
  pub(crate) fn choose_io_thread(&self) -> Result<Tid, MqError> {
    let threads = self.io_threads.lock();
    threads
      .iter()
      .min_by_key(|h| h.load.load(Ordering::Relaxed))
      .map(|h| h.tid)
      .ok_or(MqError::Unsupported("context has no I/O threads"))
  }

  // --- Inproc endpoint directory ---

  pub(crate) fn register_endpoint(&self, addr: &str, entry: InprocEntry) -> Result<(), MqError> {
    let mut endpoints = self.endpoints.lock();
    if endpoints.contains_key(addr) {
      return Err(MqError::AddrInUse(format!("inproc://{addr}")));
    }
    endpoints.insert(addr.to_string(), entry);
    Ok(())
  }

  pub(crate) fn unregister_endpoint(&self, addr: &str, tid: Tid) -> bool {
    let mut endpoints = self.endpoints.lock();
    if endpoints.get(addr).map(|e| e.tid) == Some(tid) {
      endpoints.remove(addr);
      true
    } else {
      false
    }
  }

  /// Removes all inproc registrations owned by a terminating socket.
  pub(crate) fn unregister_endpoints_for(&self, tid: Tid) {
    self.endpoints.lock().retain(|_, e| e.tid != tid);
  }

  pub(crate) fn find_endpoint(&self, addr: &str) -> Option<InprocEntry> {
    self.endpoints.lock().get(addr).cloned()
  }

  pub(crate) fn pend_connect(&self, addr: &str, pending: PendingConnect) {
    self
      .pending_connects
      .lock()
      .entry(addr.to_string())
      .or_default()
      .push(pending);
  }

  pub(crate) fn take_pending_connects(&self, addr: &str) -> Vec<PendingConnect> {
    self.pending_connects.lock().remove(addr).unwrap_or_default()
  }

  /// Forgets parked connects from a socket that is closing.
  pub(crate) fn drop_pending_connects_for(&self, tid: Tid) {
    let mut pending = self.pending_connects.lock();
    pending.retain(|_, list| {
      list.retain(|p| p.tid != tid);
      !list.is_empty()
    });
  }

  /// Frees a socket's slot once the reaper finished with it.
  pub(crate) fn destroy_socket(&self, tid: Tid) {
    let mut state = self.slot_sync.lock();
    self.slots.write()[tid as usize] = None;
    state.socket_tids.retain(|&t| t != tid);
    state.empty_slots.push(tid);
    tracing::debug!(tid, "socket slot freed");
    if self.is_terminating() && state.socket_tids.is_empty() {
      self.send_cmd(Command {
        dest: CmdAddr {
          tid: REAPER_TID,
          target: CmdTarget::Own,
        },
        kind: CommandKind::Stop,
      });
    }
  }

  /// Spins up the slot table, reaper and I/O thread pool. Called under
  /// `slot_sync` on first socket creation.
  fn start(self: &Arc<Self>, state: &mut SlotState) -> Result<(), MqError> {
    let config = *self.opts.lock();
    let slot_count = 2 + config.io_threads + config.max_sockets;
    {
      let mut slots = self.slots.write();
      slots.resize(slot_count, None);
      slots[TERM_TID as usize] = Some(Arc::clone(&self.term_mailbox));
    }

    // Reaper in slot 1.
    let reaper_mailbox = Arc::new(Mailbox::new()?);
    self.slots.write()[REAPER_TID as usize] = Some(Arc::clone(&reaper_mailbox));
    let reaper = Reaper::new(Arc::clone(self), REAPER_TID, reaper_mailbox)?;
    *self.reaper_join.lock() = Some(
      std::thread::Builder::new()
        .name("coremq-reaper".into())
        .spawn(move || reaper.run())
        .map_err(MqError::Io)?,
    );

    // I/O threads in slots 2..2+n.
    let mut handles = self.io_threads.lock();
    for i in 0..config.io_threads {
      let tid = 2 + i as Tid;
      let mailbox = Arc::new(Mailbox::new()?);
      self.slots.write()[tid as usize] = Some(Arc::clone(&mailbox));
      let io_thread = IoThread::new(Arc::clone(self), tid, mailbox)?;
      let load = io_thread.load_handle();
      let join = std::thread::Builder::new()
        .name(format!("coremq-io-{i}"))
        .spawn(move || io_thread.run())
        .map_err(MqError::Io)?;
      handles.push(IoThreadHandle {
        tid,
        load,
        join: Some(join),
      });
    }

    // Remaining slots are for sockets; hand them out from the low end.
    for tid in (2 + config.io_threads as Tid)..(slot_count as Tid) {
      state.empty_slots.push(tid);
    }
    state.empty_slots.reverse();
    state.started = true;
    tracing::debug!(io_threads = config.io_threads, max_sockets = config.max_sockets, "context started");
    Ok(())
  }
}

impl std::fmt::Debug for CtxInner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CtxInner")
      .field("terminating", &self.terminating.load(Ordering::Relaxed))
      .finish()
  }
}

/// The entry point of the library: creates sockets, owns the I/O thread
/// pool and the reaper, and tears everything down on `term`.
///
/// `Context` handles are cheaply cloneable and shareable across threads.
#[derive(Clone, Debug)]
pub struct Context {
  inner: Arc<CtxInner>,
}

impl Context {
  pub fn new() -> Result<Self, MqError> {
    Ok(Self {
      inner: CtxInner::new()?,
    })
  }

  /// Sets the number of I/O threads. Only effective before the first
  /// socket is created.
  pub fn set_io_threads(&self, n: usize) -> Result<(), MqError> {
    let state = self.inner.slot_sync.lock();
    if state.started {
      return Err(MqError::Fault("context already started".into()));
    }
    self.inner.opts.lock().io_threads = n;
    Ok(())
  }

  /// Caps the number of concurrently open sockets. Only effective before
  /// the first socket is created.
  pub fn set_max_sockets(&self, n: usize) -> Result<(), MqError> {
    let state = self.inner.slot_sync.lock();
    if state.started {
      return Err(MqError::Fault("context already started".into()));
    }
    self.inner.opts.lock().max_sockets = n.max(1);
    Ok(())
  }

  /// Creates a socket of the given type.
  pub fn socket(&self, socket_type: SocketType) -> Result<Socket, MqError> {
    let inner = &self.inner;
    if inner.is_terminating() {
      return Err(MqError::Terminating);
    }
    let mut state = inner.slot_sync.lock();
    if !state.started {
      inner.start(&mut state)?;
    }
    let tid = state.empty_slots.pop().ok_or(MqError::TooManySockets)?;
    let mailbox = Arc::new(Mailbox::new()?);
    inner.slots.write()[tid as usize] = Some(Arc::clone(&mailbox));
    state.socket_tids.push(tid);
    drop(state);

    let sid = inner.next_socket_id.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(socket_id = sid, tid, socket_type = ?socket_type, "socket created");
    let base = SocketBase::new(Arc::clone(inner), socket_type, tid, sid, mailbox);
    Ok(Socket::from_base(base))
  }

  /// Tears the context down: stops all open sockets, waits for the reaper
  /// to finalize them, then stops the I/O threads.
  ///
  /// Every socket must be closed (or dropped) for this to return.
  pub fn term(&self) -> Result<(), MqError> {
    let inner = &self.inner;
    if inner.terminated.load(Ordering::Acquire) {
      return Ok(());
    }
    {
      let state = inner.slot_sync.lock();
      if !state.started {
        inner.terminated.store(true, Ordering::Release);
        return Ok(());
      }
      let first = !inner.terminating.swap(true, Ordering::AcqRel);
      if first {
        for &tid in &state.socket_tids {
          inner.send_cmd(Command {
            dest: CmdAddr {
              tid,
              target: CmdTarget::Own,
            },
            kind: CommandKind::Stop,
          });
        }
        if state.socket_tids.is_empty() {
          inner.send_cmd(Command {
            dest: CmdAddr {
              tid: REAPER_TID,
              target: CmdTarget::Own,
            },
            kind: CommandKind::Stop,
          });
        }
      }
    }

    // Wait for the reaper to report the last socket gone.
    loop {
      let cmd = inner.term_mailbox.recv(None)?;
      if matches!(cmd.kind, CommandKind::Done) {
        break;
      }
      tracing::trace!(cmd = cmd.variant_name(), "terminator ignoring stray command");
    }

    // Stop and join the I/O threads, then the reaper.
    {
      let mut threads = inner.io_threads.lock();
      for handle in threads.iter() {
        inner.send_cmd(Command {
          dest: CmdAddr {
            tid: handle.tid,
            target: CmdTarget::Own,
          },
          kind: CommandKind::Stop,
        });
      }
      for handle in threads.iter_mut() {
        if let Some(join) = handle.join.take() {
          let _ = join.join();
        }
      }
    }
    if let Some(join) = inner.reaper_join.lock().take() {
      let _ = join.join();
    }
    inner.terminated.store(true, Ordering::Release);
    tracing::debug!("context terminated");
    Ok(())
  }

  pub(crate) fn inner(&self) -> &Arc<CtxInner> {
    &self.inner
  }
}
