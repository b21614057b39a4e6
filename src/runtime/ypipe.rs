use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Number of value slots allocated per chunk. A tuning parameter only;
/// correctness does not depend on it.
const GRANULARITY: usize = 256;

struct Chunk<T> {
  values: [MaybeUninit<T>; GRANULARITY],
  next: *mut Chunk<T>,
  prev: *mut Chunk<T>,
}

impl<T> Chunk<T> {
  fn allocate() -> *mut Chunk<T> {
    Box::into_raw(Box::new(Chunk {
      // Slots are initialized lazily as values are written.
      values: unsafe { MaybeUninit::<[MaybeUninit<T>; GRANULARITY]>::uninit().assume_init() },
      next: ptr::null_mut(),
      prev: ptr::null_mut(),
    }))
  }
}

/// A chunked FIFO of value slots. Front operations belong to the reader,
/// back operations to the writer; the only point of contact is the spare
/// chunk exchanged through an atomic so a popped chunk can be recycled by
/// the pusher without allocation.
///
/// The queue always holds one trailing "terminator" slot past the last
/// written value; `YPipe` establishes that invariant by pushing once at
/// construction and after every write.
struct YQueue<T> {
  begin_chunk: *mut Chunk<T>,
  begin_pos: usize,
  back_chunk: *mut Chunk<T>,
  back_pos: usize,
  end_chunk: *mut Chunk<T>,
  end_pos: usize,
  spare_chunk: AtomicPtr<Chunk<T>>,
}

impl<T> YQueue<T> {
  fn new() -> Self {
    let chunk = Chunk::allocate();
    Self {
      begin_chunk: chunk,
      begin_pos: 0,
      back_chunk: ptr::null_mut(),
      back_pos: 0,
      end_chunk: chunk,
      end_pos: 0,
      spare_chunk: AtomicPtr::new(ptr::null_mut()),
    }
  }

  unsafe fn front_ptr(&self) -> *mut T {
    (*self.begin_chunk).values.as_ptr().add(self.begin_pos) as *mut T
  }

  unsafe fn back_ptr(&self) -> *mut T {
    (*self.back_chunk).values.as_ptr().add(self.back_pos) as *mut T
  }

  /// Advances the back/terminator slot by one, growing the queue when the
  /// current chunk fills up. Reuses the spare chunk if one is cached.
  unsafe fn push(&mut self) {
    self.back_chunk = self.end_chunk;
    self.back_pos = self.end_pos;

    self.end_pos += 1;
    if self.end_pos != GRANULARITY {
      return;
    }

    let spare = self.spare_chunk.swap(ptr::null_mut(), Ordering::Relaxed);
    if !spare.is_null() {
      (*self.end_chunk).next = spare;
      (*spare).prev = self.end_chunk;
    } else {
      let fresh = Chunk::allocate();
      (*self.end_chunk).next = fresh;
      (*fresh).prev = self.end_chunk;
    }
    self.end_chunk = (*self.end_chunk).next;
    self.end_pos = 0;
  }

  /// Steps the back/terminator slot back by one. Only called by the writer
  /// to roll back values it has written but not yet published.
  unsafe fn unpush(&mut self) {
    if self.back_pos > 0 {
      self.back_pos -= 1;
    } else {
      self.back_pos = GRANULARITY - 1;
      self.back_chunk = (*self.back_chunk).prev;
    }
    if self.end_pos > 0 {
      self.end_pos -= 1;
    } else {
      self.end_pos = GRANULARITY - 1;
      self.end_chunk = (*self.end_chunk).prev;
      let surplus = (*self.end_chunk).next;
      (*self.end_chunk).next = ptr::null_mut();
      drop(Box::from_raw(surplus));
    }
  }

  /// Removes the front slot. The value must already have been moved out.
  unsafe fn pop(&mut self) {
    self.begin_pos += 1;
    if self.begin_pos == GRANULARITY {
      let old = self.begin_chunk;
      self.begin_chunk = (*old).next;
      (*self.begin_chunk).prev = ptr::null_mut();
      self.begin_pos = 0;
      let previous_spare = self.spare_chunk.swap(old, Ordering::Relaxed);
      if !previous_spare.is_null() {
        drop(Box::from_raw(previous_spare));
      }
    }
  }
}

impl<T> Drop for YQueue<T> {
  fn drop(&mut self) {
    unsafe {
      // Live values occupy [begin, back); the slot at back is the
      // uninitialized terminator.
      while !(self.begin_chunk == self.back_chunk && self.begin_pos == self.back_pos) {
        ptr::drop_in_place(self.front_ptr());
        self.begin_pos += 1;
        if self.begin_pos == GRANULARITY {
          let old = self.begin_chunk;
          self.begin_chunk = (*old).next;
          self.begin_pos = 0;
          drop(Box::from_raw(old));
        }
      }
      let mut chunk = self.begin_chunk;
      loop {
        let next = (*chunk).next;
        let last = chunk == self.end_chunk;
        drop(Box::from_raw(chunk));
        if last {
          break;
        }
        chunk = next;
      }
      let spare = self.spare_chunk.swap(ptr::null_mut(), Ordering::Relaxed);
      if !spare.is_null() {
        drop(Box::from_raw(spare));
      }
    }
  }
}

/// Lock-free single-producer/single-consumer pipe with batched writes.
///
/// The writer appends with `write` and publishes batches with `flush`; the
/// reader observes published values with `check_read`/`read`. When the
/// reader drains the pipe it atomically marks itself asleep, and the next
/// `flush` returns `false` to tell the writer the reader must be woken by
/// a command.
///
/// Safety contract: exactly one thread acts as writer and exactly one as
/// reader at any time. The `Pipe` endpoints enforce this by construction
/// (each endpoint is owned by a single thread, and ownership migration
/// goes through a full mailbox drain).
pub(crate) struct YPipe<T> {
  queue: UnsafeCell<YQueue<T>>,
  /// Writer-owned: points past the last flushed value.
  w: UnsafeCell<*mut T>,
  /// Writer-owned: points past the last complete message.
  f: UnsafeCell<*mut T>,
  /// Reader-owned: points past the last readable value, or null when the
  /// reader has marked itself asleep.
  r: UnsafeCell<*mut T>,
  /// The contact point: either the published read limit or null while the
  /// reader sleeps.
  c: AtomicPtr<T>,
}

unsafe impl<T: Send> Send for YPipe<T> {}
unsafe impl<T: Send> Sync for YPipe<T> {}

impl<T> YPipe<T> {
  pub fn new() -> Self {
    let mut queue = YQueue::new();
    unsafe { queue.push() };
    let terminator = unsafe { queue.back_ptr() };
    Self {
      queue: UnsafeCell::new(queue),
      w: UnsafeCell::new(terminator),
      f: UnsafeCell::new(terminator),
      r: UnsafeCell::new(terminator),
      c: AtomicPtr::new(terminator),
    }
  }

  /// Appends a value without publishing it. `incomplete` marks a frame
  /// that is not the last part of its message; rollback stops at message
  /// boundaries.
  pub fn write(&self, value: T, incomplete: bool) {
    unsafe {
      let queue = &mut *self.queue.get();
      ptr::write(queue.back_ptr(), value);
      queue.push();
      if !incomplete {
        *self.f.get() = queue.back_ptr();
      }
    }
  }

  /// Removes and returns the most recent unpublished, incomplete value.
  /// Returns `None` once the rollback reaches a message boundary.
  pub fn unwrite(&self) -> Option<T> {
    unsafe {
      let queue = &mut *self.queue.get();
      if *self.f.get() == queue.back_ptr() {
        return None;
      }
      queue.unpush();
      Some(ptr::read(queue.back_ptr()))
    }
  }

  /// Publishes all complete messages written so far. Returns `false` when
  /// the reader was asleep, in which case the writer must wake it with an
  /// ActivateRead command.
  pub fn flush(&self) -> bool {
    unsafe {
      let w = *self.w.get();
      let f = *self.f.get();
      if w == f {
        return true;
      }
      match self.c.compare_exchange(w, f, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
          *self.w.get() = f;
          true
        }
        Err(_) => {
          // Reader is asleep (c was null). Publish and report it.
          self.c.store(f, Ordering::Release);
          *self.w.get() = f;
          false
        }
      }
    }
  }

  /// Non-destructively checks whether a value is available. On observing
  /// an empty pipe the reader is atomically marked asleep.
  pub fn check_read(&self) -> bool {
    unsafe {
      let queue = &*self.queue.get();
      let front = queue.front_ptr();
      let r = *self.r.get();
      if front != r && !r.is_null() {
        return true;
      }
      // Grab the latest publication; if nothing is published past the
      // front, this swaps in the asleep marker.
      let observed = match self
        .c
        .compare_exchange(front, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(prev) => prev,
        Err(prev) => prev,
      };
      *self.r.get() = observed;
      !(observed == front || observed.is_null())
    }
  }

  /// Consumes the front value if one is published.
  pub fn read(&self) -> Option<T> {
    if !self.check_read() {
      return None;
    }
    unsafe {
      let queue = &mut *self.queue.get();
      let value = ptr::read(queue.front_ptr());
      queue.pop();
      Some(value)
    }
  }

  /// Applies `probe` to the front value without consuming it. Returns
  /// `false` when the pipe is empty.
  pub fn probe(&self, probe: impl FnOnce(&T) -> bool) -> bool {
    if !self.check_read() {
      return false;
    }
    unsafe {
      let queue = &*self.queue.get();
      probe(&*queue.front_ptr())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn write_flush_read_roundtrip() {
    let p: YPipe<u32> = YPipe::new();
    assert!(!p.check_read());
    p.write(1, false);
    p.write(2, false);
    // Unflushed values are invisible to the reader.
    assert!(!p.check_read());
    // The reader marked itself asleep above, so flush reports a wake-up
    // is needed.
    assert!(!p.flush());
    assert_eq!(p.read(), Some(1));
    assert_eq!(p.read(), Some(2));
    assert_eq!(p.read(), None);
  }

  #[test]
  fn flush_returns_true_while_reader_awake() {
    let p: YPipe<u32> = YPipe::new();
    p.write(1, false);
    assert!(!p.flush()); // first flush ever: reader starts asleep
    assert_eq!(p.read(), Some(1));
    p.write(2, false);
    // Reader has not observed empty since its last read, so it is awake.
    assert!(p.flush());
    assert_eq!(p.read(), Some(2));
  }

  #[test]
  fn unwrite_stops_at_message_boundary() {
    let p: YPipe<u32> = YPipe::new();
    p.write(1, false);
    p.write(2, true);
    p.write(3, true);
    assert_eq!(p.unwrite(), Some(3));
    assert_eq!(p.unwrite(), Some(2));
    assert_eq!(p.unwrite(), None); // 1 completed a message
    p.flush();
    assert_eq!(p.read(), Some(1));
    assert_eq!(p.read(), None);
  }

  #[test]
  fn probe_does_not_consume() {
    let p: YPipe<u32> = YPipe::new();
    p.write(7, false);
    p.flush();
    assert!(p.probe(|v| *v == 7));
    assert_eq!(p.read(), Some(7));
  }

  #[test]
  fn crosses_chunk_boundaries() {
    let p: YPipe<usize> = YPipe::new();
    for i in 0..(GRANULARITY * 3 + 17) {
      p.write(i, false);
    }
    p.flush();
    for i in 0..(GRANULARITY * 3 + 17) {
      assert_eq!(p.read(), Some(i));
    }
    assert_eq!(p.read(), None);
  }

  #[test]
  fn drops_unread_values() {
    let payload = Arc::new(());
    let p: YPipe<Arc<()>> = YPipe::new();
    for _ in 0..10 {
      p.write(payload.clone(), false);
    }
    p.flush();
    let _ = p.read();
    drop(p);
    assert_eq!(Arc::strong_count(&payload), 1);
  }

  #[test]
  fn two_threads_stream() {
    let p = Arc::new(YPipe::<u64>::new());
    let writer = {
      let p = Arc::clone(&p);
      std::thread::spawn(move || {
        for i in 0..100_000u64 {
          p.write(i, false);
          p.flush();
        }
      })
    };
    let mut expected = 0u64;
    while expected < 100_000 {
      if let Some(v) = p.read() {
        assert_eq!(v, expected);
        expected += 1;
      } else {
        std::hint::spin_loop();
      }
    }
    writer.join().unwrap();
  }
}
