//! The extend-brk memory primitive backing the heap.
//!
//! Instead of moving the real program break, a [`Brk`] reserves one large
//! private anonymous mapping up front and bumps an internal break pointer
//! inside it. This keeps every allocator instance independent of process
//! state (and of every other instance), while still modelling the classic
//! `sbrk` contract:
//!
//! ```text
//!    lo                     brk                              limit
//!    │                       │                                 │
//!    ▼                       ▼                                 ▼
//!    ┌───────────────────────┬─────────────────────────────────┐
//!    │      heap image       │        reserved, unused         │
//!    └───────────────────────┴─────────────────────────────────┘
//!    ◄──── heap_size() ─────► ◄──── future sbrk() growth ─────►
//! ```
//!
//! The mapping is created with `MAP_NORESERVE`, so untouched reservation
//! pages cost nothing; the kernel hands out zero-filled pages as the
//! break advances over them.

use std::ptr;

use libc::{
  MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void,
};
use tracing::debug;

use crate::block::DSIZE;

/// Size of the address-space reservation, and therefore the hard ceiling
/// on heap growth.
pub(crate) const MAX_HEAP_BYTES: usize = 1 << 30;

/// A monotonically growable memory region with `sbrk` semantics.
pub(crate) struct Brk {
  lo: *mut u8,
  brk: *mut u8,
  limit: *mut u8,
}

impl Brk {
  /// Creates an empty region. No address space is reserved until
  /// [`Brk::reserve`] runs.
  pub(crate) const fn new() -> Self {
    Self {
      lo: ptr::null_mut(),
      brk: ptr::null_mut(),
      limit: ptr::null_mut(),
    }
  }

  /// Maps the backing reservation. Idempotent; returns `false` only when
  /// the kernel refuses the mapping.
  pub(crate) fn reserve(&mut self) -> bool {
    if !self.lo.is_null() {
      return true;
    }

    let addr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        MAX_HEAP_BYTES,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
        -1,
        0,
      )
    };
    if addr == MAP_FAILED {
      return false;
    }

    self.lo = addr as *mut u8;
    self.brk = self.lo;
    self.limit = unsafe { self.lo.add(MAX_HEAP_BYTES) };

    // mmap returns page-aligned addresses, which keeps the first break
    // (and with it all block payloads) on 16-byte boundaries.
    debug_assert!(self.lo as usize % DSIZE == 0);

    debug!(lo = ?self.lo, bytes = MAX_HEAP_BYTES, "reserved heap region");
    true
  }

  /// Discards the heap image by rewinding the break to the low end of
  /// the reservation.
  pub(crate) fn rewind(&mut self) {
    self.brk = self.lo;
  }

  /// Grows the heap by `delta` bytes and returns the old break, or null
  /// when the reservation is exhausted (or not yet mapped).
  ///
  /// `delta` is always a positive multiple of 16 here; shrinking is not
  /// supported.
  pub(crate) fn sbrk(
    &mut self,
    delta: usize,
  ) -> *mut u8 {
    debug_assert!(delta > 0 && delta % DSIZE == 0);

    if self.lo.is_null() || delta > self.limit as usize - self.brk as usize {
      return ptr::null_mut();
    }

    let old_brk = self.brk;
    self.brk = unsafe { self.brk.add(delta) };
    old_brk
  }

  /// Lowest address of the heap image.
  pub(crate) fn heap_lo(&self) -> *mut u8 {
    self.lo
  }

  /// Highest address of the heap image (inclusive: the last usable byte,
  /// one below the break).
  pub(crate) fn heap_hi(&self) -> *mut u8 {
    self.brk.wrapping_sub(1)
  }

  /// Current size of the heap image in bytes.
  pub(crate) fn heap_size(&self) -> usize {
    self.brk as usize - self.lo as usize
  }
}

impl Drop for Brk {
  fn drop(&mut self) {
    if !self.lo.is_null() {
      unsafe {
        libc::munmap(self.lo as *mut c_void, MAX_HEAP_BYTES);
      }
    }
  }
}
