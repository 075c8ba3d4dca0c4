//! # Segregated-fit allocator core
//!
//! The placement engine and heap lifecycle. One [`Allocator`] owns a
//! single contiguous heap image obtained from a [`Brk`] region and tiles
//! it with boundary-tagged blocks:
//!
//! ```text
//!              HEAP IMAGE (grows upward via sbrk →)
//!
//!   heap_lo                                               heap_hi
//!      │                                                     │
//!      ▼                                                     ▼
//!   ┌──────────┬─────────┬─────────┬──────────┬───┬──────────┐
//!   │ prologue │ block 1 │ block 2 │ block 3  │...│ epilogue │
//!   │ (8 bytes)│         │         │          │   │ (8 bytes)│
//!   └──────────┴─────────┴─────────┴──────────┴───┴──────────┘
//!              ▲
//!              └── heap_start: first real block header
//! ```
//!
//! Real blocks tile the image exactly, in address order, each a multiple
//! of 16 bytes and at least 32 bytes. The zero-sized allocated sentinels
//! at both ends terminate linear traversal in either direction.
//!
//! ## Allocation
//!
//! ```text
//!   allocate(n)
//!     │
//!     ├─► round n + header up to 16, floor 32        (asize)
//!     │
//!     ├─► find_fit(asize) in the segregated index ───► hit? split it
//!     │
//!     └─► miss: extend_heap(max(asize, 4096)), then split
//! ```
//!
//! Splitting carves the allocation from the low end of the chosen free
//! block and returns the remainder (when it is at least one minimum
//! block) to its size class.
//!
//! ## Freeing
//!
//! A freed block is immediately coalesced with free neighbors, found in
//! O(1) through the boundary tags: the `prev_alloc` header bit says
//! whether a footer precedes this block, the successor is one size
//! stride away. The merged block then enters the index. Two free blocks
//! are therefore never adjacent.

use std::cmp;
use std::ptr;

use static_assertions::const_assert;
use tracing::debug;

use crate::block::{Block, DSIZE, MIN_BLOCK_SIZE, WSIZE, Word, pack, round_up};
use crate::brk::Brk;
use crate::seglist::SegList;

/// Growth quantum: the heap is extended by at least this many bytes.
pub(crate) const CHUNK_SIZE: usize = 1 << 12;

const_assert!(CHUNK_SIZE % DSIZE == 0);

/// A segregated-fit heap allocator over one growable memory region.
///
/// # Thread safety
///
/// **Not** thread-safe: every operation takes `&mut self`, and the type
/// is deliberately not a [`std::alloc::GlobalAlloc`]. Wrap it in a lock
/// if shared access is ever needed.
///
/// # Lifetime of allocations
///
/// Payload pointers stay valid until they are freed, the allocator is
/// re-initialized, or the allocator is dropped, whichever comes first.
/// Dropping the allocator unmaps the whole region.
pub struct Allocator {
  /// The growable backing region.
  pub(crate) brk: Brk,

  /// Free-block index: 15 size-class lists.
  pub(crate) seg_list: SegList,

  /// First real block header, one word past the prologue. Null until
  /// the heap is initialized.
  pub(crate) heap_start: *mut Block,
}

impl Allocator {
  /// Creates an allocator with no heap image. The first `allocate` call
  /// initializes it lazily, or call [`Allocator::init`] explicitly.
  pub fn new() -> Self {
    Self {
      brk: Brk::new(),
      seg_list: SegList::new(),
      heap_start: ptr::null_mut(),
    }
  }

  /// Lays out an empty heap: reserves the backing region on first use,
  /// writes the prologue and epilogue sentinels back-to-back, clears
  /// the segregated index, and extends the heap by one chunk.
  ///
  /// Returns `false` when the backing region cannot be reserved or
  /// grown. Calling `init` on a live allocator discards every previous
  /// allocation and starts over on a fresh image.
  pub fn init(&mut self) -> bool {
    if !self.brk.reserve() {
      return false;
    }
    self.brk.rewind();

    let start = self.brk.sbrk(2 * WSIZE);
    if start.is_null() {
      return false;
    }

    unsafe {
      let start = start as *mut Word;
      start.write(pack(0, true, true)); // prologue
      start.add(1).write(pack(0, true, true)); // epilogue
      self.heap_start = start.add(1) as *mut Block;
    }

    self.seg_list.clear();

    debug!(lo = ?self.brk.heap_lo(), "heap initialized");

    let block = unsafe { self.extend_heap(CHUNK_SIZE) };
    !block.is_null()
  }

  /// Current size of the heap image in bytes (sentinels included).
  /// Zero before initialization. Diagnostic only.
  pub fn heap_size(&self) -> usize {
    self.brk.heap_size()
  }

  /// Grows the heap by at least `size` bytes and makes the new space a
  /// free block.
  ///
  /// The new block's header overlays what was the epilogue, inheriting
  /// its `prev_alloc` bit, and a fresh epilogue is written after it.
  /// The block is coalesced with a trailing free neighbor and inserted
  /// into its size class. Returns the block, or null when the region is
  /// exhausted; in that case the heap, epilogue included, is untouched.
  unsafe fn extend_heap(
    &mut self,
    size: usize,
  ) -> *mut Block {
    let size = round_up(size);

    let payload = self.brk.sbrk(size);
    if payload.is_null() {
      return ptr::null_mut();
    }
    debug!(bytes = size, "extending heap");

    unsafe {
      // The old epilogue word sits one word below the old break; it
      // becomes the new block's header. Read its prev_alloc bit before
      // overwriting it.
      let block = Block::of_payload(payload);
      Block::write(block, size, false, Block::is_prev_alloc(block));

      Block::write_sentinel(Block::next(block));

      let block = self.coalesce(block);
      self.seg_list.insert(block);

      debug_assert!(self.check(line!()));
      block
    }
  }

  /// Merges a just-freed block with free neighbors.
  ///
  /// `block` must be marked free and must not be in any list; the
  /// caller inserts the returned (possibly relocated) block head. The
  /// successor's `prev_alloc` bit is re-synced afterwards, so the block
  /// after the merged region always knows a free block precedes it.
  unsafe fn coalesce(
    &mut self,
    block: *mut Block,
  ) -> *mut Block {
    unsafe {
      let prev = Block::prev(block);
      let prev_alloc = prev.is_null() || Block::is_prev_alloc(block);
      let next = Block::next(block);
      let next_alloc = Block::is_alloc(next);
      let mut size = Block::size(block);

      let block = match (prev_alloc, next_alloc) {
        // Both neighbors allocated: nothing to merge.
        (true, true) => block,

        // Absorb the free successor.
        (true, false) => {
          size += Block::size(next);
          self.seg_list.remove(next);
          Block::write(block, size, false, true);
          block
        }

        // Fold into the free predecessor.
        (false, true) => {
          size += Block::size(prev);
          self.seg_list.remove(prev);
          Block::write(prev, size, false, Block::is_prev_alloc(prev));
          prev
        }

        // Free on both sides: all three become one.
        (false, false) => {
          size += Block::size(prev) + Block::size(next);
          self.seg_list.remove(prev);
          self.seg_list.remove(next);
          Block::write(prev, size, false, Block::is_prev_alloc(prev));
          prev
        }
      };

      Block::sync_next_prev_alloc(block, false);
      block
    }
  }

  /// Carves an `asize`-byte allocated block from the low end of the
  /// free block `block` (currently in its list). When the remainder is
  /// at least one minimum block it becomes a free block in its own size
  /// class; otherwise the whole block is handed out.
  unsafe fn split(
    &mut self,
    block: *mut Block,
    asize: usize,
  ) {
    debug_assert!(asize % DSIZE == 0);

    unsafe {
      self.seg_list.remove(block);
      let block_size = Block::size(block);

      if block_size - asize >= MIN_BLOCK_SIZE {
        Block::write(block, asize, true, Block::is_prev_alloc(block));

        let remainder = Block::next(block);
        Block::write(remainder, block_size - asize, false, true);
        self.seg_list.insert(remainder);
        Block::sync_next_prev_alloc(remainder, false);
      } else {
        Block::write(block, block_size, true, Block::is_prev_alloc(block));
        Block::sync_next_prev_alloc(block, true);
      }

      debug_assert!(Block::is_alloc(block));
    }
  }

  /// Allocates at least `size` writable bytes and returns their
  /// 16-byte-aligned address, or null when `size` is 0 or memory is
  /// exhausted. Initializes the heap on first use.
  ///
  /// # Safety
  ///
  /// The returned region is valid until it is freed or the allocator is
  /// re-initialized or dropped; the caller must not use it past that
  /// point. The allocator itself has no further requirements.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if self.heap_start.is_null() && !self.init() {
      return ptr::null_mut();
    }

    if size == 0 {
      return ptr::null_mut();
    }
    // A request this close to usize::MAX cannot be padded and aligned
    // without overflow.
    if size > usize::MAX - (WSIZE + DSIZE - 1) {
      return ptr::null_mut();
    }

    // Account for the header and round to the block granularity.
    let asize = round_up(size + WSIZE);

    unsafe {
      let mut block = self.seg_list.find_fit(asize);

      if block.is_null() {
        block = self.extend_heap(cmp::max(asize, CHUNK_SIZE));
        if block.is_null() {
          return ptr::null_mut();
        }
      }

      debug_assert!(!Block::is_alloc(block));
      self.split(block, asize);

      let payload = Block::payload(block);
      debug_assert!(self.check(line!()));
      payload
    }
  }

  /// Releases the allocation at `payload`. A null `payload` is a no-op.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a pointer obtained from this allocator's
  /// `allocate`/`reallocate`/`zero_allocate` that has not been freed
  /// since. Anything else is undefined behavior.
  pub unsafe fn free(
    &mut self,
    payload: *mut u8,
  ) {
    if payload.is_null() {
      return;
    }

    unsafe {
      let block = Block::of_payload(payload);
      let size = Block::size(block);
      debug_assert!(Block::is_alloc(block));

      Block::write(block, size, false, Block::is_prev_alloc(block));
      Block::sync_next_prev_alloc(block, false);

      let block = self.coalesce(block);
      self.seg_list.insert(block);
    }

    debug_assert!(self.check(line!()));
  }

  /// Resizes the allocation at `payload` to at least `size` bytes,
  /// preserving the first `min(size, old payload size)` bytes.
  ///
  /// With `size == 0` this frees and returns null; with a null
  /// `payload` it behaves like `allocate`. On failure the original
  /// allocation is left untouched and null is returned.
  ///
  /// # Safety
  ///
  /// Same contract as [`Allocator::free`] for `payload`; on success the
  /// old pointer is dead and must not be used again.
  pub unsafe fn reallocate(
    &mut self,
    payload: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if size == 0 {
        self.free(payload);
        return ptr::null_mut();
      }
      if payload.is_null() {
        return self.allocate(size);
      }

      let new_payload = self.allocate(size);
      if new_payload.is_null() {
        return ptr::null_mut();
      }

      let block = Block::of_payload(payload);
      let copy_size = cmp::min(size, Block::payload_size(block));
      ptr::copy_nonoverlapping(payload, new_payload, copy_size);

      self.free(payload);
      new_payload
    }
  }

  /// Allocates a zeroed region for `count` elements of `size` bytes
  /// each. Returns null when `count` is 0 or `count * size` overflows.
  ///
  /// # Safety
  ///
  /// Same contract as [`Allocator::allocate`].
  pub unsafe fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    if count == 0 {
      return ptr::null_mut();
    }
    let total = match count.checked_mul(size) {
      Some(total) => total,
      None => return ptr::null_mut(),
    };

    unsafe {
      let payload = self.allocate(total);
      if !payload.is_null() {
        ptr::write_bytes(payload, 0, total);
      }
      payload
    }
  }
}

impl Default for Allocator {
  fn default() -> Self {
    Self::new()
  }
}
