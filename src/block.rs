//! Block layout and boundary-tag codec.
//!
//! Every block in the heap starts with a one-word header packing its size
//! together with two status bits:
//!
//! ```text
//!   63                                   4   3   2   1   0
//!   ┌─────────────────────────────────────┬───────┬───┬───┐
//!   │            size (bytes)             │ 0   0 │ P │ A │
//!   └─────────────────────────────────────┴───────┴───┴───┘
//!                                                   │   │
//!                    prev block allocated? ─────────┘   │
//!                    this block allocated? ─────────────┘
//! ```
//!
//! Sizes are multiples of 16, so the low four bits of the size are always
//! zero and can carry the status bits. Free blocks duplicate the header
//! word in a footer occupying their last 8 bytes; allocated blocks hand
//! those bytes to the payload. The `P` bit exists exactly because
//! allocated blocks have no footer: it is the only way to step backwards
//! past an allocated neighbor without reading its (absent) footer.
//!
//! When a block is free, the first two payload words are reinterpreted as
//! the `next`/`prev` links of its segregated free list.

use std::cmp;
use std::mem;
use std::ptr;

use static_assertions::const_assert;

use crate::align_up;

/// The fundamental heap unit: one 8-byte machine word.
pub(crate) type Word = usize;

/// Header, footer and payload granularity (bytes).
pub(crate) const WSIZE: usize = mem::size_of::<Word>();

/// Payload alignment and block size granularity (bytes).
pub(crate) const DSIZE: usize = 2 * WSIZE;

/// Smallest representable block: header + two list links + footer.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

const ALLOC_MASK: Word = 0x1;
const PREV_ALLOC_MASK: Word = 0x2;
const SIZE_MASK: Word = !0xF;

// The tag format stores sizes in bits 63..4 of one 8-byte word.
const_assert!(WSIZE == 8);

/// In-heap view of a block. Only `header` is always meaningful; the link
/// words alias the payload and are valid for free blocks alone.
#[repr(C)]
pub(crate) struct Block {
  pub(crate) header: Word,
  pub(crate) next: *mut Block,
  pub(crate) prev: *mut Block,
}

// A minimum-size free block must be able to hold the whole view; its
// footer occupies the fourth and final word.
const_assert!(mem::size_of::<Block>() + WSIZE <= MIN_BLOCK_SIZE);

/// Packs a block size and its two status bits into one tag word.
///
/// `size` must be 16-byte aligned; the caller guarantees the low four
/// bits are free for the flags.
pub(crate) fn pack(
  size: usize,
  alloc: bool,
  prev_alloc: bool,
) -> Word {
  debug_assert!(size & !SIZE_MASK == 0);

  let mut word = size;
  if alloc {
    word |= ALLOC_MASK;
  }
  if prev_alloc {
    word |= PREV_ALLOC_MASK;
  }
  word
}

/// Extracts the size field from a tag word.
pub(crate) fn unpack_size(word: Word) -> usize {
  word & SIZE_MASK
}

/// Extracts the allocation bit from a tag word.
pub(crate) fn unpack_alloc(word: Word) -> bool {
  word & ALLOC_MASK != 0
}

/// Extracts the previous-block allocation bit from a tag word.
pub(crate) fn unpack_prev_alloc(word: Word) -> bool {
  word & PREV_ALLOC_MASK != 0
}

/// Rounds a byte count up to the block granularity, with a floor at the
/// minimum block size.
pub(crate) fn round_up(size: usize) -> usize {
  cmp::max(align_up!(size, DSIZE), MIN_BLOCK_SIZE)
}

impl Block {
  /// Size in bytes of the block starting at `block`.
  pub(crate) unsafe fn size(block: *const Block) -> usize {
    unsafe { unpack_size((*block).header) }
  }

  /// Whether the block at `block` is allocated.
  pub(crate) unsafe fn is_alloc(block: *const Block) -> bool {
    unsafe { unpack_alloc((*block).header) }
  }

  /// Whether the block immediately before `block` is allocated, as
  /// recorded in `block`'s own header.
  pub(crate) unsafe fn is_prev_alloc(block: *const Block) -> bool {
    unsafe { unpack_prev_alloc((*block).header) }
  }

  /// Address of the payload carried by `block`.
  pub(crate) unsafe fn payload(block: *mut Block) -> *mut u8 {
    unsafe { (block as *mut u8).add(WSIZE) }
  }

  /// Usable payload bytes of `block`: everything but the header word.
  pub(crate) unsafe fn payload_size(block: *const Block) -> usize {
    unsafe { Self::size(block) - WSIZE }
  }

  /// Recovers the block whose payload starts at `payload`.
  pub(crate) unsafe fn of_payload(payload: *mut u8) -> *mut Block {
    unsafe { payload.sub(WSIZE) as *mut Block }
  }

  /// Address of `block`'s footer word.
  ///
  /// Meaningless on a sentinel (size 0) and only written for free blocks.
  pub(crate) unsafe fn footer(block: *mut Block) -> *mut Word {
    unsafe {
      debug_assert!(Self::size(block) != 0);
      (block as *mut u8).add(Self::size(block) - WSIZE) as *mut Word
    }
  }

  /// The block immediately after `block` in address order.
  ///
  /// Must not be called on the epilogue, whose size of 0 would make this
  /// loop in place.
  pub(crate) unsafe fn next(block: *mut Block) -> *mut Block {
    unsafe {
      debug_assert!(Self::size(block) != 0);
      (block as *mut u8).add(Self::size(block)) as *mut Block
    }
  }

  /// The block immediately before `block` in address order, located by
  /// reading the preceding footer word, or null when that word is the
  /// prologue.
  ///
  /// The result is trustworthy only when the preceding block is free:
  /// an allocated predecessor has no footer, so the word read here is
  /// payload. Callers consult `is_prev_alloc` before using the result.
  pub(crate) unsafe fn prev(block: *mut Block) -> *mut Block {
    unsafe {
      let footer = (block as *mut u8).sub(WSIZE) as *const Word;
      let size = unpack_size(footer.read());
      if size == 0 {
        return ptr::null_mut();
      }
      (block as *mut u8).sub(size) as *mut Block
    }
  }

  /// Writes `block`'s header and, when the block is free, mirrors the
  /// header into the footer.
  ///
  /// The successor's `prev_alloc` bit is left untouched; callers that
  /// change the allocation status follow up with
  /// [`Block::sync_next_prev_alloc`].
  pub(crate) unsafe fn write(
    block: *mut Block,
    size: usize,
    alloc: bool,
    prev_alloc: bool,
  ) {
    unsafe {
      debug_assert!(size >= MIN_BLOCK_SIZE && size % DSIZE == 0);
      let word = pack(size, alloc, prev_alloc);
      (*block).header = word;
      if !alloc {
        Self::footer(block).write(word);
      }
    }
  }

  /// Writes a zero-sized allocated sentinel word at `block`, terminating
  /// linear traversal of the heap.
  pub(crate) unsafe fn write_sentinel(block: *mut Block) {
    unsafe {
      (*block).header = pack(0, true, false);
    }
  }

  /// Re-records the allocation status of `block` into the `prev_alloc`
  /// bit of the block that follows it.
  pub(crate) unsafe fn sync_next_prev_alloc(
    block: *mut Block,
    alloc: bool,
  ) {
    unsafe {
      let next = Self::next(block);
      (*next).header = pack(Self::size(next), Self::is_alloc(next), alloc);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_round_trips_all_flag_combinations() {
    for size in [0usize, 32, 48, 4096, 1 << 40] {
      for alloc in [false, true] {
        for prev_alloc in [false, true] {
          let word = pack(size, alloc, prev_alloc);

          assert_eq!(size, unpack_size(word));
          assert_eq!(alloc, unpack_alloc(word));
          assert_eq!(prev_alloc, unpack_prev_alloc(word));
        }
      }
    }
  }

  #[test]
  fn round_up_floors_at_minimum_block() {
    assert_eq!(MIN_BLOCK_SIZE, round_up(1));
    assert_eq!(MIN_BLOCK_SIZE, round_up(24));
    assert_eq!(MIN_BLOCK_SIZE, round_up(32));
    assert_eq!(48, round_up(33));
    assert_eq!(48, round_up(48));
    assert_eq!(80, round_up(65));
  }

  /// Backing storage for hand-built block sequences. The first word plays
  /// the prologue, the last written word the epilogue.
  #[repr(align(16))]
  struct Arena([u8; 256]);

  #[test]
  fn navigation_over_a_hand_built_heap() {
    let mut arena = Arena([0; 256]);
    let base = arena.0.as_mut_ptr();

    unsafe {
      // prologue | A: 48 free | B: 64 allocated | epilogue
      (base as *mut Word).write(pack(0, true, true));

      let a = base.add(WSIZE) as *mut Block;
      Block::write(a, 48, false, true);

      let b = Block::next(a);
      Block::write(b, 64, true, false);

      Block::write_sentinel(Block::next(b));

      assert_eq!(48, Block::size(a));
      assert!(!Block::is_alloc(a));
      assert!(Block::is_prev_alloc(a));
      assert_eq!(40, Block::payload_size(a));

      // The free block's footer mirrors its header.
      assert_eq!((*a).header, Block::footer(a).read());

      // Walking forward and back lands on the same blocks.
      assert_eq!(b, Block::next(a));
      assert_eq!(a, Block::prev(b));
      assert!(Block::prev(a).is_null());

      // The epilogue terminates traversal.
      assert_eq!(0, Block::size(Block::next(b)));
      assert!(Block::is_alloc(Block::next(b)));

      // Payloads sit one word past the header, on a 16-byte boundary.
      assert_eq!(a as usize + WSIZE, Block::payload(a) as usize);
      assert_eq!(0, Block::payload(a) as usize % DSIZE);
      assert_eq!(a, Block::of_payload(Block::payload(a)));
    }
  }

  #[test]
  fn sync_next_prev_alloc_rewrites_only_the_flag() {
    let mut arena = Arena([0; 256]);
    let base = arena.0.as_mut_ptr();

    unsafe {
      (base as *mut Word).write(pack(0, true, true));

      let a = base.add(WSIZE) as *mut Block;
      Block::write(a, 32, true, true);

      let b = Block::next(a);
      Block::write(b, 48, false, true);

      Block::write_sentinel(Block::next(b));

      Block::sync_next_prev_alloc(a, false);

      assert_eq!(48, Block::size(b));
      assert!(!Block::is_alloc(b));
      assert!(!Block::is_prev_alloc(b));
    }
  }
}
