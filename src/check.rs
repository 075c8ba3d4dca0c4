//! Heap self-consistency checker.
//!
//! [`Allocator::check`] verifies every structural invariant the
//! allocator maintains, reporting one `tracing` error line per violated
//! predicate before returning `false`. It never mutates the heap, so it
//! can run at any public-call boundary; the hot paths invoke it behind
//! `debug_assert!` only.

use tracing::{error, trace};

use crate::block::{Block, WSIZE};
use crate::heap::Allocator;
use crate::seglist::{NUM_CLASSES, SegList};

/// Address-order walk over the real blocks of the heap, ending at the
/// epilogue.
pub(crate) struct HeapIter {
  cursor: *mut Block,
}

impl Iterator for HeapIter {
  type Item = *mut Block;

  fn next(&mut self) -> Option<*mut Block> {
    unsafe {
      if self.cursor.is_null() || Block::size(self.cursor) == 0 {
        return None;
      }
      let block = self.cursor;
      self.cursor = Block::next(block);
      Some(block)
    }
  }
}

impl Allocator {
  /// Iterates the real blocks of the heap in address order.
  pub(crate) fn blocks(&self) -> HeapIter {
    HeapIter {
      cursor: self.heap_start,
    }
  }

  /// Verifies the heap against all structural invariants.
  ///
  /// Emits one diagnostic per failed predicate (tagged with `line`, the
  /// caller's source line) and returns whether everything held. On an
  /// uninitialized heap there is nothing to verify and the result is
  /// `true`.
  pub fn check(
    &self,
    line: u32,
  ) -> bool {
    if self.heap_start.is_null() {
      return true;
    }

    let mut ok = true;

    if !self.check_payload_alignment() {
      error!(line, "allocated payload not 16-byte aligned");
      ok = false;
    }

    // A cyclic list would hang every walk below, so bail out early.
    for index in 0..NUM_CLASSES {
      if !Self::list_is_acyclic(self.seg_list.head(index)) {
        error!(line, class = index, "free list is cyclic");
        self.trace_heap();
        return false;
      }
    }

    if !self.check_sentinels() {
      error!(line, "bad prologue or epilogue word");
      ok = false;
    }

    if !self.check_block_bounds() {
      error!(line, "block address out of heap range");
      ok = false;
    }

    if !self.check_list_links() {
      error!(line, "free list links inconsistent (next.prev != self)");
      ok = false;
    }

    if !self.check_class_membership() {
      error!(line, "free block filed under the wrong size class");
      ok = false;
    }

    if !self.check_list_pointer_bounds() {
      error!(line, "free list pointer out of heap range");
      ok = false;
    }

    if !self.check_footers() {
      error!(line, "free block header and footer disagree");
      ok = false;
    }

    if !self.check_prev_alloc_tags() {
      error!(line, "prev_alloc tag disagrees with predecessor status");
      ok = false;
    }

    if !self.check_no_adjacent_free() {
      error!(line, "two adjacent free blocks escaped coalescing");
      ok = false;
    }

    if !self.check_free_block_accounting() {
      error!(line, "free blocks in heap and in lists differ");
      ok = false;
    }

    if !ok {
      self.trace_heap();
      self.trace_lists();
    }
    ok
  }

  /// Every allocated block's payload lands on a 16-byte boundary.
  fn check_payload_alignment(&self) -> bool {
    self.blocks().all(|block| unsafe {
      !Block::is_alloc(block) || Block::payload(block) as usize % 16 == 0
    })
  }

  /// Floyd's tortoise and hare over one class list.
  fn list_is_acyclic(head: *mut Block) -> bool {
    if head.is_null() {
      return true;
    }
    unsafe {
      let mut tortoise = head;
      let mut hare = (*head).next;
      while tortoise != hare {
        if hare.is_null() || (*hare).next.is_null() {
          return true;
        }
        tortoise = (*tortoise).next;
        hare = (*(*hare).next).next;
      }
      false
    }
  }

  /// Prologue and epilogue both read as zero-sized allocated words.
  fn check_sentinels(&self) -> bool {
    unsafe {
      let prologue = self.brk.heap_lo() as *mut Block;
      let epilogue = self.brk.heap_hi().wrapping_sub(WSIZE - 1) as *mut Block;

      Block::size(prologue) == 0
        && Block::is_alloc(prologue)
        && Block::size(epilogue) == 0
        && Block::is_alloc(epilogue)
    }
  }

  /// `addr` lies strictly between the prologue and the epilogue.
  fn in_heap(
    &self,
    addr: usize,
  ) -> bool {
    let lo = self.brk.heap_lo() as usize;
    let epilogue = self.brk.heap_hi() as usize - (WSIZE - 1);
    lo < addr && addr < epilogue
  }

  /// Every real block lies strictly inside the heap image.
  fn check_block_bounds(&self) -> bool {
    self.blocks().all(|block| self.in_heap(block as usize))
  }

  /// `block.next.prev == block` for every non-terminal list node.
  fn check_list_links(&self) -> bool {
    (0..NUM_CLASSES).all(|index| unsafe {
      self.seg_list.iter_class(index).all(|block| {
        let next = (*block).next;
        next.is_null() || (*next).prev == block
      })
    })
  }

  /// Every listed block's size falls inside its class interval.
  fn check_class_membership(&self) -> bool {
    (0..NUM_CLASSES).all(|index| {
      let (lo, hi) = SegList::class_bounds(index);
      unsafe {
        self.seg_list.iter_class(index).all(|block| {
          let size = Block::size(block);
          lo <= size && size < hi
        })
      }
    })
  }

  /// Every non-null list link points into the heap image.
  fn check_list_pointer_bounds(&self) -> bool {
    (0..NUM_CLASSES).all(|index| unsafe {
      self.seg_list.iter_class(index).all(|block| {
        let next = (*block).next;
        let prev = (*block).prev;
        (next.is_null() || self.in_heap(next as usize))
          && (prev.is_null() || self.in_heap(prev as usize))
      })
    })
  }

  /// Every free block's footer mirrors its header.
  fn check_footers(&self) -> bool {
    self.blocks().all(|block| unsafe {
      Block::is_alloc(block) || (*block).header == Block::footer(block).read()
    })
  }

  /// Every block's allocation status is mirrored in its successor's
  /// `prev_alloc` bit (the epilogue's included).
  fn check_prev_alloc_tags(&self) -> bool {
    self.blocks().all(|block| unsafe {
      Block::is_alloc(block) == Block::is_prev_alloc(Block::next(block))
    })
  }

  /// Coalescing left no two free blocks adjacent.
  fn check_no_adjacent_free(&self) -> bool {
    self.blocks().all(|block| unsafe {
      let next = Block::next(block);
      Block::size(next) == 0 || Block::is_alloc(block) || Block::is_alloc(next)
    })
  }

  /// Free blocks found by linear traversal match the lists exactly in
  /// count.
  fn check_free_block_accounting(&self) -> bool {
    let in_heap = self
      .blocks()
      .filter(|&block| unsafe { !Block::is_alloc(block) })
      .count();

    let in_lists: usize = (0..NUM_CLASSES)
      .map(|index| unsafe { self.seg_list.iter_class(index).count() })
      .sum();

    if in_heap != in_lists {
      error!(in_heap, in_lists, "free block counts");
      return false;
    }
    true
  }

  /// Dumps every real block at trace level.
  pub(crate) fn trace_heap(&self) {
    for block in self.blocks() {
      unsafe {
        trace!(
          addr = ?block,
          size = Block::size(block),
          alloc = Block::is_alloc(block),
          prev_alloc = Block::is_prev_alloc(block),
          "heap block"
        );
      }
    }
  }

  /// Dumps every segregated list at trace level.
  pub(crate) fn trace_lists(&self) {
    for index in 0..NUM_CLASSES {
      unsafe {
        for block in self.seg_list.iter_class(index) {
          trace!(
            class = index,
            addr = ?block,
            size = Block::size(block),
            "free list block"
          );
        }
      }
    }
  }
}
