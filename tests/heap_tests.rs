//! End-to-end allocator scenarios driven through the public API only.

use segalloc::Allocator;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Sentinel words framing the heap image: prologue + epilogue.
const SENTINEL_BYTES: usize = 16;

/// Per-block bookkeeping: the header word preceding each payload.
const HEADER_BYTES: usize = 8;

fn new_heap() -> Allocator {
  let mut allocator = Allocator::new();
  assert!(allocator.init());
  assert!(allocator.check(line!()));
  allocator
}

/// Routes `tracing` diagnostics to the test output when `RUST_LOG` asks
/// for them.
fn init_tracing() {
  use tracing_subscriber::EnvFilter;

  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// Requests an allocation spanning every payload byte the current heap
/// can hold in a single block. Succeeds without growing the heap exactly
/// when the whole image has coalesced back into one free block.
unsafe fn allocate_entire_heap(allocator: &mut Allocator) -> *mut u8 {
  let size_before = allocator.heap_size();
  let payload = unsafe { allocator.allocate(size_before - SENTINEL_BYTES - HEADER_BYTES) };

  assert!(!payload.is_null(), "heap did not coalesce into one block");
  assert_eq!(
    size_before,
    allocator.heap_size(),
    "exact-fit allocation should not grow the heap"
  );
  payload
}

#[test]
fn returned_pointers_are_aligned_distinct_and_writable() {
  let mut allocator = new_heap();

  unsafe {
    let sizes = [1usize, 8, 24, 100, 512, 5000];
    let mut regions = Vec::new();

    for (fill, &size) in sizes.iter().enumerate() {
      let payload = allocator.allocate(size);
      assert!(!payload.is_null());
      assert_eq!(0, payload as usize % 16, "payload must be 16-byte aligned");

      payload.write_bytes(fill as u8 + 1, size);
      regions.push((payload, size, fill as u8 + 1));
    }

    // Writing one region corrupted no other: live regions never alias.
    for &(payload, size, fill) in &regions {
      let bytes = std::slice::from_raw_parts(payload, size);
      assert!(bytes.iter().all(|&byte| byte == fill));
    }

    for &(payload, _, _) in &regions {
      allocator.free(payload);
    }
  }

  assert!(allocator.check(line!()));
}

#[test]
fn neighboring_frees_coalesce_into_one_block() {
  let mut allocator = new_heap();

  unsafe {
    let a = allocator.allocate(24);
    let b = allocator.allocate(24);
    assert!(!a.is_null() && !b.is_null());

    allocator.free(a);
    allocator.free(b);
    assert!(allocator.check(line!()));

    // Both 32-byte blocks and the tail merged back into a single free
    // block, so a request spanning the whole heap fits in place...
    let all = allocate_entire_heap(&mut allocator);
    // ...and it starts where `a` lived, at the low end of the heap.
    assert_eq!(a, all);
  }
}

#[test]
fn same_class_blocks_are_reused_without_growth() {
  let mut allocator = new_heap();

  unsafe {
    // Ten 48-byte requests become ten adjacent 64-byte blocks.
    let blocks: Vec<_> = (0..10).map(|_| allocator.allocate(48)).collect();
    assert!(blocks.iter().all(|p| !p.is_null()));

    // Free every other one; no two freed blocks are adjacent, so none
    // coalesce and class [64,96) now holds five entries.
    for &payload in blocks.iter().step_by(2) {
      allocator.free(payload);
    }
    assert!(allocator.check(line!()));

    let size_before = allocator.heap_size();

    // A 40-byte request rounds to 48: its own class is empty, the scan
    // moves up to [64,96) and reuses the most recently freed block
    // instead of touching the brk.
    let reused = allocator.allocate(40);
    assert_eq!(blocks[8], reused);
    assert_eq!(size_before, allocator.heap_size());
  }

  assert!(allocator.check(line!()));
}

#[test]
fn size_class_boundaries_follow_rounding() {
  let mut allocator = new_heap();

  unsafe {
    // 56 payload bytes + header round to a 64-byte block. The guard
    // keeps the freed block away from the free tail of the heap, so it
    // stays a 64-byte entry in class [64,96).
    let p = allocator.allocate(56);
    let guard = allocator.allocate(56);
    assert!(!p.is_null() && !guard.is_null());
    allocator.free(p);

    // 57 bytes round to 80: same class as 64, but the freed block is
    // too small, so the fit comes from elsewhere in the heap.
    let q = allocator.allocate(57);
    assert_ne!(p, q);

    // The 64-byte block is still indexed and serves the next 56-byte
    // request.
    let r = allocator.allocate(56);
    assert_eq!(p, r);
  }

  assert!(allocator.check(line!()));
}

#[test]
fn reallocate_grow_preserves_the_payload() {
  let mut allocator = new_heap();

  unsafe {
    let p = allocator.allocate(32);
    assert!(!p.is_null());
    for i in 0..32 {
      p.add(i).write(i as u8);
    }

    let q = allocator.reallocate(p, 200);
    assert!(!q.is_null());
    assert_ne!(p, q);
    for i in 0..32 {
      assert_eq!(i as u8, q.add(i).read());
    }

    // The old block was freed and is first in line for its class.
    let reused = allocator.allocate(32);
    assert_eq!(p, reused);
  }

  assert!(allocator.check(line!()));
}

#[test]
fn reallocate_edge_cases() {
  let mut allocator = new_heap();

  unsafe {
    // Null pointer: plain allocation.
    let p = allocator.reallocate(std::ptr::null_mut(), 64);
    assert!(!p.is_null());

    // Zero size: free and return null.
    assert!(allocator.reallocate(p, 0).is_null());
    let reused = allocator.allocate(64);
    assert_eq!(p, reused);

    // Shrinking keeps the prefix.
    reused.write_bytes(0x5A, 64);
    let q = allocator.reallocate(reused, 8);
    assert!(!q.is_null());
    for i in 0..8 {
      assert_eq!(0x5A, q.add(i).read());
    }
  }

  assert!(allocator.check(line!()));
}

#[test]
fn zero_allocate_overflow_returns_null_and_leaves_heap_alone() {
  let mut allocator = new_heap();
  let size_before = allocator.heap_size();

  unsafe {
    assert!(allocator.zero_allocate(usize::MAX, 2).is_null());
    assert!(allocator.zero_allocate(usize::MAX / 2, 3).is_null());
    assert!(allocator.zero_allocate(0, 8).is_null());
  }

  assert_eq!(size_before, allocator.heap_size());
  assert!(allocator.check(line!()));
}

#[test]
fn zero_allocate_scrubs_recycled_memory() {
  let mut allocator = new_heap();

  unsafe {
    // Dirty a block, free it, then get it back through zero_allocate.
    let p = allocator.allocate(100);
    p.write_bytes(0xFF, 100);
    allocator.free(p);

    let q = allocator.zero_allocate(10, 10);
    assert_eq!(p, q);

    let bytes = std::slice::from_raw_parts(q, 100);
    assert!(bytes.iter().all(|&byte| byte == 0));
  }

  assert!(allocator.check(line!()));
}

#[test]
fn free_null_is_a_noop_and_zero_sized_requests_fail() {
  let mut allocator = new_heap();
  let size_before = allocator.heap_size();

  unsafe {
    allocator.free(std::ptr::null_mut());
    assert!(allocator.allocate(0).is_null());
  }

  assert_eq!(size_before, allocator.heap_size());
  assert!(allocator.check(line!()));
}

#[test]
fn exhausting_the_region_fails_cleanly() {
  let mut allocator = new_heap();
  let size_before = allocator.heap_size();

  unsafe {
    // Far beyond the backing reservation.
    assert!(allocator.allocate(1 << 40).is_null());
  }

  // The failed growth left the heap image untouched and consistent.
  assert_eq!(size_before, allocator.heap_size());
  assert!(allocator.check(line!()));

  unsafe {
    assert!(!allocator.allocate(64).is_null());
  }
}

#[test]
fn reverse_order_frees_coalesce_the_whole_heap() {
  let mut allocator = new_heap();

  unsafe {
    let blocks: Vec<_> = (0..100).map(|_| allocator.allocate(48)).collect();
    assert!(blocks.iter().all(|p| !p.is_null()));
    assert!(allocator.check(line!()));

    for &payload in blocks.iter().rev() {
      allocator.free(payload);
    }
    assert!(allocator.check(line!()));

    // Every free rejoined its successor: one block spans the heap.
    allocate_entire_heap(&mut allocator);
  }

  assert!(allocator.check(line!()));
}

#[test]
fn randomized_workout_keeps_the_heap_consistent() {
  init_tracing();

  let mut rng = StdRng::seed_from_u64(0x5E6A110C);
  let mut allocator = new_heap();

  // (payload, size, fill byte) for every live allocation.
  let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

  unsafe {
    for round in 0..2_000u32 {
      let action = if live.len() > 64 {
        6 // too many live blocks: force a free
      } else {
        rng.gen_range(0..10)
      };

      match action {
        // Allocate and fill with a recognizable byte.
        0..=5 => {
          let size = rng.gen_range(1..=768);
          let fill = (round % 251) as u8;

          let payload = allocator.allocate(size);
          assert!(!payload.is_null());
          payload.write_bytes(fill, size);
          live.push((payload, size, fill));
        }

        // Free a random live block, verifying its contents first.
        6 | 7 => {
          if live.is_empty() {
            continue;
          }
          let (payload, size, fill) = live.swap_remove(rng.gen_range(0..live.len()));

          let bytes = std::slice::from_raw_parts(payload, size);
          assert!(bytes.iter().all(|&byte| byte == fill), "payload corrupted");

          allocator.free(payload);
        }

        // Reallocate a random live block, verifying the moved prefix.
        _ => {
          if live.is_empty() {
            continue;
          }
          let index = rng.gen_range(0..live.len());
          let (payload, size, fill) = live[index];
          let new_size = rng.gen_range(1..=768);

          let moved = allocator.reallocate(payload, new_size);
          assert!(!moved.is_null());

          let kept = size.min(new_size);
          let bytes = std::slice::from_raw_parts(moved, kept);
          assert!(bytes.iter().all(|&byte| byte == fill), "prefix lost");

          moved.write_bytes(fill, new_size);
          live[index] = (moved, new_size, fill);
        }
      }

      if round % 128 == 0 {
        assert!(allocator.check(line!()));
      }
    }

    for &(payload, size, fill) in &live {
      let bytes = std::slice::from_raw_parts(payload, size);
      assert!(bytes.iter().all(|&byte| byte == fill), "payload corrupted");
      allocator.free(payload);
    }
    assert!(allocator.check(line!()));

    // With everything freed the heap is one block again.
    allocate_entire_heap(&mut allocator);
  }
}
