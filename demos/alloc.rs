use std::io::Read;

use segalloc::Allocator;
use tracing_subscriber::EnvFilter;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how allocations reshape the heap.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current heap footprint as the allocator sees it.
fn print_heap_size(
  label: &str,
  allocator: &Allocator,
) {
  println!(
    "[{}] PID = {}, heap image = {} bytes",
    label,
    std::process::id(),
    allocator.heap_size(),
  );
}

fn main() {
  // Route allocator diagnostics to stderr; try RUST_LOG=segalloc=debug
  // (or =trace for full heap dumps on checker failures).
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  // The segregated-fit allocator. It owns:
  // - a growable backing region with sbrk semantics
  // - 15 size-class free lists
  // and hands out 16-byte aligned payloads carved from tagged blocks.
  let mut allocator = Allocator::new();

  unsafe {
    // Initial state: no heap image at all until the first allocation.
    print_heap_size("start", &allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 24 bytes. This lazily initializes the heap (one 4 KiB
    //    chunk) and carves a minimum 32-byte block from its low end.
    // --------------------------------------------------------------------
    let first = allocator.allocate(24);
    println!("\n[1] Allocate 24 bytes -> {:?}", first);
    print_heap_size("after first alloc", &allocator);

    // Write something into the allocated memory to show it's usable.
    first.write_bytes(0xAB, 24);
    println!("[1] Filled the block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 1000 bytes, then free the first block. The small block
    //    is remembered in its size class for reuse.
    // --------------------------------------------------------------------
    let second = allocator.allocate(1000);
    println!("\n[2] Allocate 1000 bytes -> {:?}", second);

    allocator.free(first);
    println!("[2] Freed the first block at {:?}", first);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate 16 bytes: same size class as the freed block, so the
    //    allocator hands the old address straight back.
    // --------------------------------------------------------------------
    let third = allocator.allocate(16);
    println!("\n[3] Allocate 16 bytes -> {:?}", third);
    println!(
      "[3] third == first? {}",
      if third == first {
        "Yes, the freed block was reused"
      } else {
        "No, it was placed somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow an allocation with reallocate. The payload prefix survives
    //    the move.
    // --------------------------------------------------------------------
    for i in 0..16 {
      third.add(i).write(i as u8);
    }
    let grown = allocator.reallocate(third, 300);
    println!("\n[4] Reallocate 16 -> 300 bytes: {:?} -> {:?}", third, grown);
    let preserved = (0..16).all(|i| grown.add(i).read() == i as u8);
    println!("[4] First 16 bytes preserved? {}", preserved);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) zero_allocate: like calloc, the region comes back zeroed even
    //    when it recycles dirty memory.
    // --------------------------------------------------------------------
    let zeroed = allocator.zero_allocate(32, 8);
    println!("\n[5] zero_allocate(32, 8) -> {:?}", zeroed);
    let all_zero = (0..256).all(|i| zeroed.add(i).read() == 0);
    println!("[5] All 256 bytes zero? {}", all_zero);

    // Overflowing element counts are rejected outright.
    let overflow = allocator.zero_allocate(usize::MAX, 2);
    println!("[5] zero_allocate(usize::MAX, 2) -> {:?} (rejected)", overflow);
    assert!(overflow.is_null());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Allocate a large block to force the heap to grow beyond its
    //    first chunk.
    // --------------------------------------------------------------------
    print_heap_size("before large alloc", &allocator);

    let big = allocator.allocate(64 * 1024);
    println!("\n[6] Allocate 64 KiB -> {:?}", big);

    print_heap_size("after large alloc", &allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Verify every heap invariant, then clean up. Freeing in any
    //    order is fine; adjacent free blocks coalesce on the spot.
    // --------------------------------------------------------------------
    println!("\n[7] check() -> {}", allocator.check(line!()));

    allocator.free(second);
    allocator.free(grown);
    allocator.free(zeroed);
    allocator.free(big);

    println!("[7] After freeing everything: check() -> {}", allocator.check(line!()));
    print_heap_size("end", &allocator);

    // The whole mapping goes away when `allocator` drops here.
  }
}
