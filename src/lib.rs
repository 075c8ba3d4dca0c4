//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a **boundary-tag, segregated free-list allocator**
//! implementation in Rust that manages a single growable heap region.
//!
//! ## Overview
//!
//! The heap is an implicit list of variable-size blocks, each framed by
//! tag words, layered with an index of free blocks segregated by size:
//!
//! ```text
//!   ┌─────────────────────────────────────────────────────────────────────┐
//!   │                            HEAP IMAGE                               │
//!   │                                                                     │
//!   │  ┌────┬───────────┬─────────────┬───────────┬────────────────┬────┐ │
//!   │  │ P  │ A (used)  │  B (free)   │ C (used)  │   D (free)     │ E  │ │
//!   │  └────┴───────────┴─────────────┴───────────┴────────────────┴────┘ │
//!   │    ▲                    ▲                           ▲           ▲   │
//!   │    │                    │                           │           │   │
//!   │ prologue                └───────┐          ┌────────┘       epilogue│
//!   │                                 │          │                        │
//!   │               segregated index: │          │                        │
//!   │               ┌──────────────┐  │          │                        │
//!   │               │ class [32,64)├──┘          │   (one doubly-linked   │
//!   │               │ class [64,96)│             │    FIFO list per       │
//!   │               │     ...      ├─────────────┘    size class)         │
//!   │               │ class 65536+ │                                      │
//!   │               └──────────────┘                                      │
//!   └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Allocation picks the first sufficiently large free block, starting at
//! the request's own size class and scanning upward, then splits off the
//! unused tail. Freeing merges with free neighbors immediately, so no
//! two free blocks are ever adjacent.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro (align_up!)
//!   ├── block      - Boundary-tag codec and block navigation (internal)
//!   ├── brk        - Growable backing region with sbrk semantics (internal)
//!   ├── seglist    - Size-class segregated free-list index (internal)
//!   ├── heap       - Allocator: placement engine and heap lifecycle
//!   └── check      - Heap consistency checker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segalloc::Allocator;
//!
//! fn main() {
//!     let mut allocator = Allocator::new();
//!
//!     unsafe {
//!         // Allocate 100 writable, 16-byte aligned bytes.
//!         let p = allocator.allocate(100);
//!         assert!(!p.is_null());
//!
//!         p.write_bytes(0xAB, 100);
//!
//!         // Grow the allocation, preserving its contents.
//!         let q = allocator.reallocate(p, 500);
//!
//!         // Free the memory for reuse.
//!         allocator.free(q);
//!     }
//!
//!     // Verify every heap invariant (diagnostic).
//!     assert!(allocator.check(line!()));
//! }
//! ```
//!
//! ## How It Works
//!
//! Every block carries a header word packing its size with two status
//! bits; free blocks mirror the header in a trailing footer:
//!
//! ```text
//!   Allocated block:                 Free block:
//!   ┌──────────┬──────────────┐      ┌──────────┬──────┬──────┬───┬────────┐
//!   │  header  │   payload    │      │  header  │ next │ prev │...│ footer │
//!   │ size|P|A │ (≥ 16-byte   │      │ size|P|0 │      │      │   │ = head │
//!   │          │  aligned)    │      │          │ list links   │   │   er   │
//!   └──────────┴──────────────┘      └──────────┴──────┴──────┴───┴────────┘
//!    8 bytes                          the payload area doubles as the
//!                                     free-list node
//! ```
//!
//! Allocated blocks have no footer: those 8 bytes belong to the
//! payload. The `P` (previous-block-allocated) bit in each header is
//! what keeps backwards traversal possible anyway: coalescing only ever
//! needs the predecessor's footer when the predecessor is free, and the
//! bit says exactly when that is the case.
//!
//! Memory comes from a private anonymous mapping reserved once and grown
//! with classic `sbrk` semantics in 4 KiB chunks.
//!
//! ## Features
//!
//! - **Segregated fit**: 15 size classes give near-constant-time
//!   allocation for mixed workloads
//! - **Immediate coalescing**: freed blocks merge with both neighbors
//!   right away, capping fragmentation
//! - **Boundary-tag economy**: only free blocks pay for footers
//! - **Self-checking**: a checker verifies every structural invariant of
//!   the heap and reports each violation distinctly
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives; every
//!   operation takes `&mut self`
//! - **Monotonic footprint**: the heap never shrinks back toward the OS
//!   while the allocator lives
//! - **Unix-only**: requires `libc` memory mapping (POSIX systems)
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory
//! management. Allocation and deallocation operations require `unsafe`
//! blocks, and callers must uphold the usual allocator contract: no
//! double frees, no foreign pointers, no use after free.

pub mod align;
mod block;
mod brk;
mod check;
mod heap;
mod seglist;

pub use heap::Allocator;
