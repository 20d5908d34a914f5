//! # fixheap - A Fixed-Arena Heap Allocator
//!
//! This crate provides a **first-fit free-list allocator** working inside a
//! single fixed-size byte arena. Nothing is requested from the operating
//! system after construction: every block, free or allocated, lives inside
//! the arena together with its header.
//!
//! ## Overview
//!
//! ```text
//!   Arena (HEAP_SIZE bytes):
//!
//!   ┌────┬──────┬────┬──────────┬────┬──────┬────┬────────────────────────┐
//!   │ H  │ used │ H  │   free   │ H  │ used │ H  │          free          │
//!   └────┴──────┴────┴──────────┴────┴──────┴────┴────────────────────────┘
//!          ▲      │                             ▲
//!          │      └──────── next ───────────────┘
//!          │
//!        Handle returned to the caller
//!
//!   free_list_head ──► first free header ──► ... ──► none
//!   Free headers are linked in ascending address order.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   fixheap
//!   ├── align      - 8-byte rounding macro (align!)
//!   ├── block      - In-arena block header encoding (internal)
//!   ├── dump       - Free-list iterator and memory dump
//!   ├── error      - HeapError
//!   └── heap       - Heap implementation
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fixheap::{Heap, HeapError};
//!
//! let mut heap: Heap = Heap::initialized();
//!
//! let handle = heap.allocate(24)?;
//! heap.payload_mut(handle)?.fill(0x2A);
//! assert_eq!(heap.payload(handle)?[0], 0x2A);
//!
//! heap.release(handle)?;
//! heap.dump();
//! # Ok::<(), HeapError>(())
//! ```
//!
//! ## How It Works
//!
//! Every block starts with a 16 byte header:
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │           Payload              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: u64       │  │  size bytes, a multiple of 8   │
//!   │  │ next: u64       │  │                                │
//!   │  └─────────────────┘  │                                │
//!   │      16 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Handle::offset()
//! ```
//!
//! An allocation of `n` bytes rounds `n` up to 8 and takes the first free
//! block holding at least the rounded size plus one header. When the block
//! has room left for another header and at least one byte, the tail is
//! split off as a new free block; otherwise the caller receives the whole
//! block.
//!
//! Releasing a block inserts it back into the free list at its address
//! position. With [`Coalescing::Enabled`] it is also merged with touching
//! free neighbours.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: mutation goes through `&mut Heap`
//! - **Fixed capacity**: the arena never grows
//! - **8-byte alignment only**
//! - **No coalescing by default**: free space fragments over time

pub mod align;
mod block;
mod dump;
mod error;
mod heap;

/// Boundary every payload size and offset is rounded to.
pub const ALIGNMENT: usize = 8;

pub use block::HEADER_SIZE;
pub use dump::{FreeBlock, FreeBlocks};
pub use error::HeapError;
pub use heap::{Coalescing, HEAP_SIZE, Handle, Heap};
