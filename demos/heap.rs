use std::io::Read;

use fixheap::{Coalescing, HEADER_SIZE, Heap, HeapError};
use tracing_subscriber::EnvFilter;

/// Waits until the user presses ENTER when running with `--step`.
/// Useful to read each dump before the next step changes the free list.
fn block_until_enter_pressed(step: bool) {
  if !step {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn main() -> Result<(), HeapError> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let step = std::env::args().any(|arg| arg == "--step");

  let mut heap: Heap = Heap::new();
  heap.initialize();

  println!("[start] header = {} bytes, capacity = {} bytes", HEADER_SIZE, heap.capacity());
  heap.dump();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 1) Allocate 8 bytes. The single free block is split in two.
  // --------------------------------------------------------------------
  let first = heap.allocate(8)?;
  println!("\n[1] Allocate 8 bytes at offset {}", first.offset());
  heap.payload_mut(first)?.copy_from_slice(&0xDEADBEEFu64.to_le_bytes());
  heap.dump();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes. The request is rounded up to 16.
  // --------------------------------------------------------------------
  let second = heap.allocate(12)?;
  println!(
    "\n[2] Allocate 12 bytes at offset {}, block holds {} bytes",
    second.offset(),
    heap.payload(second)?.len()
  );
  heap.payload_mut(second)?.fill(0xAB);
  heap.dump();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) Release the first block. It is not merged with anything.
  // --------------------------------------------------------------------
  heap.release(first)?;
  println!("\n[3] Released offset {}", first.offset());
  heap.dump();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) Allocate 2 bytes. The freed 8-byte block cannot take it: a block
  //    must fit the rounded size plus one header.
  // --------------------------------------------------------------------
  let third = heap.allocate(2)?;
  println!(
    "\n[4] third == first? {}",
    if third == first { "Yes, it reused the freed block" } else { "No, it allocated somewhere else" }
  );
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) Ask for more than the arena holds.
  // --------------------------------------------------------------------
  match heap.allocate(4096) {
    Ok(handle) => println!("\n[5] Unexpected allocation at {}", handle.offset()),
    Err(err) => println!("\n[5] Allocation failed: {err}"),
  }

  // --------------------------------------------------------------------
  // 6) Releasing the same handle twice is rejected.
  // --------------------------------------------------------------------
  heap.release(third)?;
  if let Err(err) = heap.release(third) {
    println!("\n[6] Second release failed: {err}");
  }
  heap.release(second)?;
  println!("[6] Free footprint = {} bytes over {} blocks", heap.free_footprint(), heap.free_block_count());
  heap.dump();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 7) Same workload with coalescing: the arena ends as one block again.
  // --------------------------------------------------------------------
  let mut merging: Heap = Heap::with_coalescing(Coalescing::Enabled);
  merging.initialize();

  let a = merging.allocate(8)?;
  let b = merging.allocate(12)?;
  merging.release(a)?;
  merging.release(b)?;
  println!("\n[7] With coalescing");
  merging.dump();

  Ok(())
}
