use std::{collections::BTreeSet, fmt};

use tracing::{debug, trace, warn};

use crate::{
  ALIGNMENT, align,
  block::{HEADER_SIZE, Header},
  dump::FreeBlocks,
  error::HeapError,
};

/// Default arena capacity in bytes.
pub const HEAP_SIZE: usize = 128 * 8;

#[repr(C, align(8))]
struct Arena<const N: usize>([u8; N]);

/// Opaque reference to an allocated payload.
///
/// Wraps the payload's byte offset from the start of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

impl Handle {
  /// Rebuilds a handle from a payload offset, e.g. one stored by the caller.
  /// The heap validates it on use.
  pub fn from_offset(offset: usize) -> Self {
    Self(offset)
  }

  /// Payload offset from the start of the arena. Always a multiple of 8.
  pub fn offset(&self) -> usize {
    self.0
  }
}

/// What [`Heap::release`] does with free neighbours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Coalescing {
  /// Freed blocks stay separate free-list nodes.
  #[default]
  Disabled,
  /// Freed blocks are merged with address-adjacent free blocks.
  Enabled,
}

/// First-fit allocator over a fixed arena of `N` bytes.
///
/// Free blocks form a singly-linked list threaded through in-arena headers,
/// kept in ascending address order.
pub struct Heap<const N: usize = HEAP_SIZE> {
  arena: Box<Arena<N>>,
  head: Option<usize>,
  // header offsets of blocks handed out and not yet released
  live: BTreeSet<usize>,
  initialized: bool,
  coalescing: Coalescing,
}

impl<const N: usize> Heap<N> {
  /// Creates a zeroed, uninitialized heap. Call [`Heap::initialize`] before use.
  pub fn new() -> Self {
    Self::with_coalescing(Coalescing::Disabled)
  }

  /// Creates an uninitialized heap with the given release policy.
  pub fn with_coalescing(coalescing: Coalescing) -> Self {
    const {
      assert!(N % ALIGNMENT == 0);
      assert!(N > 2 * HEADER_SIZE);
    }

    Self {
      arena: Box::new(Arena([0; N])),
      head: None,
      live: BTreeSet::new(),
      initialized: false,
      coalescing,
    }
  }

  /// Creates a heap that is ready for allocations.
  pub fn initialized() -> Self {
    let mut heap = Self::new();
    heap.initialize();
    heap
  }

  /// Resets the arena to a single free block spanning all of it.
  ///
  /// Handles obtained before the reset become invalid.
  pub fn initialize(&mut self) {
    if !self.live.is_empty() {
      warn!(live = self.live.len(), "reinitializing heap with live allocations");
    }

    self.arena.0.fill(0);
    Header::new(N - HEADER_SIZE, None).write(&mut self.arena.0, 0);

    self.head = Some(0);
    self.live.clear();
    self.initialized = true;

    debug!(capacity = N, free = N - HEADER_SIZE, "heap initialized");
  }

  /// Allocates at least `size` bytes, rounded up to a multiple of 8.
  ///
  /// Takes the first free block that can hold the rounded size plus a
  /// header, splitting off the remainder when it can hold a header and at
  /// least one byte.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Handle, HeapError> {
    self.ensure_initialized()?;

    if size == 0 {
      return Err(HeapError::ZeroSize);
    }
    if size > N {
      return Err(HeapError::Exhausted { requested: size });
    }

    let rounded = align!(size);
    let needed = rounded + HEADER_SIZE;

    let mut prev = None;
    let mut cursor = self.head;

    while let Some(offset) = cursor {
      let mut block = Header::read(&self.arena.0, offset);

      if block.size < needed {
        prev = Some(offset);
        cursor = block.next;
        continue;
      }

      let split = block.size > needed + HEADER_SIZE;
      let successor = if split {
        let remainder = offset + needed;
        Header::new(block.size - needed, block.next).write(&mut self.arena.0, remainder);
        trace!(offset, remainder, "split free block");

        block.size = rounded;
        Some(remainder)
      } else {
        block.next
      };

      block.next = None;
      block.write(&mut self.arena.0, offset);
      self.link(prev, successor);
      self.live.insert(offset);

      let handle = Handle(offset + HEADER_SIZE);
      debug!(offset = handle.0, requested = size, size = block.size, split, "allocated block");

      return Ok(handle);
    }

    debug!(requested = size, "no free block large enough");
    Err(HeapError::Exhausted { requested: size })
  }

  /// Returns an allocated block to the free list, keeping address order.
  pub fn release(
    &mut self,
    handle: Handle,
  ) -> Result<(), HeapError> {
    self.ensure_initialized()?;

    let offset = self.header_of(handle).inspect_err(|err| {
      warn!(offset = handle.0, %err, "rejected release");
    })?;
    self.live.remove(&offset);

    let mut prev = None;
    let mut current = self.head;

    while let Some(node) = current {
      if node > offset {
        break;
      }
      prev = Some(node);
      current = Header::read(&self.arena.0, node).next;
    }

    let mut block = Header::read(&self.arena.0, offset);
    block.next = current;
    block.write(&mut self.arena.0, offset);
    self.link(prev, Some(offset));

    debug!(offset = handle.0, size = block.size, "released block");

    if self.coalescing == Coalescing::Enabled {
      self.merge_with_next(offset);
      if let Some(prev) = prev {
        self.merge_with_next(prev);
      }
    }

    Ok(())
  }

  /// Payload bytes of a live allocation. The slice covers the whole block,
  /// which may exceed the requested size.
  pub fn payload(
    &self,
    handle: Handle,
  ) -> Result<&[u8], HeapError> {
    self.ensure_initialized()?;

    let size = Header::read(&self.arena.0, self.header_of(handle)?).size;
    Ok(&self.arena.0[handle.0..handle.0 + size])
  }

  pub fn payload_mut(
    &mut self,
    handle: Handle,
  ) -> Result<&mut [u8], HeapError> {
    self.ensure_initialized()?;

    let size = Header::read(&self.arena.0, self.header_of(handle)?).size;
    Ok(&mut self.arena.0[handle.0..handle.0 + size])
  }

  /// Walks the free list in ascending address order.
  pub fn free_blocks(&self) -> FreeBlocks<'_> {
    FreeBlocks::new(&self.arena.0, self.head)
  }

  /// Sum of free payload sizes.
  pub fn free_bytes(&self) -> usize {
    self.free_blocks().map(|block| block.size).sum()
  }

  /// Bytes covered by free blocks, headers included.
  pub fn free_footprint(&self) -> usize {
    self.free_blocks().map(|block| block.size + HEADER_SIZE).sum()
  }

  pub fn free_block_count(&self) -> usize {
    self.free_blocks().count()
  }

  pub fn largest_free_block(&self) -> Option<usize> {
    self.free_blocks().map(|block| block.size).max()
  }

  pub fn live_allocations(&self) -> usize {
    self.live.len()
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  pub fn capacity(&self) -> usize {
    N
  }

  pub fn coalescing(&self) -> Coalescing {
    self.coalescing
  }

  fn ensure_initialized(&self) -> Result<(), HeapError> {
    if self.initialized {
      Ok(())
    } else {
      Err(HeapError::NotInitialized)
    }
  }

  /// Maps a handle to the header offset of a live block.
  fn header_of(
    &self,
    handle: Handle,
  ) -> Result<usize, HeapError> {
    handle
      .0
      .checked_sub(HEADER_SIZE)
      .filter(|offset| self.live.contains(offset))
      .ok_or(HeapError::InvalidPointer { offset: handle.0 })
  }

  /// Points `prev` (or the list head when `prev` is `None`) at `next`.
  fn link(
    &mut self,
    prev: Option<usize>,
    next: Option<usize>,
  ) {
    match prev {
      Some(prev) => {
        let mut header = Header::read(&self.arena.0, prev);
        header.next = next;
        header.write(&mut self.arena.0, prev);
      }
      None => self.head = next,
    }
  }

  /// Absorbs the free block's successor if the two touch.
  fn merge_with_next(
    &mut self,
    offset: usize,
  ) {
    let mut block = Header::read(&self.arena.0, offset);

    let Some(next) = block.next else {
      return;
    };
    if offset + block.footprint() != next {
      return;
    }

    let absorbed = Header::read(&self.arena.0, next);
    block.size += absorbed.footprint();
    block.next = absorbed.next;
    block.write(&mut self.arena.0, offset);

    trace!(offset, absorbed = next, size = block.size, "coalesced free blocks");
  }
}

impl<const N: usize> Default for Heap<N> {
  fn default() -> Self {
    Self::new()
  }
}

impl<const N: usize> fmt::Debug for Heap<N> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Heap")
      .field("capacity", &N)
      .field("head", &self.head)
      .field("live", &self.live.len())
      .field("initialized", &self.initialized)
      .field("coalescing", &self.coalescing)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn layout<const N: usize>(heap: &Heap<N>) -> Vec<(usize, usize)> {
    heap.free_blocks().map(|block| (block.offset, block.size)).collect()
  }

  #[test]
  fn test_initialize() {
    let heap: Heap = Heap::initialized();

    assert_eq!(layout(&heap), vec![(0, HEAP_SIZE - HEADER_SIZE)]);
    assert_eq!(heap.free_footprint(), HEAP_SIZE);
    assert_eq!(heap.live_allocations(), 0);
  }

  #[test]
  fn test_use_before_initialize() {
    let mut heap: Heap = Heap::new();

    assert_eq!(heap.allocate(8), Err(HeapError::NotInitialized));
    assert_eq!(heap.release(Handle::from_offset(16)), Err(HeapError::NotInitialized));
    assert_eq!(heap.free_block_count(), 0);
    assert!(!heap.is_initialized());
  }

  #[test]
  fn test_allocate_splits_first_block() {
    let mut heap: Heap = Heap::initialized();

    let handle = heap.allocate(8).unwrap();

    assert_eq!(handle.offset(), HEADER_SIZE);
    assert_eq!(layout(&heap), vec![(24, HEAP_SIZE - 2 * HEADER_SIZE - 8)]);
    assert_eq!(heap.payload(handle).unwrap().len(), 8);
  }

  #[test]
  fn test_requests_round_up_to_eight() {
    let mut heap: Heap = Heap::initialized();

    let first = heap.allocate(1).unwrap();
    let second = heap.allocate(13).unwrap();

    assert_eq!(heap.payload(first).unwrap().len(), 8);
    assert_eq!(heap.payload(second).unwrap().len(), 16);
    assert_eq!(second.offset(), first.offset() + 8 + HEADER_SIZE);
  }

  #[test]
  fn test_zero_size_is_rejected() {
    let mut heap: Heap = Heap::initialized();

    assert_eq!(heap.allocate(0), Err(HeapError::ZeroSize));
    assert_eq!(layout(&heap), vec![(0, HEAP_SIZE - HEADER_SIZE)]);
  }

  #[test]
  fn test_exhaustion_leaves_heap_untouched() {
    let mut heap: Heap = Heap::initialized();
    heap.allocate(100).unwrap();

    let before = heap.arena.0;
    let head = heap.head;

    assert_eq!(heap.allocate(2000), Err(HeapError::Exhausted { requested: 2000 }));
    assert_eq!(heap.allocate(usize::MAX), Err(HeapError::Exhausted { requested: usize::MAX }));
    assert_eq!(heap.allocate(900), Err(HeapError::Exhausted { requested: 900 }));

    assert_eq!(heap.arena.0, before);
    assert_eq!(heap.head, head);
  }

  #[test]
  fn test_block_without_room_for_split_is_handed_out_whole() {
    let mut heap: Heap = Heap::initialized();

    // 1008 free: 976 + 16 needed leaves 16 bytes, not enough for a header plus payload.
    let handle = heap.allocate(976).unwrap();

    assert_eq!(heap.free_block_count(), 0);
    assert_eq!(heap.payload(handle).unwrap().len(), HEAP_SIZE - HEADER_SIZE);
    assert_eq!(heap.allocate(8), Err(HeapError::Exhausted { requested: 8 }));
  }

  #[test]
  fn test_block_needs_room_for_header_beyond_request() {
    let mut heap: Heap = Heap::initialized();

    // Needed bytes count the header, so the whole-arena request does not fit.
    assert_eq!(
      heap.allocate(HEAP_SIZE - HEADER_SIZE),
      Err(HeapError::Exhausted { requested: HEAP_SIZE - HEADER_SIZE })
    );
    assert!(heap.allocate(HEAP_SIZE - 2 * HEADER_SIZE).is_ok());
  }

  #[test]
  fn test_first_fit_takes_lowest_block() {
    let mut heap: Heap = Heap::initialized();

    let a = heap.allocate(64).unwrap();
    let _b = heap.allocate(8).unwrap();
    let c = heap.allocate(64).unwrap();
    let _d = heap.allocate(8).unwrap();

    heap.release(c).unwrap();
    heap.release(a).unwrap();

    let reused = heap.allocate(16).unwrap();
    assert_eq!(reused, a);
  }

  #[test]
  fn test_release_keeps_address_order() {
    let mut heap: Heap = Heap::initialized();

    let handles: Vec<_> = (0..4).map(|_| heap.allocate(32).unwrap()).collect();

    heap.release(handles[2]).unwrap();
    heap.release(handles[0]).unwrap();
    heap.release(handles[3]).unwrap();
    heap.release(handles[1]).unwrap();

    let offsets: Vec<_> = heap.free_blocks().map(|block| block.offset).collect();
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(offsets.len(), 5);
    assert_eq!(heap.free_footprint(), HEAP_SIZE);
  }

  #[test]
  fn test_release_without_coalescing_fragments() {
    let mut heap: Heap = Heap::initialized();

    let handle = heap.allocate(8).unwrap();
    heap.release(handle).unwrap();

    assert_eq!(layout(&heap), vec![(0, 8), (24, HEAP_SIZE - 2 * HEADER_SIZE - 8)]);
    assert_eq!(heap.free_footprint(), HEAP_SIZE);
  }

  #[test]
  fn test_release_with_coalescing_merges_both_sides() {
    let mut heap: Heap = Heap::with_coalescing(Coalescing::Enabled);
    heap.initialize();
    assert_eq!(heap.coalescing(), Coalescing::Enabled);

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(24).unwrap();
    let c = heap.allocate(40).unwrap();

    heap.release(a).unwrap();
    heap.release(c).unwrap();
    assert_eq!(heap.free_block_count(), 2);

    heap.release(b).unwrap();
    assert_eq!(layout(&heap), vec![(0, HEAP_SIZE - HEADER_SIZE)]);
  }

  #[test]
  fn test_coalescing_skips_non_adjacent_blocks() {
    let mut heap: Heap = Heap::with_coalescing(Coalescing::Enabled);
    heap.initialize();

    let a = heap.allocate(8).unwrap();
    let _b = heap.allocate(8).unwrap();
    let c = heap.allocate(8).unwrap();
    let _d = heap.allocate(8).unwrap();

    heap.release(a).unwrap();
    heap.release(c).unwrap();

    assert_eq!(heap.free_block_count(), 3);
  }

  #[test]
  fn test_double_release_is_rejected() {
    let mut heap: Heap = Heap::initialized();

    let handle = heap.allocate(8).unwrap();
    heap.release(handle).unwrap();
    let before = layout(&heap);

    assert_eq!(
      heap.release(handle),
      Err(HeapError::InvalidPointer { offset: handle.offset() })
    );
    assert_eq!(layout(&heap), before);
  }

  #[test]
  fn test_foreign_handles_are_rejected() {
    let mut heap: Heap = Heap::initialized();
    let handle = heap.allocate(32).unwrap();

    for offset in [0, 3, handle.offset() + 8, HEAP_SIZE + 64, usize::MAX] {
      assert_eq!(
        heap.release(Handle::from_offset(offset)),
        Err(HeapError::InvalidPointer { offset })
      );
    }
    assert_eq!(heap.live_allocations(), 1);
  }

  #[test]
  fn test_initialize_invalidates_handles() {
    let mut heap: Heap = Heap::initialized();
    let handle = heap.allocate(8).unwrap();

    heap.initialize();

    assert_eq!(heap.payload(handle), Err(HeapError::InvalidPointer { offset: handle.offset() }));
    assert_eq!(heap.live_allocations(), 0);
    assert_eq!(layout(&heap), vec![(0, HEAP_SIZE - HEADER_SIZE)]);
  }

  #[test]
  fn test_payload_is_writable_and_kept_after_release() {
    let mut heap: Heap = Heap::initialized();
    let handle = heap.allocate(16).unwrap();

    heap.payload_mut(handle).unwrap().copy_from_slice(&[0xAB; 16]);
    assert_eq!(heap.payload(handle).unwrap(), &[0xAB; 16]);

    heap.release(handle).unwrap();
    assert_eq!(&heap.arena.0[handle.offset()..handle.offset() + 16], &[0xAB; 16]);
  }

  #[test]
  fn test_custom_capacity() {
    let mut heap: Heap<64> = Heap::initialized();

    assert_eq!(heap.capacity(), 64);
    assert_eq!(layout(&heap), vec![(0, 48)]);

    heap.allocate(8).unwrap();
    assert_eq!(layout(&heap), vec![(24, 24)]);
    assert_eq!(heap.largest_free_block(), Some(24));
  }
}
