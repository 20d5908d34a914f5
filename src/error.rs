/// Errors returned by [`Heap`](crate::Heap) operations.
///
/// A failed operation never modifies the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
  #[error("heap used before initialize()")]
  NotInitialized,

  #[error("zero-byte allocation requested")]
  ZeroSize,

  #[error("no free block can hold {requested} bytes")]
  Exhausted { requested: usize },

  #[error("offset {offset} is not a live allocation")]
  InvalidPointer { offset: usize },
}
