use std::ops::Range;

/// Size in bytes of the header stored in front of every block.
pub const HEADER_SIZE: usize = 16;

const SIZE_FIELD: Range<usize> = 0..8;
const NEXT_FIELD: Range<usize> = 8..16;
const NONE: u64 = u64::MAX;

/// In-arena block header.
///
/// Encoded as two little-endian `u64`s: the payload size and the offset of
/// the next free header (`u64::MAX` when there is none). `next` is only
/// meaningful while the block sits on the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  pub size: usize,
  pub next: Option<usize>,
}

impl Header {
  pub fn new(
    size: usize,
    next: Option<usize>,
  ) -> Self {
    Self { size, next }
  }

  /// Decodes the header stored at `offset`.
  pub fn read(
    arena: &[u8],
    offset: usize,
  ) -> Self {
    let bytes = &arena[offset..offset + HEADER_SIZE];

    let size = u64::from_le_bytes(field(bytes, SIZE_FIELD));
    let next = match u64::from_le_bytes(field(bytes, NEXT_FIELD)) {
      NONE => None,
      next => Some(next as usize),
    };

    Self::new(size as usize, next)
  }

  /// Encodes this header at `offset`.
  pub fn write(
    &self,
    arena: &mut [u8],
    offset: usize,
  ) {
    let bytes = &mut arena[offset..offset + HEADER_SIZE];
    let next = self.next.map_or(NONE, |next| next as u64);

    bytes[SIZE_FIELD].copy_from_slice(&(self.size as u64).to_le_bytes());
    bytes[NEXT_FIELD].copy_from_slice(&next.to_le_bytes());
  }

  /// Bytes the block occupies in the arena, header included.
  pub fn footprint(&self) -> usize {
    HEADER_SIZE + self.size
  }
}

fn field(
  bytes: &[u8],
  range: Range<usize>,
) -> [u8; 8] {
  let mut out = [0u8; 8];
  out.copy_from_slice(&bytes[range]);
  out
}
