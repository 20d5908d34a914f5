use std::{fmt, io};

use crate::{Heap, block::Header};

/// A node of the free list as seen by the diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
  /// Address of the block header in memory.
  pub address: usize,
  /// Offset of the block header from the arena base.
  pub offset: usize,
  /// Free payload bytes.
  pub size: usize,
}

impl fmt::Display for FreeBlock {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "Block at {:#x} (offset: {}), size {}",
      self.address, self.offset, self.size
    )
  }
}

/// Iterator over the free list, lowest address first.
pub struct FreeBlocks<'a> {
  arena: &'a [u8],
  cursor: Option<usize>,
}

impl<'a> FreeBlocks<'a> {
  pub(crate) fn new(
    arena: &'a [u8],
    head: Option<usize>,
  ) -> Self {
    Self { arena, cursor: head }
  }
}

impl Iterator for FreeBlocks<'_> {
  type Item = FreeBlock;

  fn next(&mut self) -> Option<Self::Item> {
    let offset = self.cursor?;
    let header = Header::read(self.arena, offset);
    self.cursor = header.next;

    Some(FreeBlock {
      address: self.arena.as_ptr().addr() + offset,
      offset,
      size: header.size,
    })
  }
}

impl<const N: usize> Heap<N> {
  /// Writes the free list to `out`, one line per block.
  pub fn dump_to<W: io::Write>(
    &self,
    mut out: W,
  ) -> io::Result<()> {
    writeln!(out, "MEMORY DUMP")?;
    writeln!(out, "Free List")?;

    for block in self.free_blocks() {
      writeln!(out, "{block}")?;
    }

    Ok(())
  }

  /// Prints the free list to stdout.
  pub fn dump(&self) {
    let stdout = io::stdout();
    if let Err(err) = self.dump_to(stdout.lock()) {
      tracing::warn!(%err, "failed to write memory dump");
    }
  }
}
