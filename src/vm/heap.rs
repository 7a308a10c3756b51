//! Guest heap chunks.
//!
//! Every allocation made on behalf of a running program lives here as an
//! owned byte buffer at a virtual base address. Guest pointers are those
//! virtual addresses, never host pointers, and every memory opcode goes
//! through [`ChunkRegistry::load`] or [`ChunkRegistry::store`], which reject
//! any access not fully inside one live chunk.
//!
//! Bases are handed out monotonically with a guard gap between chunks and
//! are never reused, so a freed or overrun pointer cannot alias another
//! allocation.

use tracing::{debug, trace};

use super::{VmError, VmResult};

/// First virtual address handed out.
pub const HEAP_BASE: u64 = 0x1000_0000;

const ALIGN: u64 = 16;
const GUARD: u64 = 16;

/// One outstanding allocation.
#[derive(Debug)]
pub struct Chunk {
    base: u64,
    bytes: Vec<u8>,
}

impl Chunk {
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte offset of `[ptr, ptr + width)` inside this chunk, if it fits.
    fn offset_of(&self, ptr: u64, width: usize) -> Option<usize> {
        let offset = usize::try_from(ptr.checked_sub(self.base)?).ok()?;
        let end = offset.checked_add(width)?;
        (end <= self.bytes.len()).then_some(offset)
    }
}

#[derive(Debug)]
pub struct ChunkRegistry {
    chunks: Vec<Chunk>,
    next_base: u64,
    max_chunks: usize,
    max_bytes: usize,
    live_bytes: usize,
}

impl ChunkRegistry {
    pub fn new(max_chunks: usize, max_bytes: usize) -> Self {
        ChunkRegistry {
            chunks: Vec::new(),
            next_base: HEAP_BASE,
            max_chunks,
            max_bytes,
            live_bytes: 0,
        }
    }

    /// Allocates `len` zeroed bytes and returns the chunk's base address.
    pub fn allocate(&mut self, len: usize) -> VmResult<u64> {
        if self.chunks.len() >= self.max_chunks {
            return Err(VmError::OutOfMemory);
        }
        let live_bytes = self.live_bytes.checked_add(len).ok_or(VmError::OutOfMemory)?;
        if live_bytes > self.max_bytes {
            return Err(VmError::OutOfMemory);
        }

        let base = self.next_base;
        let span = (len as u64)
            .checked_next_multiple_of(ALIGN)
            .and_then(|n| n.checked_add(GUARD))
            .ok_or(VmError::OutOfMemory)?;
        let next_base = base.checked_add(span).ok_or(VmError::OutOfMemory)?;

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|_| VmError::OutOfMemory)?;
        bytes.resize(len, 0);

        self.chunks.push(Chunk { base, bytes });
        self.next_base = next_base;
        self.live_bytes = live_bytes;
        trace!(base = format_args!("{base:#x}"), len, "chunk allocated");
        Ok(base)
    }

    /// Releases the chunk whose base is exactly `ptr`. Later chunks keep
    /// their relative order.
    pub fn release(&mut self, ptr: u64) -> VmResult<()> {
        let index = self
            .chunks
            .iter()
            .position(|chunk| chunk.base == ptr)
            .ok_or(VmError::BadMemoryPointer)?;
        let chunk = self.chunks.remove(index);
        self.live_bytes -= chunk.len();
        trace!(base = format_args!("{ptr:#x}"), len = chunk.len(), "chunk released");
        Ok(())
    }

    /// Reads `width` bytes at `ptr`, little-endian, zero-extended.
    pub fn load(&self, ptr: u64, width: usize) -> VmResult<u64> {
        let (chunk, offset) = self.locate(ptr, width)?;
        let mut word = [0u8; 8];
        word[..width].copy_from_slice(&chunk.bytes[offset..offset + width]);
        Ok(u64::from_le_bytes(word))
    }

    /// Writes the low `width` bytes of `value` at `ptr`, little-endian.
    pub fn store(&mut self, ptr: u64, width: usize, value: u64) -> VmResult<()> {
        let index = self.locate_index(ptr, width)?;
        let chunk = &mut self.chunks[index];
        let offset = chunk.offset_of(ptr, width).ok_or(VmError::BadMemoryPointer)?;
        chunk.bytes[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    fn locate(&self, ptr: u64, width: usize) -> VmResult<(&Chunk, usize)> {
        self.chunks
            .iter()
            .find_map(|chunk| chunk.offset_of(ptr, width).map(|offset| (chunk, offset)))
            .ok_or(VmError::BadMemoryPointer)
    }

    fn locate_index(&self, ptr: u64, width: usize) -> VmResult<usize> {
        self.chunks
            .iter()
            .position(|chunk| chunk.offset_of(ptr, width).is_some())
            .ok_or(VmError::BadMemoryPointer)
    }
}

impl Drop for ChunkRegistry {
    fn drop(&mut self) {
        if !self.chunks.is_empty() {
            debug!(chunks = self.chunks.len(), bytes = self.live_bytes, "releasing live chunks at teardown");
        }
    }
}
