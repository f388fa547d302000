/*
 * Chunk Region Allocator
 *
 * A fixed arena of CHUNK_ARENA_LENGTH chunks of CHUNK_SIZE bytes, with one
 * taken/free flag per chunk. A request for `size` bytes reserves
 * `1 + ceil(size / CHUNK_SIZE)` contiguous chunks, first fit:
 *
 *   +--------------+--------------+-----+--------------+
 *   | header chunk | user chunk 0 | ... | user chunk n |
 *   +--------------+--------------+-----+--------------+
 *                  ^ returned pointer
 *
 * The header chunk holds `magic0, size, magic1`. Release only trusts the
 * header once the pointer is known to be chunk aligned and inside the
 * arena.
 */

use alloc::vec::Vec;
use core::ptr::NonNull;
use std::alloc::{Layout, alloc_zeroed, dealloc};

use super::{RegionAllocator, RegionHeader, random_magic};
use crate::error::{Error, Result};

/// Size of one chunk
pub const CHUNK_SIZE: usize = 4096;

/// Number of chunks in the arena (1 MiB)
pub const CHUNK_ARENA_LENGTH: usize = 256;

/// Region allocator over a fixed chunk arena
#[derive(Debug)]
pub struct ChunkAllocator {
    arena: Option<NonNull<u8>>,
    taken: Vec<bool>,
    magic: u128,
}

impl ChunkAllocator {
    pub fn new() -> Self {
        Self {
            arena: None,
            taken: Vec::new(),
            magic: 0,
        }
    }

    /// Chunks a request of `size` bytes occupies, header included
    pub fn chunks_for(size: usize) -> usize {
        1 + size.div_ceil(CHUNK_SIZE)
    }

    /// Number of chunks currently taken
    pub fn taken_chunks(&self) -> usize {
        self.taken.iter().filter(|&&t| t).count()
    }

    fn layout() -> Layout {
        // Both values are non-zero powers of two
        Layout::from_size_align(CHUNK_SIZE * CHUNK_ARENA_LENGTH, CHUNK_SIZE)
            .unwrap_or_else(|_| unreachable!())
    }

    /// First index of `count` free chunks in a row
    fn find_contiguous(&self, count: usize) -> Option<usize> {
        let mut start = 0;
        while start + count <= self.taken.len() {
            match self.taken[start..start + count].iter().rposition(|&t| t) {
                // Restart just past the last taken chunk in the window
                Some(offset) => start += offset + 1,
                None => return Some(start),
            }
        }
        None
    }
}

impl Default for ChunkAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionAllocator for ChunkAllocator {
    fn init(&mut self) -> Result<()> {
        if self.arena.is_some() {
            return Ok(());
        }
        let layout = Self::layout();
        // SAFETY: layout has a non-zero size
        let base = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Error::OutOfMemory {
            requested: layout.size(),
        })?;

        self.arena = Some(base);
        self.taken = alloc::vec![false; CHUNK_ARENA_LENGTH];
        self.magic = random_magic();
        log::debug!(
            "chunk allocator ready: {} chunks of {} bytes",
            CHUNK_ARENA_LENGTH,
            CHUNK_SIZE
        );
        Ok(())
    }

    fn deinit(&mut self) {
        if let Some(base) = self.arena.take() {
            // SAFETY: allocated in init with the same layout
            unsafe { dealloc(base.as_ptr(), Self::layout()) };
        }
        self.taken.clear();
        self.magic = 0;
    }

    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let base = self.arena?;

        let count = Self::chunks_for(size);
        if count > CHUNK_ARENA_LENGTH {
            log::warn!("chunk allocator: {} bytes exceeds the arena", size);
            return None;
        }
        let Some(start) = self.find_contiguous(count) else {
            log::warn!("chunk allocator: no {} contiguous chunks free", count);
            return None;
        };

        self.taken[start..start + count].fill(true);

        // SAFETY: start + count <= CHUNK_ARENA_LENGTH, so both the header
        // chunk and the user chunks are inside the arena
        unsafe {
            let header = base.as_ptr().add(start * CHUNK_SIZE);
            RegionHeader::new(self.magic, size).write(header);
            NonNull::new(header.add(CHUNK_SIZE))
        }
    }

    fn release(&mut self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let Some(base) = self.arena else {
            return Err(Error::InvalidRegion);
        };

        let lower = base.as_ptr() as usize + CHUNK_SIZE;
        let upper = base.as_ptr() as usize + CHUNK_SIZE * CHUNK_ARENA_LENGTH;
        let addr = ptr as usize;
        if addr < lower || addr >= upper || (addr - lower) % CHUNK_SIZE != 0 {
            log::warn!("chunk allocator: {:p} is not a chunk of this arena", ptr);
            return Err(Error::InvalidRegion);
        }

        let start = (addr - lower) / CHUNK_SIZE;
        // SAFETY: the header chunk lies inside the zero-initialized arena
        let header_ptr = unsafe { ptr.sub(CHUNK_SIZE) };
        let header = unsafe { RegionHeader::read(header_ptr) };
        if !self.taken[start] || !header.is_valid(self.magic) {
            log::warn!("chunk allocator: bad header for {:p}", ptr);
            return Err(Error::InvalidRegion);
        }

        let count = Self::chunks_for(header.size);
        if start + count > CHUNK_ARENA_LENGTH {
            return Err(Error::InvalidRegion);
        }
        self.taken[start..start + count].fill(false);
        unsafe { RegionHeader::invalidate(header_ptr) };
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chunk"
    }
}

impl Drop for ChunkAllocator {
    fn drop(&mut self) {
        self.deinit();
    }
}
