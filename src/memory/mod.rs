/*
 * Region Allocators
 *
 * Thread stacks are obtained through a four-function collaborator:
 *  - init:     prepare the backing region
 *  - deinit:   give the backing region back
 *  - allocate: hand out a region (None for zero bytes or exhaustion)
 *  - release:  take a region back (no-op on null, rejects foreign pointers)
 *
 * Backends:
 *  - system: std allocator, one tracked allocation per region
 *  - chunk:  fixed arena of equal chunks, first fit over a chunk bitmap
 *  - list:   free-list heap (linked_list_allocator) over a 1 MiB region
 *
 * Every region is preceded by a RegionHeader carrying the requested size
 * between two copies of a per-allocator random magic. Release checks the
 * magic before trusting the size.
 */

pub mod chunk;
pub mod list;
pub mod system;

use core::ptr::NonNull;

pub use chunk::ChunkAllocator;
pub use list::ListAllocator;
pub use system::SystemAllocator;

use crate::error::Result;

/// Alignment of every region handed out
pub const REGION_ALIGN: usize = 16;

/// Interface the runtime uses to obtain and return stack regions
pub trait RegionAllocator {
    /// Prepare the backing region
    ///
    /// Fails with `OutOfMemory` when the backing region cannot be obtained.
    fn init(&mut self) -> Result<()>;

    /// Release the backing region and forget every outstanding region
    ///
    /// Calling it twice, or before `init`, does nothing.
    fn deinit(&mut self);

    /// A region of at least `size` bytes aligned to [`REGION_ALIGN`]
    ///
    /// Returns `None` for `size == 0` without touching any state, and when
    /// no feasible region exists.
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Give back a region returned by `allocate`
    ///
    /// Null is accepted and ignored. A pointer this allocator did not hand
    /// out is rejected with `InvalidRegion` and leaves the allocator intact.
    fn release(&mut self, ptr: *mut u8) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Header written in front of every region
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionHeader {
    pub magic0: u128,
    pub size: usize,
    pub magic1: u128,
}

impl RegionHeader {
    pub const SIZE: usize = core::mem::size_of::<RegionHeader>();

    pub fn new(magic: u128, size: usize) -> Self {
        Self {
            magic0: magic,
            size,
            magic1: magic,
        }
    }

    pub fn is_valid(&self, magic: u128) -> bool {
        self.magic0 == magic && self.magic1 == magic
    }

    /// # Safety
    /// `at` must be valid for a 16-byte aligned write of a header.
    pub unsafe fn write(self, at: *mut u8) {
        unsafe { at.cast::<RegionHeader>().write(self) }
    }

    /// # Safety
    /// `at` must point to initialized, allocator-owned memory large enough
    /// for a header and aligned to 16.
    pub unsafe fn read(at: *const u8) -> Self {
        unsafe { at.cast::<RegionHeader>().read() }
    }

    /// Overwrite the magic so a second release of the region is caught
    ///
    /// # Safety
    /// Same as [`RegionHeader::write`].
    pub unsafe fn invalidate(at: *mut u8) {
        unsafe { RegionHeader::new(0, 0).write(at) }
    }
}

/// Fresh magic for an allocator instance
pub(crate) fn random_magic() -> u128 {
    loop {
        let magic: u128 = rand::random();
        // Zero marks an invalidated header
        if magic != 0 {
            return magic;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keeps_regions_aligned() {
        assert_eq!(RegionHeader::SIZE % REGION_ALIGN, 0);
    }

    #[test]
    fn header_validation_needs_both_magics() {
        let magic = random_magic();
        let mut header = RegionHeader::new(magic, 64);
        assert!(header.is_valid(magic));
        header.magic1 ^= 1;
        assert!(!header.is_valid(magic));
    }
}
