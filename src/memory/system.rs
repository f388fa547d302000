/*
 * System Region Allocator
 *
 * Every region is its own allocation from the std global allocator, with a
 * RegionHeader in front. Live regions are tracked by address so release
 * can reject foreign pointers before it ever reads a header.
 */

use alloc::collections::BTreeMap;
use core::ptr::NonNull;
use std::alloc::{Layout, alloc, dealloc};

use super::{REGION_ALIGN, RegionAllocator, RegionHeader, random_magic};
use crate::error::{Error, Result};

/// Region allocator backed by the process allocator
#[derive(Debug, Default)]
pub struct SystemAllocator {
    magic: u128,

    /// User pointer -> layout of the underlying allocation
    live: BTreeMap<usize, Layout>,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of regions currently handed out
    pub fn live_regions(&self) -> usize {
        self.live.len()
    }

    fn layout_for(size: usize) -> Option<Layout> {
        let total = size.checked_add(RegionHeader::SIZE)?;
        Layout::from_size_align(total, REGION_ALIGN).ok()
    }
}

impl RegionAllocator for SystemAllocator {
    fn init(&mut self) -> Result<()> {
        self.magic = random_magic();
        log::debug!("system allocator ready");
        Ok(())
    }

    fn deinit(&mut self) {
        for (ptr, layout) in core::mem::take(&mut self.live) {
            let base = (ptr - RegionHeader::SIZE) as *mut u8;
            // SAFETY: every entry was produced by `alloc` with this layout
            unsafe { dealloc(base, layout) };
        }
        self.magic = 0;
    }

    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || self.magic == 0 {
            return None;
        }
        let layout = Self::layout_for(size)?;

        // SAFETY: layout has a non-zero size
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            log::warn!("system allocator: {} byte request failed", size);
            return None;
        }

        // SAFETY: base is fresh, aligned to 16 and at least a header long
        unsafe {
            RegionHeader::new(self.magic, size).write(base);
        }
        let ptr = unsafe { base.add(RegionHeader::SIZE) };
        self.live.insert(ptr as usize, layout);
        NonNull::new(ptr)
    }

    fn release(&mut self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let Some(&layout) = self.live.get(&(ptr as usize)) else {
            log::warn!("system allocator: rejecting foreign pointer {:p}", ptr);
            return Err(Error::InvalidRegion);
        };

        // SAFETY: ptr is a live region, so a header precedes it
        let base = unsafe { ptr.sub(RegionHeader::SIZE) };
        let header = unsafe { RegionHeader::read(base) };
        if !header.is_valid(self.magic) {
            log::warn!("system allocator: corrupted header at {:p}", base);
            return Err(Error::InvalidRegion);
        }

        self.live.remove(&(ptr as usize));
        // SAFETY: allocated above with exactly this layout
        unsafe { dealloc(base, layout) };
        Ok(())
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

impl Drop for SystemAllocator {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> SystemAllocator {
        let mut allocator = SystemAllocator::new();
        allocator.init().unwrap();
        allocator
    }

    #[test]
    fn zero_size_returns_none() {
        let mut allocator = ready();
        assert!(allocator.allocate(0).is_none());
        assert_eq!(allocator.live_regions(), 0);
    }

    #[test]
    fn regions_are_aligned_and_writable() {
        let mut allocator = ready();
        let region = allocator.allocate(100).unwrap();
        assert_eq!(region.as_ptr() as usize % REGION_ALIGN, 0);
        unsafe { region.as_ptr().write_bytes(0xab, 100) };
        allocator.release(region.as_ptr()).unwrap();
        assert_eq!(allocator.live_regions(), 0);
    }

    #[test]
    fn null_release_is_a_no_op() {
        let mut allocator = ready();
        assert_eq!(allocator.release(core::ptr::null_mut()), Ok(()));
    }

    #[test]
    fn foreign_and_double_release_are_rejected() {
        let mut allocator = ready();
        let region = allocator.allocate(32).unwrap();
        let mut local = [0u8; 64];

        assert_eq!(allocator.release(local.as_mut_ptr()), Err(Error::InvalidRegion));
        allocator.release(region.as_ptr()).unwrap();
        assert_eq!(allocator.release(region.as_ptr()), Err(Error::InvalidRegion));
    }

    #[test]
    fn allocate_before_init_fails() {
        let mut allocator = SystemAllocator::new();
        assert!(allocator.allocate(16).is_none());
    }
}
