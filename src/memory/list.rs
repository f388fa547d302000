/*
 * Free-List Region Allocator
 *
 * Uses linked_list_allocator::Heap on top of a 1 MiB backing region taken
 * from the process allocator. Each region is laid out as
 *
 *   [ RegionHeader | user bytes ... ]
 *                  ^ returned pointer, 16-byte aligned
 *
 * Release checks alignment, then bounds, then both header magics, and only
 * then hands the block back to the heap with the layout it was carved with.
 */

use core::ptr::NonNull;
use std::alloc::{Layout, alloc_zeroed, dealloc};

use linked_list_allocator::Heap;

use super::{REGION_ALIGN, RegionAllocator, RegionHeader, random_magic};
use crate::error::{Error, Result};

/// Backing region size (1 MiB)
pub const LIST_HEAP_SIZE: usize = 1024 * 1024;

/// Region allocator over a free-list heap
pub struct ListAllocator {
    heap: Heap,
    backing: Option<NonNull<u8>>,
    magic: u128,
}

impl ListAllocator {
    pub fn new() -> Self {
        Self {
            heap: Heap::empty(),
            backing: None,
            magic: 0,
        }
    }

    /// Bytes currently handed out, headers included
    pub fn used(&self) -> usize {
        self.heap.used()
    }

    fn backing_layout() -> Layout {
        Layout::from_size_align(LIST_HEAP_SIZE, REGION_ALIGN).unwrap_or_else(|_| unreachable!())
    }

    fn region_layout(size: usize) -> Option<Layout> {
        let total = size.checked_add(RegionHeader::SIZE)?;
        Layout::from_size_align(total, REGION_ALIGN).ok()
    }
}

impl Default for ListAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ListAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListAllocator")
            .field("backing", &self.backing)
            .field("used", &self.heap.used())
            .field("free", &self.heap.free())
            .finish()
    }
}

impl RegionAllocator for ListAllocator {
    fn init(&mut self) -> Result<()> {
        if self.backing.is_some() {
            return Ok(());
        }
        let layout = Self::backing_layout();
        // SAFETY: layout has a non-zero size
        let base = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Error::OutOfMemory {
            requested: LIST_HEAP_SIZE,
        })?;

        // SAFETY: the region is exclusively ours until deinit
        unsafe { self.heap.init(base.as_ptr(), LIST_HEAP_SIZE) };
        self.backing = Some(base);
        self.magic = random_magic();
        log::debug!("list allocator ready: {} KiB heap", LIST_HEAP_SIZE / 1024);
        Ok(())
    }

    fn deinit(&mut self) {
        if let Some(base) = self.backing.take() {
            self.heap = Heap::empty();
            // SAFETY: allocated in init with the same layout
            unsafe { dealloc(base.as_ptr(), Self::backing_layout()) };
        }
        self.magic = 0;
    }

    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || self.backing.is_none() {
            return None;
        }
        let layout = Self::region_layout(size)?;

        let Ok(block) = self.heap.allocate_first_fit(layout) else {
            log::warn!(
                "list allocator: no feasible region for {} bytes ({} free)",
                size,
                self.heap.free()
            );
            return None;
        };

        // SAFETY: block is at least header + size bytes and 16-byte aligned
        unsafe {
            RegionHeader::new(self.magic, size).write(block.as_ptr());
            NonNull::new(block.as_ptr().add(RegionHeader::SIZE))
        }
    }

    fn release(&mut self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        if self.backing.is_none() || ptr as usize % REGION_ALIGN != 0 {
            log::warn!("list allocator: rejecting unaligned pointer {:p}", ptr);
            return Err(Error::InvalidRegion);
        }

        let lower = self.heap.bottom() as usize + RegionHeader::SIZE;
        let upper = self.heap.top() as usize;
        let addr = ptr as usize;
        if addr < lower || addr >= upper {
            log::warn!("list allocator: {:p} is outside the heap", ptr);
            return Err(Error::InvalidRegion);
        }

        // SAFETY: the header lies inside the zero-initialized backing region
        let header_ptr = unsafe { ptr.sub(RegionHeader::SIZE) };
        let header = unsafe { RegionHeader::read(header_ptr) };
        if !header.is_valid(self.magic) {
            log::warn!("list allocator: bad header for {:p}", ptr);
            return Err(Error::InvalidRegion);
        }
        let Some(layout) = Self::region_layout(header.size) else {
            return Err(Error::InvalidRegion);
        };
        if addr - RegionHeader::SIZE + layout.size() > upper {
            return Err(Error::InvalidRegion);
        }

        // SAFETY: header verified, so this block came from allocate_first_fit
        // with exactly this layout
        unsafe {
            RegionHeader::invalidate(header_ptr);
            self.heap.deallocate(NonNull::new_unchecked(header_ptr), layout);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "list"
    }
}

impl Drop for ListAllocator {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> ListAllocator {
        let mut allocator = ListAllocator::new();
        allocator.init().unwrap();
        allocator
    }

    #[test]
    fn zero_size_returns_none_and_uses_nothing() {
        let mut allocator = ready();
        assert!(allocator.allocate(0).is_none());
        assert_eq!(allocator.used(), 0);
    }

    #[test]
    fn small_regions_are_aligned() {
        let mut allocator = ready();
        let a = allocator.allocate(1).unwrap();
        let b = allocator.allocate(128).unwrap();
        assert_eq!(a.as_ptr() as usize % REGION_ALIGN, 0);
        assert_eq!(b.as_ptr() as usize % REGION_ALIGN, 0);
        assert_ne!(a, b);

        allocator.release(a.as_ptr()).unwrap();
        allocator.release(b.as_ptr()).unwrap();
        assert_eq!(allocator.used(), 0);
    }

    #[test]
    fn freed_space_is_reused() {
        let mut allocator = ready();
        let big = allocator.allocate(LIST_HEAP_SIZE / 2).unwrap();
        assert!(allocator.allocate(LIST_HEAP_SIZE / 2).is_none());
        allocator.release(big.as_ptr()).unwrap();
        assert!(allocator.allocate(LIST_HEAP_SIZE / 2).is_some());
    }

    #[test]
    fn bad_pointers_are_rejected_without_damage() {
        let mut allocator = ready();
        let region = allocator.allocate(64).unwrap();
        let used = allocator.used();

        let unaligned = unsafe { region.as_ptr().add(1) };
        assert_eq!(allocator.release(unaligned), Err(Error::InvalidRegion));

        let mut local = [0u8; 32];
        let outside = local.as_mut_ptr().wrapping_add(16 - local.as_ptr() as usize % 16);
        assert_eq!(allocator.release(outside), Err(Error::InvalidRegion));

        let no_header = unsafe { region.as_ptr().add(32) };
        assert_eq!(allocator.release(no_header), Err(Error::InvalidRegion));

        assert_eq!(allocator.used(), used);
        allocator.release(region.as_ptr()).unwrap();
        assert_eq!(allocator.release(region.as_ptr()), Err(Error::InvalidRegion));
    }
}
