//! # Hosted physical memory
//!
//! [`HostedRam`] stands in for a contiguous range of physical RAM when the
//! memory subsystem runs as an ordinary process (unit tests, simulations).
//! Every "physical" page is a 4 KiB-aligned heap frame, so page tables and
//! intrusive free lists can live in it exactly as they would on hardware.

use crate::PhysMapper;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};

#[allow(clippy::cast_possible_truncation)]
const FRAME_BYTES: usize = PAGE_SIZE as usize;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; FRAME_BYTES]>);

/// Heap-backed physical memory covering `[base, base + pages * 4096)`.
pub struct HostedRam {
    base: PhysicalPage,
    frames: Box<[Frame]>,
}

// Safety: the arena hands out raw pointers only; whoever writes through them
// (page tables, the frame allocator) provides the mutual exclusion, as it
// would for real RAM.
unsafe impl Sync for HostedRam {}

impl HostedRam {
    /// Zero-filled memory of `pages` pages starting at physical page `base`.
    #[must_use]
    pub fn new(base: PhysicalPage, pages: usize) -> Self {
        let frames = (0..pages)
            .map(|_| Frame(UnsafeCell::new([0; FRAME_BYTES])))
            .collect();
        Self { base, frames }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalPage {
        self.base
    }

    /// First physical address past the arena.
    #[inline]
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.base.base() + self.frames.len() as u64 * PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub fn pages(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa >= self.base.base() && pa < self.end()
    }

    /// Copy of the current contents of `page`.
    ///
    /// # Panics
    /// If `page` is outside the arena.
    #[must_use]
    pub fn read_page(&self, page: PhysicalPage) -> Vec<u8> {
        let ptr = self.phys_to_ptr(page.base());
        // Safety: in bounds (checked above) and valid for a full frame.
        unsafe { core::slice::from_raw_parts(ptr, FRAME_BYTES) }.to_vec()
    }

    /// Overwrite bytes starting at `pa`.
    ///
    /// # Panics
    /// If the write would leave the page containing `pa`.
    pub fn write(&self, pa: PhysicalAddress, bytes: &[u8]) {
        #[allow(clippy::cast_possible_truncation)]
        let offset = pa.offset() as usize;
        assert!(
            offset + bytes.len() <= FRAME_BYTES,
            "write crosses the page boundary at {pa}"
        );
        let ptr = self.phys_to_ptr(pa);
        // Safety: bounds checked against the containing frame.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
    }
}

impl PhysMapper for HostedRam {
    /// # Panics
    /// If `pa` is outside the arena.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        assert!(self.contains(pa), "physical address {pa} is not backed by hosted RAM");
        #[allow(clippy::cast_possible_truncation)]
        let index = (pa.page().number() - self.base.number()) as usize;
        #[allow(clippy::cast_possible_truncation)]
        let offset = pa.offset() as usize;
        // Safety: `offset` < FRAME_BYTES.
        unsafe { self.frames[index].0.get().cast::<u8>().add(offset) }
    }
}
