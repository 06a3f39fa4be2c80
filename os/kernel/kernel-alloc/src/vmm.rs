//! Minimal Virtual Memory Manager (VMM) for one user address space.
//!
//! Binds an [`AddressSpace`] to the [`FrameAllocator`] so that page-table
//! frames are ordinary reference-counted pages, and exposes the result as
//! [`PageTableOps`] for the fault resolver. The address space is not tied to
//! a processor: every call that needs frames names the CPU it runs on.
//!
//! # Example
//! ```ignore
//! use kernel_alloc::{CpuFrames, FrameAllocator, Vmm};
//! let mut vmm = Vmm::new(&frames, cpu)?;
//! vmm.map(&mut CpuFrames::new(&frames, cpu), va, page, PagePermissions::READ | PagePermissions::USER)?;
//! ```

use crate::FrameAllocator;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::CpuId;
use kernel_vmem::{
    AddressSpace, FrameAlloc, MapError, PagePermissions, PageTableOps, PhysMapper, Translation,
};

/// [`FrameAlloc`] view of the frame allocator for one CPU.
pub struct CpuFrames<'a, M: PhysMapper> {
    frames: &'a FrameAllocator<M>,
    cpu: CpuId,
}

impl<'a, M: PhysMapper> CpuFrames<'a, M> {
    pub const fn new(frames: &'a FrameAllocator<M>, cpu: CpuId) -> Self {
        Self { frames, cpu }
    }
}

impl<M: PhysMapper> FrameAlloc for CpuFrames<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.frames.allocate_page(self.cpu).ok()
    }

    fn free_4k(&mut self, page: PhysicalPage) {
        self.frames.release_page(self.cpu, page);
    }
}

/// A user address space whose tables come from the frame allocator.
pub struct Vmm<'a, M: PhysMapper> {
    space: AddressSpace<'a, M>,
    frames: &'a FrameAllocator<M>,
}

impl<'a, M: PhysMapper> Vmm<'a, M> {
    /// Create an empty address space; the root table is taken from `cpu`.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is left for the root table.
    pub fn new(frames: &'a FrameAllocator<M>, cpu: CpuId) -> Result<Self, MapError> {
        let space = AddressSpace::new(frames.mapper(), &mut CpuFrames::new(frames, cpu))?;
        Ok(Self { space, frames })
    }

    /// Physical page of the root table, as loaded into CR3.
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage {
        self.space.root_page()
    }

    /// Translate VA→PA if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space.translate(va)
    }

    /// Return all page-table frames to `cpu`'s free list. Leaves must
    /// already be unmapped. Returns the number of frames released.
    pub fn destroy(self, cpu: CpuId) -> usize {
        let Self { space, frames } = self;
        space.destroy(&mut CpuFrames::new(frames, cpu))
    }
}

impl<M: PhysMapper> PageTableOps for Vmm<'_, M> {
    fn lookup(&self, va: VirtualPage) -> Option<Translation> {
        self.space.lookup(va)
    }

    fn map<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualPage,
        page: PhysicalPage,
        perms: PagePermissions,
    ) -> Result<(), MapError> {
        self.space.map(alloc, va, page, perms)
    }

    fn set_dirty_writable(&mut self, va: VirtualPage) -> Result<(), MapError> {
        self.space.set_dirty_writable(va).map(|_| ())
    }

    fn unmap(&mut self, va: VirtualPage) -> Result<PhysicalPage, MapError> {
        self.space.unmap(va)
    }
}
