//! # Address Space (x86-64, PML4-rooted)
//!
//! One translation tree for the user half of a process. Leaves are always
//! 4 KiB; intermediate tables are allocated on demand from a [`FrameAlloc`]
//! and handed back by [`AddressSpace::destroy`].
//!
//! `unsafe` is confined to viewing a table frame through the [`PhysMapper`].
//! Callers serialize mutation of one address space (it belongs to a single
//! process).

use crate::page_table::ENTRIES;
use crate::{
    FrameAlloc, Level, MapError, PageEntryBits, PagePermissions, PageTable, PhysMapper,
    Translation, invalidate_tlb_page,
};
use kernel_info::memory::USER_SPACE_END;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage, // PML4 frame
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate and clear a fresh PML4.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if `alloc` has no frame.
    pub fn new<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let root = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
        let space = Self { root, mapper };
        space.table(root).zero();
        Ok(space)
    }

    /// Physical page of the PML4.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table(&self, page: PhysicalPage) -> &mut PageTable {
        // Safety: every frame reached from `root` holds a page table, and the
        // owning process serializes access to its address space.
        unsafe { self.mapper.phys_to_mut::<PageTable>(page.base()) }
    }

    fn check_range(va: VirtualPage) -> Result<(), MapError> {
        if va.base().as_u64() < USER_SPACE_END {
            Ok(())
        } else {
            Err(MapError::OutOfRange(va))
        }
    }

    /// The leaf slot for `va` if every intermediate table exists.
    #[allow(clippy::mut_from_ref)]
    fn leaf_slot(&self, va: VirtualPage) -> Option<&mut PageEntryBits> {
        if Self::check_range(va).is_err() {
            return None;
        }
        let mut table = self.root;
        for level in Level::INTERMEDIATE {
            let entry = *self.table(table).entry_mut(level.index_of(va));
            if !entry.present() {
                return None;
            }
            table = entry.frame();
        }
        Some(self.table(table).entry_mut(Level::L1.index_of(va)))
    }

    /// The leaf slot for `va`, creating missing intermediate tables.
    #[allow(clippy::mut_from_ref)]
    fn leaf_slot_or_create<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualPage,
    ) -> Result<&mut PageEntryBits, MapError> {
        Self::check_range(va)?;
        let mut table = self.root;
        for level in Level::INTERMEDIATE {
            let entry = self.table(table).entry_mut(level.index_of(va));
            if !entry.present() {
                let fresh = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
                self.table(fresh).zero();
                *entry = PageEntryBits::table_link(fresh);
                log::trace!("new {:?} table at {fresh} for {va:?}", level.next());
            }
            table = entry.frame();
        }
        Ok(self.table(table).entry_mut(Level::L1.index_of(va)))
    }

    /// The present leaf translation for `va`.
    #[must_use]
    pub fn lookup(&self, va: VirtualPage) -> Option<Translation> {
        let entry = *self.leaf_slot(va)?;
        entry.present().then(|| Translation::new(entry))
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va.page()).map(|t| t.page().join(va.offset()))
    }

    /// Map one 4 KiB page `va -> page`.
    ///
    /// # Errors
    /// - [`MapError::AlreadyMapped`] if `va` has a translation.
    /// - [`MapError::OutOfMemory`] if an intermediate table is needed and
    ///   `alloc` is empty. Tables created before the failure stay linked.
    /// - [`MapError::OutOfRange`] for kernel-half addresses.
    pub fn map<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualPage,
        page: PhysicalPage,
        perms: PagePermissions,
    ) -> Result<(), MapError> {
        let slot = self.leaf_slot_or_create(alloc, va)?;
        if slot.present() {
            return Err(MapError::AlreadyMapped(va));
        }
        *slot = PageEntryBits::leaf(page, perms);
        Ok(())
    }

    /// Grant write access on an existing leaf and mark it dirty.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if `va` has no translation.
    pub fn set_dirty_writable(&self, va: VirtualPage) -> Result<Translation, MapError> {
        let slot = self
            .leaf_slot(va)
            .filter(|e| e.present())
            .ok_or(MapError::NotMapped(va))?;
        slot.set_writable(true);
        slot.set_dirty(true);
        let updated = Translation::new(*slot);
        invalidate_tlb_page(va);
        Ok(updated)
    }

    /// Clear the leaf for `va`, returning the page it mapped.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if `va` has no translation.
    pub fn unmap(&self, va: VirtualPage) -> Result<PhysicalPage, MapError> {
        let slot = self
            .leaf_slot(va)
            .filter(|e| e.present())
            .ok_or(MapError::NotMapped(va))?;
        let page = slot.frame();
        *slot = PageEntryBits::new();
        invalidate_tlb_page(va);
        Ok(page)
    }

    /// Return every table frame of the user half, and the root, to `alloc`.
    ///
    /// Leaf pages are not touched: they belong to whoever mapped them and
    /// should have been unmapped first. Leaves still present are reported and
    /// left alone. Returns the number of frames freed.
    pub fn destroy<A: FrameAlloc>(self, alloc: &mut A) -> usize {
        let mut freed = 0;
        let user_slots = Level::L4.index_of(VirtualAddress::new(USER_SPACE_END - 1).page()) + 1;
        for index in 0..user_slots.min(ENTRIES) {
            let entry = *self.table(self.root).entry_mut(index);
            if entry.present() {
                freed += self.free_subtree(alloc, entry.frame(), Level::L3);
            }
        }
        alloc.free_4k(self.root);
        freed + 1
    }

    fn free_subtree<A: FrameAlloc>(&self, alloc: &mut A, table: PhysicalPage, level: Level) -> usize {
        let mut freed = 0;
        for index in 0..ENTRIES {
            let entry = *self.table(table).entry_mut(index);
            if !entry.present() {
                continue;
            }
            match level.next() {
                Some(next) => freed += self.free_subtree(alloc, entry.frame(), next),
                None => log::warn!(
                    "address space {}: leaf {} still mapped at teardown",
                    self.root,
                    entry.frame()
                ),
            }
        }
        alloc.free_4k(table);
        freed + 1
    }
}
