//! Per-process table of lazily backed regions.

use crate::fault::FaultKind;
use alloc::sync::Arc;
use core::fmt;
use kernel_info::memory::{MMAP_BOTTOM, MMAP_TOP, USER_SPACE_END};
use kernel_info::tuning::MAX_VMAS;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage, is_page_aligned, pages_for};
use kernel_vmem::PagePermissions;

bitflags::bitflags! {
    /// Access a region grants. The bits are independent.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Protection: u8 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

impl Protection {
    /// Whether an access of `kind` is allowed.
    #[inline]
    #[must_use]
    pub const fn permits(self, kind: FaultKind) -> bool {
        match kind {
            FaultKind::Read => self.contains(Self::READ),
            FaultKind::Write => self.contains(Self::WRITE),
            FaultKind::Execute => self.contains(Self::EXEC),
        }
    }

    /// Leaf permissions for a page of this region installed by a fault.
    ///
    /// Write access is granted only if the installing fault was itself a
    /// write; a later write upgrades the page instead.
    #[must_use]
    pub const fn page_permissions(self, write_fault: bool) -> PagePermissions {
        let mut perms = PagePermissions::USER;
        if self.contains(Self::READ) {
            perms = perms.union(PagePermissions::READ);
        }
        if write_fault && self.contains(Self::WRITE) {
            perms = perms.union(PagePermissions::WRITE);
        }
        if self.contains(Self::EXEC) {
            perms = perms.union(PagePermissions::EXECUTE);
        }
        perms
    }
}

/// Rejected region geometry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmaError {
    #[error("region base {0} is not page aligned")]
    Unaligned(VirtualAddress),
    #[error("file offset {0:#x} is not page aligned")]
    UnalignedOffset(u64),
    #[error("region is empty")]
    EmptyLength,
    #[error("region at {0} extends past user space")]
    OutOfRange(VirtualAddress),
    #[error("file offset {0:#x} plus the region length overflows")]
    OffsetOverflow(u64),
    #[error("region at {0} overlaps an existing region")]
    Overlap(VirtualAddress),
    #[error("region table is full")]
    TableFull,
}

/// One file-backed region `[start, start + pages * PAGE_SIZE)`.
///
/// Byte `start + n` of the region corresponds to byte `offset + n` of `file`.
pub struct VmArea<F> {
    start: VirtualPage,
    pages: u64,
    prot: Protection,
    file: Arc<F>,
    offset: u64,
}

impl<F> VmArea<F> {
    /// Describe a region of `len` bytes (rounded up to whole pages) at `start`.
    ///
    /// # Errors
    /// - [`VmaError::Unaligned`] / [`VmaError::UnalignedOffset`]
    /// - [`VmaError::EmptyLength`] for `len == 0`
    /// - [`VmaError::OutOfRange`] if the region would reach past user space
    /// - [`VmaError::OffsetOverflow`] if the file range would wrap `u64`
    pub fn new(
        start: VirtualAddress,
        len: u64,
        prot: Protection,
        file: Arc<F>,
        offset: u64,
    ) -> Result<Self, VmaError> {
        if !start.is_page_aligned() {
            return Err(VmaError::Unaligned(start));
        }
        if !is_page_aligned(offset) {
            return Err(VmaError::UnalignedOffset(offset));
        }
        if len == 0 {
            return Err(VmaError::EmptyLength);
        }
        let pages = pages_for(len);
        let Some(bytes) = pages.checked_mul(PAGE_SIZE) else {
            return Err(VmaError::OutOfRange(start));
        };
        if start.as_u64().checked_add(bytes).is_none_or(|end| end > USER_SPACE_END) {
            return Err(VmaError::OutOfRange(start));
        }
        if offset.checked_add(bytes).is_none() {
            return Err(VmaError::OffsetOverflow(offset));
        }

        Ok(Self {
            start: start.page(),
            pages,
            prot,
            file,
            offset,
        })
    }

    #[inline]
    pub const fn start(&self) -> VirtualAddress {
        self.start.base()
    }

    /// First address past the region.
    #[inline]
    pub const fn end(&self) -> VirtualAddress {
        self.start.add_pages(self.pages).base()
    }

    #[inline]
    pub const fn first_page(&self) -> VirtualPage {
        self.start
    }

    #[inline]
    pub const fn pages(&self) -> u64 {
        self.pages
    }

    #[inline]
    pub const fn protection(&self) -> Protection {
        self.prot
    }

    #[inline]
    pub const fn file(&self) -> &Arc<F> {
        &self.file
    }

    /// File offset of the region's first byte.
    #[inline]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        va >= self.start() && va < self.end()
    }

    /// File offset backing the first byte of `page`.
    ///
    /// `page` must lie inside the region; [`new`](Self::new) guarantees the
    /// result does not wrap for such pages. Pages past the end saturate.
    #[inline]
    pub const fn file_offset_of(&self, page: VirtualPage) -> u64 {
        let delta = page.pages_since(self.start).saturating_mul(PAGE_SIZE);
        self.offset.saturating_add(delta)
    }

    /// Every page of the region, lowest first.
    pub fn page_iter(&self) -> impl Iterator<Item = VirtualPage> {
        let start = self.start;
        (0..self.pages).map(move |n| start.add_pages(n))
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    /// Drop the first `pages` pages, keeping addresses and file offsets in step.
    pub(crate) fn trim_front(&mut self, pages: u64) {
        debug_assert!(pages < self.pages);
        self.start = self.start.add_pages(pages);
        self.offset = self.offset.saturating_add(pages.saturating_mul(PAGE_SIZE));
        self.pages -= pages;
    }

    /// Drop the last `pages` pages.
    pub(crate) fn trim_back(&mut self, pages: u64) {
        debug_assert!(pages < self.pages);
        self.pages -= pages;
    }
}

impl<F> Clone for VmArea<F> {
    fn clone(&self) -> Self {
        Self {
            start: self.start,
            pages: self.pages,
            prot: self.prot,
            file: Arc::clone(&self.file),
            offset: self.offset,
        }
    }
}

impl<F> fmt::Debug for VmArea<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmArea")
            .field("start", &self.start())
            .field("end", &self.end())
            .field("prot", &self.prot)
            .field("offset", &format_args!("{:#x}", self.offset))
            .finish_non_exhaustive()
    }
}

/// A process's mapped regions, at most [`MAX_VMAS`] of them.
///
/// Lookups scan the slots linearly; regions never overlap.
pub struct VmaTable<F> {
    slots: [Option<VmArea<F>>; MAX_VMAS],
}

impl<F> VmaTable<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Add `vma`, returning the slot it occupies.
    ///
    /// # Errors
    /// [`VmaError::Overlap`] or [`VmaError::TableFull`].
    pub fn insert(&mut self, vma: VmArea<F>) -> Result<usize, VmaError> {
        if self.iter().any(|existing| existing.overlaps(&vma)) {
            return Err(VmaError::Overlap(vma.start()));
        }
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(VmaError::TableFull)?;
        *slot = Some(vma);
        Ok(index)
    }

    /// The region containing `va`.
    pub fn find(&self, va: VirtualAddress) -> Option<&VmArea<F>> {
        self.iter().find(|vma| vma.contains(va))
    }

    /// Slot of the region containing `va`.
    pub fn find_index(&self, va: VirtualAddress) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|vma| vma.contains(va)))
    }

    pub fn get(&self, index: usize) -> Option<&VmArea<F>> {
        self.slots.get(index)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut VmArea<F>> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Take the region out of slot `index`.
    pub fn remove(&mut self, index: usize) -> Option<VmArea<F>> {
        self.slots.get_mut(index)?.take()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VmArea<F>> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Highest free run of `pages` pages inside `[MMAP_BOTTOM, MMAP_TOP)`.
    pub fn place(&self, pages: u64) -> Option<VirtualPage> {
        let bytes = pages.checked_mul(PAGE_SIZE)?;
        if bytes == 0 {
            return None;
        }

        let mut end = MMAP_TOP;
        loop {
            let start = end.checked_sub(bytes).filter(|&s| s >= MMAP_BOTTOM)?;
            let (lo, hi) = (VirtualAddress::new(start), VirtualAddress::new(end));
            let blocker = self
                .iter()
                .filter(|vma| vma.start() < hi && lo < vma.end())
                .map(VmArea::start)
                .min();
            match blocker {
                None => return Some(lo.page()),
                Some(below) => end = below.as_u64(),
            }
        }
    }
}

impl<F> Default for VmaTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Duplicates the records for a child process. The backing files are shared;
/// no page is copied.
impl<F> Clone for VmaTable<F> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<F> fmt::Debug for VmaTable<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
