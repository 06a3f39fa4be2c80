//! Creating and removing file mappings.
//!
//! Creating a region only records it; pages appear when they are first
//! touched. Removing a region unmaps whatever was touched and drops the
//! references those translations held.

use crate::vma::{Protection, VmArea, VmaError, VmaTable};
use alloc::sync::Arc;
use kernel_alloc::FrameAllocator;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage, is_page_aligned, pages_for};
use kernel_sync::CpuId;
use kernel_vmem::{MapError, PageTableOps, PhysMapper};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MmapError {
    #[error("zero-length mapping")]
    EmptyLength,
    #[error("no free range of {pages} pages below the mapping ceiling")]
    NoSpace { pages: u64 },
    #[error(transparent)]
    Vma(#[from] VmaError),
    #[error("{0} is not page aligned")]
    Unaligned(VirtualAddress),
    #[error("no mapped region contains {0}")]
    NotMapped(VirtualAddress),
    #[error("range at {0} runs past the end of its region")]
    BeyondRegion(VirtualAddress),
    #[error("unmapping the middle of the region at {0} would split it")]
    WouldSplit(VirtualAddress),
}

/// Map `len` bytes of `file`, starting at file offset `offset`.
///
/// The length is rounded up to whole pages and the address is picked by
/// [`VmaTable::place`]. No memory is allocated.
///
/// # Errors
/// - [`MmapError::EmptyLength`] for `len == 0`
/// - [`MmapError::NoSpace`] when no gap is large enough
/// - [`MmapError::Vma`] for an unaligned offset or a full table
pub fn map_file<F>(
    vmas: &mut VmaTable<F>,
    len: u64,
    prot: Protection,
    file: Arc<F>,
    offset: u64,
) -> Result<VirtualAddress, MmapError> {
    if len == 0 {
        return Err(MmapError::EmptyLength);
    }
    if !is_page_aligned(offset) {
        return Err(VmaError::UnalignedOffset(offset).into());
    }
    if vmas.is_full() {
        return Err(VmaError::TableFull.into());
    }

    let pages = pages_for(len);
    let start = vmas.place(pages).ok_or(MmapError::NoSpace { pages })?;
    let vma = VmArea::new(start.base(), pages * PAGE_SIZE, prot, file, offset)?;
    vmas.insert(vma)?;

    log::debug!(
        "mapped {pages} pages at {} ({prot:?}, file offset {offset:#x})",
        start.base()
    );
    Ok(start.base())
}

/// Remove `[addr, addr + len)` from the region that contains `addr`.
///
/// The range, rounded up to whole pages, must be the whole region or a prefix
/// or suffix of it. Pages of the range that were never touched cost nothing.
/// Returns the number of translations removed.
///
/// # Errors
/// - [`MmapError::Unaligned`] / [`MmapError::EmptyLength`]
/// - [`MmapError::NotMapped`] if no region contains `addr`
/// - [`MmapError::BeyondRegion`] if the range leaves the region
/// - [`MmapError::WouldSplit`] for a range strictly inside the region
pub fn unmap_range<M, P, F>(
    frames: &FrameAllocator<M>,
    cpu: CpuId,
    vmas: &mut VmaTable<F>,
    page_table: &mut P,
    addr: VirtualAddress,
    len: u64,
) -> Result<usize, MmapError>
where
    M: PhysMapper,
    P: PageTableOps,
{
    if !addr.is_page_aligned() {
        return Err(MmapError::Unaligned(addr));
    }
    if len == 0 {
        return Err(MmapError::EmptyLength);
    }

    let index = vmas.find_index(addr).ok_or(MmapError::NotMapped(addr))?;
    let vma = vmas.get_mut(index).ok_or(MmapError::NotMapped(addr))?;
    let pages = pages_for(len);
    let end = pages
        .checked_mul(PAGE_SIZE)
        .and_then(|bytes| addr.checked_add(bytes))
        .filter(|&end| end <= vma.end())
        .ok_or(MmapError::BeyondRegion(addr))?;

    let whole = addr == vma.start() && end == vma.end();
    if whole {
        vmas.remove(index);
    } else if addr == vma.start() {
        vma.trim_front(pages);
    } else if end == vma.end() {
        vma.trim_back(pages);
    } else {
        return Err(MmapError::WouldSplit(vma.start()));
    }

    let first = addr.page();
    let released = unmap_pages(frames, cpu, page_table, (0..pages).map(|n| first.add_pages(n)));
    log::debug!("unmapped {pages} pages at {addr}, {released} were resident");
    Ok(released)
}

/// Remove every region of a dying process and drop the pages it had touched.
///
/// Returns the number of translations removed. Page-table frames themselves
/// are left to the address space's teardown.
pub fn release_all<M, P, F>(
    frames: &FrameAllocator<M>,
    cpu: CpuId,
    vmas: &mut VmaTable<F>,
    page_table: &mut P,
) -> usize
where
    M: PhysMapper,
    P: PageTableOps,
{
    let mut released = 0;
    for index in 0..kernel_info::tuning::MAX_VMAS {
        if let Some(vma) = vmas.remove(index) {
            released += unmap_pages(frames, cpu, page_table, vma.page_iter());
        }
    }
    released
}

fn unmap_pages<M, P>(
    frames: &FrameAllocator<M>,
    cpu: CpuId,
    page_table: &mut P,
    pages: impl Iterator<Item = VirtualPage>,
) -> usize
where
    M: PhysMapper,
    P: PageTableOps,
{
    let mut released = 0;
    for page in pages {
        match page_table.unmap(page) {
            Ok(frame) => {
                frames.drop_reference(cpu, frame);
                released += 1;
            }
            Err(MapError::NotMapped(_)) => {}
            Err(err) => log::warn!("{page:?}: {err}"),
        }
    }
    released
}
