use kernel_alloc::{AllocatorConfig, FrameAllocator, Vmm};
use kernel_info::memory::MMAP_TOP;
use kernel_info::tuning::MAX_VMAS;
use kernel_pager::{
    Fault, FaultError, FaultKind, MemFile, MmapError, Protection, Resolution, Resolved,
    TaskMemory, VmArea, VmaError, VmaTable, map_file, resolve_fault, unmap_range,
};
use kernel_sync::CpuId;
use kernel_vmem::hosted::HostedRam;
use kernel_vmem::{PAGE_SIZE, PageTableOps, PhysicalPage, VirtualAddress};
use std::sync::Arc;

const CPU: CpuId = CpuId::new(0);

fn frames(pages: usize) -> FrameAllocator<HostedRam> {
    let ram = HostedRam::new(PhysicalPage::from_number(0x800), pages);
    let (start, end) = (ram.base().base(), ram.end());
    FrameAllocator::new(ram, start, end, AllocatorConfig::new(1)).unwrap()
}

fn touch(
    frames: &FrameAllocator<HostedRam>,
    vmas: &VmaTable<MemFile>,
    vmm: &mut Vmm<'_, HostedRam>,
    address: VirtualAddress,
) -> Resolution {
    let mut task = TaskMemory {
        pid: 3,
        cpu: CPU,
        vmas,
        page_table: vmm,
    };
    resolve_fault(frames, &mut task, Fault::new(address, FaultKind::Read))
}

fn file(pages: u64) -> Arc<MemFile> {
    let data: Vec<u8> = (0..pages * PAGE_SIZE).map(|i| (i / PAGE_SIZE) as u8 + 1).collect();
    Arc::new(MemFile::new(data))
}

#[test]
fn mapping_records_a_region_and_allocates_nothing() {
    let frames = frames(16);
    let mut vmas = VmaTable::new();
    let free = frames.free_pages();

    let a = map_file(&mut vmas, 100, Protection::READ, file(1), 0).unwrap();
    let b = map_file(&mut vmas, 2 * PAGE_SIZE + 1, Protection::READ, file(3), 0).unwrap();

    assert_eq!(a.as_u64(), MMAP_TOP - PAGE_SIZE);
    assert_eq!(b.as_u64(), MMAP_TOP - 4 * PAGE_SIZE);
    assert_eq!(vmas.find(b).map(VmArea::pages), Some(3));
    assert_eq!(frames.free_pages(), free);
}

#[test]
fn bad_mapping_requests_are_rejected() {
    let mut vmas = VmaTable::new();
    assert_eq!(
        map_file(&mut vmas, 0, Protection::READ, file(1), 0),
        Err(MmapError::EmptyLength)
    );
    assert_eq!(
        map_file(&mut vmas, PAGE_SIZE, Protection::READ, file(1), 12),
        Err(MmapError::Vma(VmaError::UnalignedOffset(12)))
    );
    assert_eq!(
        map_file(&mut vmas, u64::MAX, Protection::READ, file(1), 0),
        Err(MmapError::NoSpace {
            pages: u64::MAX.div_ceil(PAGE_SIZE)
        })
    );

    for _ in 0..MAX_VMAS {
        map_file(&mut vmas, PAGE_SIZE, Protection::READ, file(1), 0).unwrap();
    }
    assert_eq!(
        map_file(&mut vmas, PAGE_SIZE, Protection::READ, file(1), 0),
        Err(MmapError::Vma(VmaError::TableFull))
    );
}

#[test]
fn file_ranges_that_wrap_the_offset_are_rejected() {
    let frames = frames(16);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let last = u64::MAX & !(PAGE_SIZE - 1);

    assert_eq!(
        map_file(&mut vmas, 2 * PAGE_SIZE, Protection::READ, file(1), last),
        Err(MmapError::Vma(VmaError::OffsetOverflow(last)))
    );
    assert!(vmas.is_empty());

    // The highest range that still fits reads as past end of file.
    let offset = last - 2 * PAGE_SIZE;
    let base = map_file(&mut vmas, 2 * PAGE_SIZE, Protection::READ, file(1), offset).unwrap();
    assert_eq!(
        vmas.find(base).map(|vma| vma.file_offset_of((base + PAGE_SIZE).page())),
        Some(last - PAGE_SIZE)
    );

    let Resolution::Resumed(Resolved::Populated(page)) =
        touch(&frames, &vmas, &mut vmm, base + PAGE_SIZE)
    else {
        panic!("second page not populated");
    };
    assert!(frames.mapper().read_page(page).iter().all(|&b| b == 0));
}

#[test]
fn unmapping_a_whole_region_releases_touched_pages() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, 3 * PAGE_SIZE, Protection::READ, file(3), 0).unwrap();

    let Resolution::Resumed(Resolved::Populated(first)) = touch(&frames, &vmas, &mut vmm, base)
    else {
        panic!("first page not populated");
    };
    touch(&frames, &vmas, &mut vmm, base + 2 * PAGE_SIZE);

    let released = unmap_range(&frames, CPU, &mut vmas, &mut vmm, base, 3 * PAGE_SIZE).unwrap();
    assert_eq!(released, 2);
    assert!(vmas.is_empty());
    assert_eq!(frames.reference_count(first), Some(0));
    assert!(vmm.lookup(base.page()).is_none());

    assert_eq!(
        touch(&frames, &vmas, &mut vmm, base),
        Resolution::Terminated(FaultError::Unmapped(base))
    );

    // Only the root and the three intermediate tables remain.
    assert_eq!(frames.free_pages(), 32 - 4);
    assert!(frames.audit().is_ok());
}

#[test]
fn unmapping_a_prefix_keeps_the_rest_aligned_with_the_file() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, 4 * PAGE_SIZE, Protection::READ, file(4), 0).unwrap();
    touch(&frames, &vmas, &mut vmm, base);

    assert_eq!(unmap_range(&frames, CPU, &mut vmas, &mut vmm, base, PAGE_SIZE), Ok(1));

    let rest = base + PAGE_SIZE;
    let vma = vmas.find(rest).unwrap();
    assert_eq!(vma.start(), rest);
    assert_eq!(vma.offset(), PAGE_SIZE);
    assert_eq!(vma.pages(), 3);
    assert!(vmas.find(base).is_none());

    let Resolution::Resumed(Resolved::Populated(page)) = touch(&frames, &vmas, &mut vmm, rest)
    else {
        panic!("remaining region not populated");
    };
    // File page 1 is filled with the byte 2.
    assert!(frames.mapper().read_page(page).iter().all(|&b| b == 2));
}

#[test]
fn unmapping_a_suffix_shrinks_the_region() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, 4 * PAGE_SIZE, Protection::READ, file(4), 0).unwrap();
    touch(&frames, &vmas, &mut vmm, base + 3 * PAGE_SIZE);

    let tail = base + 2 * PAGE_SIZE;
    assert_eq!(unmap_range(&frames, CPU, &mut vmas, &mut vmm, tail, 2 * PAGE_SIZE), Ok(1));
    assert_eq!(vmas.find(base).map(VmArea::end), Some(tail));
    assert!(vmas.find(tail).is_none());
}

#[test]
fn invalid_unmap_ranges_are_rejected() {
    let frames = frames(16);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, 4 * PAGE_SIZE, Protection::READ, file(4), 0).unwrap();
    let mut unmap = |addr: VirtualAddress, len| unmap_range(&frames, CPU, &mut vmas, &mut vmm, addr, len);

    assert_eq!(unmap(base + 1, PAGE_SIZE), Err(MmapError::Unaligned(base + 1)));
    assert_eq!(unmap(base, 0), Err(MmapError::EmptyLength));
    let below = VirtualAddress::new(0x1000);
    assert_eq!(unmap(below, PAGE_SIZE), Err(MmapError::NotMapped(below)));
    assert_eq!(
        unmap(base + PAGE_SIZE, PAGE_SIZE),
        Err(MmapError::WouldSplit(base))
    );
    assert_eq!(
        unmap(base + 2 * PAGE_SIZE, 3 * PAGE_SIZE),
        Err(MmapError::BeyondRegion(base + 2 * PAGE_SIZE))
    );
    assert_eq!(vmas.find(base).map(VmArea::pages), Some(4));
}

#[test]
fn shared_page_survives_one_holder_unmapping() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, file(1), 0).unwrap();
    let Resolution::Resumed(Resolved::Populated(page)) = touch(&frames, &vmas, &mut vmm, base)
    else {
        panic!("page not populated");
    };

    // Another address space maps the same page.
    assert_eq!(frames.add_reference(page), 2);
    let free = frames.free_pages();

    assert_eq!(unmap_range(&frames, CPU, &mut vmas, &mut vmm, base, PAGE_SIZE), Ok(1));
    assert_eq!(frames.reference_count(page), Some(1));
    assert_eq!(frames.free_pages(), free);
    assert!(frames.mapper().read_page(page).iter().all(|&b| b == 1));

    frames.release_page(CPU, page);
    assert_eq!(frames.free_pages(), free + 1);
}

#[test]
fn child_copy_of_the_table_faults_independently() {
    let frames = frames(32);
    let mut parent_vmm = Vmm::new(&frames, CPU).unwrap();
    let mut parent = VmaTable::new();
    let base = map_file(&mut parent, 2 * PAGE_SIZE, Protection::READ, file(2), 0).unwrap();
    touch(&frames, &parent, &mut parent_vmm, base);

    let child = parent.clone();
    let mut child_vmm = Vmm::new(&frames, CPU).unwrap();
    let Resolution::Resumed(Resolved::Populated(child_page)) =
        touch(&frames, &child, &mut child_vmm, base)
    else {
        panic!("child page not populated");
    };
    assert_ne!(parent_vmm.lookup(base.page()).map(|t| t.page()), Some(child_page));

    // Unmapping in the parent leaves the child's region alone.
    unmap_range(&frames, CPU, &mut parent, &mut parent_vmm, base, 2 * PAGE_SIZE).unwrap();
    assert!(child.find(base).is_some());
    assert_eq!(child_vmm.lookup(base.page()).map(|t| t.page()), Some(child_page));
}
