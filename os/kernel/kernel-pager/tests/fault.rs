use kernel_alloc::{AllocatorConfig, FrameAllocator, Vmm};
use kernel_pager::{
    Fault, FaultError, FaultKind, MemFile, Protection, ReadError, Resolution, Resolved,
    TaskMemory, VmaTable, map_file, release_all, resolve_fault,
};
use kernel_sync::CpuId;
use kernel_vmem::hosted::HostedRam;
use kernel_vmem::{
    MapError, PAGE_SIZE, PagePermissions, PageTableOps, PhysicalPage, VirtualAddress,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

const CPU: CpuId = CpuId::new(0);

fn frames(pages: usize) -> FrameAllocator<HostedRam> {
    frames_on(pages, 1)
}

fn frames_on(pages: usize, cpus: usize) -> FrameAllocator<HostedRam> {
    frames_with(pages, AllocatorConfig::new(cpus))
}

fn frames_with(pages: usize, config: AllocatorConfig) -> FrameAllocator<HostedRam> {
    let ram = HostedRam::new(PhysicalPage::from_number(0x400), pages);
    let (start, end) = (ram.base().base(), ram.end());
    FrameAllocator::new(ram, start, end, config).unwrap()
}

fn fault(
    frames: &FrameAllocator<HostedRam>,
    vmas: &VmaTable<MemFile>,
    page_table: &mut Vmm<'_, HostedRam>,
    address: VirtualAddress,
    kind: FaultKind,
) -> Resolution {
    fault_on(frames, CPU, vmas, page_table, Fault::new(address, kind))
}

fn fault_on(
    frames: &FrameAllocator<HostedRam>,
    cpu: CpuId,
    vmas: &VmaTable<MemFile>,
    page_table: &mut Vmm<'_, HostedRam>,
    fault: Fault,
) -> Resolution {
    let mut task = TaskMemory {
        pid: 7,
        cpu,
        vmas,
        page_table,
    };
    resolve_fault(frames, &mut task, fault)
}

fn populated(resolution: Resolution) -> PhysicalPage {
    match resolution {
        Resolution::Resumed(Resolved::Populated(page)) => page,
        other => panic!("expected a populated page, got {other:?}"),
    }
}

/// Bytes `0, 1, 2, ...` wrapping at 251, so no page repeats another.
fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn first_read_copies_the_file_and_zero_fills_the_rest() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let file = Arc::new(MemFile::new(b"0123456789".to_vec()));
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, file.clone(), 0).unwrap();

    let page = populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Read));

    let bytes = frames.mapper().read_page(page);
    assert_eq!(&bytes[..10], b"0123456789");
    assert!(bytes[10..].iter().all(|&b| b == 0));
    assert_eq!(bytes.len() - 10, 4086);

    assert_eq!(frames.reference_count(page), Some(1));
    let translation = vmm.lookup(base.page()).unwrap();
    assert_eq!(translation.page(), page);
    assert!(!translation.is_writable());
    assert!(translation.permissions().contains(PagePermissions::USER));
    assert!(!file.is_locked());
    assert!(file.reads() >= 1);
}

#[test]
fn write_after_read_upgrades_without_allocating() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let file = Arc::new(MemFile::new(patterned(100)));
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ | Protection::WRITE, file, 0)
        .unwrap();

    let page = populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Read));
    assert!(!vmm.lookup(base.page()).unwrap().is_writable());
    let free = frames.free_pages();

    assert_eq!(
        fault(&frames, &vmas, &mut vmm, base + 8, FaultKind::Write),
        Resolution::Resumed(Resolved::Upgraded)
    );
    assert_eq!(frames.free_pages(), free);
    assert_eq!(frames.reference_count(page), Some(1));

    let translation = vmm.lookup(base.page()).unwrap();
    assert_eq!(translation.page(), page);
    assert!(translation.is_writable());
    assert!(translation.is_dirty());
}

#[test]
fn write_on_an_untouched_page_installs_it_writable() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let file = Arc::new(MemFile::new(patterned(10)));
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ | Protection::WRITE, file, 0)
        .unwrap();

    populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Write));
    assert!(vmm.lookup(base.page()).unwrap().is_writable());
}

#[test]
fn retried_fault_does_not_populate_twice() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let file = Arc::new(MemFile::new(patterned(10)));
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ | Protection::WRITE, file.clone(), 0)
        .unwrap();

    let before = frames.free_pages();
    let page = populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Read));
    // the leaf plus three new intermediate tables
    assert_eq!(frames.free_pages(), before - 4);
    let reads = file.reads();

    assert_eq!(
        fault(&frames, &vmas, &mut vmm, base, FaultKind::Read),
        Resolution::Resumed(Resolved::AlreadyMapped)
    );
    assert_eq!(
        fault(&frames, &vmas, &mut vmm, base, FaultKind::Write),
        Resolution::Resumed(Resolved::Upgraded)
    );
    assert_eq!(
        fault(&frames, &vmas, &mut vmm, base, FaultKind::Write),
        Resolution::Resumed(Resolved::AlreadyMapped)
    );

    assert_eq!(frames.free_pages(), before - 4);
    assert_eq!(file.reads(), reads);
    assert_eq!(vmm.lookup(base.page()).map(|t| t.page()), Some(page));
    assert_eq!(frames.reference_count(page), Some(1));
}

#[test]
fn address_outside_every_region_terminates() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, Arc::new(MemFile::default()), 0)
        .unwrap();
    let free = frames.free_pages();

    let outside = base + PAGE_SIZE;
    assert_eq!(
        fault(&frames, &vmas, &mut vmm, outside, FaultKind::Read),
        Resolution::Terminated(FaultError::Unmapped(outside))
    );
    let below = VirtualAddress::new(0x1000);
    assert_eq!(
        fault(&frames, &vmas, &mut vmm, below, FaultKind::Write),
        Resolution::Terminated(FaultError::Unmapped(below))
    );
    assert_eq!(frames.free_pages(), free);
}

#[test]
fn pages_past_end_of_file_read_as_zero() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(
        &mut vmas,
        3 * PAGE_SIZE,
        Protection::READ,
        Arc::new(MemFile::new(patterned(PAGE_SIZE as usize + 16))),
        0,
    )
    .unwrap();

    let straddling = populated(fault(&frames, &vmas, &mut vmm, base + PAGE_SIZE + 5, FaultKind::Read));
    let bytes = frames.mapper().read_page(straddling);
    assert_eq!(&bytes[..16], &patterned(PAGE_SIZE as usize + 16)[PAGE_SIZE as usize..]);
    assert!(bytes[16..].iter().all(|&b| b == 0));

    let beyond = populated(fault(&frames, &vmas, &mut vmm, base + 2 * PAGE_SIZE, FaultKind::Read));
    assert!(frames.mapper().read_page(beyond).iter().all(|&b| b == 0));
}

#[test]
fn file_offset_selects_the_backing_bytes() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let contents = patterned(4 * PAGE_SIZE as usize);
    let mut vmas = VmaTable::new();
    let base = map_file(
        &mut vmas,
        2 * PAGE_SIZE,
        Protection::READ,
        Arc::new(MemFile::new(contents.clone())),
        PAGE_SIZE,
    )
    .unwrap();

    let second = populated(fault(&frames, &vmas, &mut vmm, base + PAGE_SIZE, FaultKind::Read));
    assert_eq!(frames.mapper().read_page(second), &contents[8192..12288]);
}

#[test]
fn failed_read_releases_the_fresh_page() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let file = Arc::new(MemFile::new(patterned(64)));
    file.set_failing(true);
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, file.clone(), 0).unwrap();
    let free = frames.free_pages();

    assert_eq!(
        fault(&frames, &vmas, &mut vmm, base, FaultKind::Read),
        Resolution::Terminated(FaultError::BackingRead(ReadError::Device { offset: 0 }))
    );
    assert_eq!(frames.free_pages(), free);
    assert!(vmm.lookup(base.page()).is_none());
    assert!(!file.is_locked());
    assert!(frames.audit().is_ok());

    // Not retried: a later fault reads again from scratch.
    file.set_failing(false);
    populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Read));
}

#[test]
fn failed_install_releases_the_fresh_page() {
    let frames = frames(8);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, Arc::new(MemFile::new(patterned(8))), 0)
        .unwrap();

    // Leave exactly one page: enough for the data, none for the tables.
    let held: Vec<_> = (0..6).map(|_| frames.allocate_page(CPU).unwrap()).collect();
    assert_eq!(frames.free_pages(), 1);

    assert_eq!(
        fault(&frames, &vmas, &mut vmm, base, FaultKind::Read),
        Resolution::Terminated(FaultError::Install(MapError::OutOfMemory))
    );
    assert_eq!(frames.free_pages(), 1);
    assert!(frames.audit().is_ok());

    for page in held {
        frames.release_page(CPU, page);
    }
}

#[test]
fn exhaustion_terminates_the_task() {
    let frames = frames(8);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, Arc::new(MemFile::default()), 0)
        .unwrap();

    let held: Vec<_> = (0..7).map(|_| frames.allocate_page(CPU).unwrap()).collect();
    assert_eq!(
        fault(&frames, &vmas, &mut vmm, base, FaultKind::Read),
        Resolution::Terminated(FaultError::Exhausted)
    );
    for page in held {
        frames.release_page(CPU, page);
    }
    populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Read));
}

#[test]
fn access_not_granted_by_the_region_is_a_protection_violation() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, Arc::new(MemFile::default()), 0)
        .unwrap();
    let free = frames.free_pages();

    let violation = |kind| {
        Resolution::Terminated(FaultError::ProtectionViolation {
            address: base,
            kind,
        })
    };

    // Rejected before anything is allocated.
    assert_eq!(fault(&frames, &vmas, &mut vmm, base, FaultKind::Write), violation(FaultKind::Write));
    assert_eq!(frames.free_pages(), free);

    populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Read));
    assert_eq!(fault(&frames, &vmas, &mut vmm, base, FaultKind::Write), violation(FaultKind::Write));
    assert_eq!(fault(&frames, &vmas, &mut vmm, base, FaultKind::Execute), violation(FaultKind::Execute));
    assert!(!vmm.lookup(base.page()).unwrap().is_writable());
}

#[test]
fn executable_regions_install_executable_pages() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let base = map_file(
        &mut vmas,
        2 * PAGE_SIZE,
        Protection::READ | Protection::EXEC,
        Arc::new(MemFile::new(vec![0x90; 32])),
        0,
    )
    .unwrap();

    populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Execute));
    let perms = vmm.lookup(base.page()).unwrap().permissions();
    assert!(perms.contains(PagePermissions::EXECUTE | PagePermissions::USER));
    assert!(!perms.contains(PagePermissions::WRITE));

    populated(fault(&frames, &vmas, &mut vmm, base + PAGE_SIZE, FaultKind::Read));
    assert!(vmm.lookup((base + PAGE_SIZE).page()).unwrap().permissions().contains(PagePermissions::EXECUTE));
}

#[test]
fn teardown_returns_every_page() {
    let frames = frames(32);
    let mut vmm = Vmm::new(&frames, CPU).unwrap();
    let mut vmas = VmaTable::new();
    let file = Arc::new(MemFile::new(patterned(3 * PAGE_SIZE as usize)));
    let base = map_file(&mut vmas, 3 * PAGE_SIZE, Protection::READ | Protection::WRITE, file, 0)
        .unwrap();
    populated(fault(&frames, &vmas, &mut vmm, base, FaultKind::Read));
    populated(fault(&frames, &vmas, &mut vmm, base + 2 * PAGE_SIZE, FaultKind::Write));

    assert_eq!(release_all(&frames, CPU, &mut vmas, &mut vmm), 2);
    assert!(vmas.is_empty());
    assert_eq!(vmm.destroy(CPU), 4);
    assert_eq!(frames.free_pages(), 32);
    assert!(frames.audit().is_ok());
}

#[test]
fn tables_come_from_the_faulting_cpu() {
    let frames = frames_with(32, AllocatorConfig::new(2).with_steal_batch(8));
    let (boot, other) = (CpuId::new(0), CpuId::new(1));
    let mut vmm = Vmm::new(&frames, boot).unwrap();
    let mut vmas = VmaTable::new();
    let file = Arc::new(MemFile::new(patterned(PAGE_SIZE as usize)));
    let base = map_file(&mut vmas, PAGE_SIZE, Protection::READ, file, 0).unwrap();
    assert_eq!(frames.free_pages_on(boot), 31);
    assert_eq!(frames.free_pages_on(other), 0);

    let page = populated(fault_on(
        &frames,
        other,
        &vmas,
        &mut vmm,
        Fault::new(base, FaultKind::Read),
    ));

    // A single steal of eight pages serves the leaf and all three tables,
    // so the boot processor's list is touched exactly once.
    assert_eq!(frames.free_pages_on(boot), 23);
    assert_eq!(frames.free_pages_on(other), 4);
    assert_eq!(vmm.lookup(base.page()).map(|t| t.page()), Some(page));

    assert_eq!(release_all(&frames, other, &mut vmas, &mut vmm), 1);
    assert_eq!(vmm.destroy(other), 4);
    assert_eq!(frames.free_pages_on(boot), 23);
    assert_eq!(frames.free_pages_on(other), 9);
    assert!(frames.audit().is_ok());
}

#[test]
fn concurrent_faults_on_separate_cpus_get_distinct_pages() {
    const CPUS: usize = 4;
    const PAGES_EACH: u64 = 16;

    let frames = frames_on(512, CPUS);
    let contents = patterned(PAGES_EACH as usize * PAGE_SIZE as usize);
    let file = Arc::new(MemFile::new(contents.clone()));
    let mut parent = VmaTable::new();
    let base = map_file(&mut parent, PAGES_EACH * PAGE_SIZE, Protection::READ, file.clone(), 0)
        .unwrap();

    let pages: Vec<PhysicalPage> = thread::scope(|s| {
        let handles: Vec<_> = (0..CPUS)
            .map(|i| {
                let (frames, contents) = (&frames, &contents);
                let mut vmas = parent.clone();
                s.spawn(move || {
                    let cpu = CpuId::new(i);
                    let mut vmm = Vmm::new(frames, cpu).unwrap();
                    let mut got = Vec::new();
                    {
                        let mut task = TaskMemory {
                            pid: 100 + i as u32,
                            cpu,
                            vmas: &vmas,
                            page_table: &mut vmm,
                        };
                        for n in 0..PAGES_EACH {
                            let resolution = resolve_fault(
                                frames,
                                &mut task,
                                Fault::new(base + n * PAGE_SIZE, FaultKind::Read),
                            );
                            got.push(populated(resolution));
                        }
                    }
                    for (&page, expected) in got.iter().zip(contents.chunks(PAGE_SIZE as usize)) {
                        assert_eq!(frames.mapper().read_page(page), expected);
                    }
                    assert_eq!(release_all(frames, cpu, &mut vmas, &mut vmm), PAGES_EACH as usize);
                    vmm.destroy(cpu);
                    got
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(pages.len(), CPUS * PAGES_EACH as usize);
    // Threads release their pages when done, so only pages held at the same
    // time must differ.
    for chunk in pages.chunks(PAGES_EACH as usize) {
        assert_eq!(chunk.iter().collect::<HashSet<_>>().len(), chunk.len());
    }

    let stats = frames.audit().unwrap();
    assert_eq!(stats.free, 512);
    assert!(!file.is_locked());
}
