//! Reference-counted physical frame allocator with per-CPU free lists.

use crate::error::{AllocError, InvariantViolation};
use crate::free_list::FreeList;
use crate::refcount::{CountError, RefCountTable};
use alloc::vec;
use alloc::vec::Vec;
use kernel_info::tuning::{ALLOC_FILL, BOOT_CPU, MAX_CPUS, RELEASE_FILL, STEAL_BATCH};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, align_down, align_up};
use kernel_sync::{CpuId, PerCpu, SpinLock};
use kernel_vmem::PhysMapper;

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Runtime knobs of a [`FrameAllocator`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AllocatorConfig {
    /// Processors that will call into the allocator (`1..=MAX_CPUS`).
    pub cpus: usize,
    /// Most pages moved from one CPU's list to another's per steal.
    pub steal_batch: usize,
}

impl AllocatorConfig {
    #[must_use]
    pub const fn new(cpus: usize) -> Self {
        Self {
            cpus,
            steal_batch: STEAL_BATCH,
        }
    }

    #[must_use]
    pub const fn with_steal_batch(mut self, steal_batch: usize) -> Self {
        self.steal_batch = steal_batch;
        self
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new(MAX_CPUS)
    }
}

/// Snapshot produced by [`FrameAllocator::audit`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameStats {
    pub total: usize,
    pub free: usize,
    pub in_use: usize,
    /// Free pages per online CPU, by CPU index.
    pub per_cpu_free: Vec<usize>,
}

/// Owner of every physical page in `[first, first + pages)`.
///
/// Each page has a reference count; a page is on exactly one per-CPU free
/// list when its count is zero and on none otherwise. Allocation takes from
/// the calling CPU's list and steals a batch from another CPU when that list
/// is empty. Release pushes onto the calling CPU's list.
///
/// Locks: one per free list plus one for the count table. At most one of
/// them is held at any time.
pub struct FrameAllocator<M: PhysMapper> {
    mapper: M,
    first: PhysicalPage,
    pages: usize,
    config: AllocatorConfig,
    free: PerCpu<SpinLock<FreeList>, MAX_CPUS>,
    refs: RefCountTable,
}

impl<M: PhysMapper> FrameAllocator<M> {
    /// Take ownership of the pages in `[start, end)`.
    ///
    /// `start` is rounded up and `end` down to page boundaries (typically
    /// `start` is the end of the kernel image). Every page is handed to
    /// [`release_page`](Self::release_page) on the boot CPU, so the boot
    /// CPU's list starts out with all of them.
    ///
    /// # Errors
    /// - [`AllocError::EmptyRange`] if no whole page fits.
    /// - [`AllocError::InvalidCpuCount`] / [`AllocError::ZeroStealBatch`]
    ///   for an unusable `config`.
    pub fn new(
        mapper: M,
        start: PhysicalAddress,
        end: PhysicalAddress,
        config: AllocatorConfig,
    ) -> Result<Self, AllocError> {
        if config.cpus == 0 || config.cpus > MAX_CPUS {
            return Err(AllocError::InvalidCpuCount(config.cpus));
        }
        if config.steal_batch == 0 {
            return Err(AllocError::ZeroStealBatch);
        }

        let first = align_up(start.as_u64()).unwrap_or(u64::MAX);
        let last = align_down(end.as_u64());
        if first >= last {
            return Err(AllocError::EmptyRange { start, end });
        }
        let pages = usize::try_from((last - first) / PAGE_SIZE)
            .map_err(|_| AllocError::EmptyRange { start, end })?;
        let first = PhysicalPage::from_addr(PhysicalAddress::new(first));

        let allocator = Self {
            mapper,
            first,
            pages,
            config,
            free: PerCpu::default(),
            refs: RefCountTable::new(first, pages, 1),
        };

        let boot = CpuId::new(BOOT_CPU);
        let mut page = first;
        for _ in 0..pages {
            allocator.release_page(boot, page);
            page = page.next();
        }

        log::info!(
            "frame allocator: {pages} pages [{}, {}) across {} cpus, steal batch {}",
            first.base(),
            PhysicalAddress::new(last),
            config.cpus,
            config.steal_batch
        );
        Ok(allocator)
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    pub const fn config(&self) -> AllocatorConfig {
        self.config
    }

    /// Number of managed pages.
    #[inline]
    pub const fn total_pages(&self) -> usize {
        self.pages
    }

    /// Whether `page` is managed by this allocator.
    #[inline]
    pub fn contains(&self, page: PhysicalPage) -> bool {
        self.refs.slot(page, self.pages).is_some()
    }

    /// Hand out one page with a reference count of 1, filled with
    /// [`ALLOC_FILL`].
    ///
    /// # Errors
    /// [`AllocError::Exhausted`] when every free list is empty.
    ///
    /// # Panics
    /// If `cpu` is not online.
    pub fn allocate_page(&self, cpu: CpuId) -> Result<PhysicalPage, AllocError> {
        self.check_cpu(cpu);

        let local = self.free[cpu].lock().pop(&self.mapper);
        let Some(page) = local.or_else(|| self.steal(cpu)) else {
            log::warn!("{cpu}: physical memory exhausted");
            return Err(AllocError::Exhausted);
        };

        if let Err(err) = self.refs.claim(page) {
            panic!("{page:?} was handed out from a free list in state {err:?}");
        }
        self.fill(page, ALLOC_FILL);
        log::trace!("{cpu}: allocated {page:?}");
        Ok(page)
    }

    /// Drop one reference to `page`. The last release fills the page with
    /// [`RELEASE_FILL`] and returns it to `cpu`'s free list.
    ///
    /// # Panics
    /// On a double release (the count is already zero), on a page this
    /// allocator does not manage, or if `cpu` is not online. These are
    /// broken kernel invariants and must halt the system.
    pub fn release_page(&self, cpu: CpuId, page: PhysicalPage) {
        let _ = self.drop_reference(cpu, page);
    }

    /// Register one more holder of an allocated `page`. Returns the new count.
    ///
    /// # Panics
    /// If `page` is free or not managed by this allocator.
    pub fn add_reference(&self, page: PhysicalPage) -> u32 {
        match self.refs.increment(page) {
            Ok(count) => count,
            Err(CountError::Unreferenced) => panic!("reference taken on free page {page:?}"),
            Err(err) => panic!("reference taken on {page:?}: {err:?}"),
        }
    }

    /// Release one holder of `page`; identical to
    /// [`release_page`](Self::release_page) but reports the remaining count.
    ///
    /// # Panics
    /// As [`release_page`](Self::release_page).
    pub fn drop_reference(&self, cpu: CpuId, page: PhysicalPage) -> u32 {
        self.check_cpu(cpu);
        let remaining = match self.refs.decrement(page) {
            Ok(remaining) => remaining,
            Err(CountError::Unreferenced) => panic!("double release of {page:?}"),
            Err(err) => panic!("release of {page:?}: {err:?}"),
        };

        if remaining == 0 {
            self.fill(page, RELEASE_FILL);
            self.free[cpu].lock().push(&self.mapper, page);
            log::trace!("{cpu}: released {page:?}");
        }
        remaining
    }

    /// Current reference count of `page`, or `None` if it is not managed here.
    pub fn reference_count(&self, page: PhysicalPage) -> Option<u32> {
        self.refs.get(page)
    }

    /// Pages on all free lists. Lists are visited one at a time, so the sum
    /// is only exact when no allocation is in flight.
    pub fn free_pages(&self) -> usize {
        self.online().map(|cpu| self.free_pages_on(cpu)).sum()
    }

    pub fn free_pages_on(&self, cpu: CpuId) -> usize {
        self.free.get(cpu).map_or(0, |list| list.lock().len())
    }

    /// Mutable view of an allocated page's bytes.
    ///
    /// # Safety
    /// The caller must be the page's only user for `'a`: typically the page
    /// was just allocated and is not mapped anywhere yet.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn frame_bytes_mut<'a>(&self, page: PhysicalPage) -> &'a mut [u8] {
        debug_assert!(self.contains(page));
        unsafe { core::slice::from_raw_parts_mut(self.mapper.phys_to_ptr(page.base()), PAGE_BYTES) }
    }

    /// Check the accounting invariants:
    /// - every listed page is managed, listed once and has count zero;
    /// - every page with count zero is listed;
    /// - every list's recorded length matches its chain.
    ///
    /// Walks one list at a time, so only meaningful while no other CPU is
    /// allocating or releasing.
    ///
    /// # Errors
    /// The first violation found.
    pub fn audit(&self) -> Result<FrameStats, InvariantViolation> {
        let counts = self.refs.snapshot();
        let mut listed = vec![false; self.pages];
        let mut per_cpu_free = Vec::with_capacity(self.config.cpus);

        for cpu in self.online() {
            let list = self.free[cpu].lock();
            let mut walked = 0;
            for page in list.iter(&self.mapper) {
                let slot = self
                    .refs
                    .slot(page, self.pages)
                    .ok_or(InvariantViolation::Foreign(page))?;
                if core::mem::replace(&mut listed[slot], true) {
                    return Err(InvariantViolation::ListedTwice(page));
                }
                if counts[slot] != 0 {
                    return Err(InvariantViolation::FreePageReferenced {
                        page,
                        count: counts[slot],
                    });
                }
                walked += 1;
            }
            if walked != list.len() {
                return Err(InvariantViolation::LengthMismatch {
                    cpu,
                    recorded: list.len(),
                    walked,
                });
            }
            per_cpu_free.push(walked);
        }

        let mut page = self.first;
        for (count, listed) in counts.iter().zip(&listed) {
            if *count == 0 && !listed {
                return Err(InvariantViolation::Unlisted(page));
            }
            page = page.next();
        }

        let free = per_cpu_free.iter().sum();
        Ok(FrameStats {
            total: self.pages,
            free,
            in_use: counts.iter().filter(|&&c| c != 0).count(),
            per_cpu_free,
        })
    }

    /// Move up to one batch from the first non-empty peer list onto `cpu`'s
    /// list and hand out one page of it.
    ///
    /// The donor's lock is released before the requester's is taken.
    fn steal(&self, cpu: CpuId) -> Option<PhysicalPage> {
        for donor in cpu.peers(self.config.cpus) {
            let mut batch = self.free[donor]
                .lock()
                .split_front(&self.mapper, self.config.steal_batch);
            let Some(page) = batch.pop(&self.mapper) else {
                continue;
            };
            log::debug!("{cpu}: stole {} pages from {donor}", batch.len() + 1);
            if !batch.is_empty() {
                self.free[cpu].lock().prepend(&self.mapper, batch);
            }
            return Some(page);
        }
        None
    }

    fn online(&self) -> impl Iterator<Item = CpuId> {
        (0..self.config.cpus).map(CpuId::new)
    }

    #[inline]
    fn check_cpu(&self, cpu: CpuId) {
        assert!(
            cpu.index() < self.config.cpus,
            "{cpu} is not one of the {} online cpus",
            self.config.cpus
        );
    }

    #[inline]
    fn fill(&self, page: PhysicalPage, byte: u8) {
        // Safety: the page is managed by us and, at the two call sites, owned
        // exclusively (just claimed or just released by its last holder).
        unsafe { core::ptr::write_bytes(self.mapper.phys_to_ptr(page.base()), byte, PAGE_BYTES) };
    }
}
