use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_sync::CpuId;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("out of physical memory")]
    Exhausted,
    #[error("physical range [{start}, {end}) holds no whole page")]
    EmptyRange {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    #[error("{0} processors requested; between 1 and {max} are supported", max = kernel_info::tuning::MAX_CPUS)]
    InvalidCpuCount(usize),
    #[error("steal batch must be at least one page")]
    ZeroStealBatch,
}

/// A broken accounting invariant found by [`FrameAllocator::audit`](crate::FrameAllocator::audit).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{page:?} is on a free list but has {count} references")]
    FreePageReferenced { page: PhysicalPage, count: u32 },
    #[error("{0:?} is on more than one free list")]
    ListedTwice(PhysicalPage),
    #[error("{0:?} has no references but is on no free list")]
    Unlisted(PhysicalPage),
    #[error("{0:?} is on a free list but outside the managed range")]
    Foreign(PhysicalPage),
    #[error("free list of {cpu} records {recorded} pages but links {walked}")]
    LengthMismatch {
        cpu: CpuId,
        recorded: usize,
        walked: usize,
    },
}
