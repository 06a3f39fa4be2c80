//! # Allocator and Pager Tuning

/// Number of per-CPU slots reserved in per-processor tables.
pub const MAX_CPUS: usize = 8;

/// Index of the processor that runs early boot.
///
/// The frame allocator seeds every free page onto this CPU's list; the other
/// processors obtain pages by stealing.
pub const BOOT_CPU: usize = 0;

/// Upper bound on the pages moved by a single steal.
pub const STEAL_BATCH: usize = 1024;

/// Capacity of a process's mapped-region table.
pub const MAX_VMAS: usize = 16;

/// Byte written over a page when it is handed out.
///
/// Code that forgets to initialize a fresh page reads this pattern instead of
/// stale data.
pub const ALLOC_FILL: u8 = 0x05;

/// Byte written over a page when its last reference goes away.
///
/// Use-after-free reads see this pattern.
pub const RELEASE_FILL: u8 = 0x01;

const _: () = {
    assert!(MAX_CPUS > 0);
    assert!(BOOT_CPU < MAX_CPUS);
    assert!(STEAL_BATCH > 0);
    assert!(MAX_VMAS > 0);
    assert!(ALLOC_FILL != RELEASE_FILL);
    assert!(ALLOC_FILL != 0 && RELEASE_FILL != 0);
};
