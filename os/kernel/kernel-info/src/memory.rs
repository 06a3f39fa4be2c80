//! # Memory Layout

use kernel_memory_addresses::is_page_aligned;

/// First address past the canonical lower half; user mappings end below it.
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// File mappings are placed top-down starting below this address.
pub const MMAP_TOP: u64 = 0x0000_7000_0000_0000;

/// Lowest address a file mapping may be placed at.
///
/// Keeps page zero and the program image area free of automatic placements.
pub const MMAP_BOTTOM: u64 = 0x0000_0000_4000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

const _: () = {
    assert!(is_page_aligned(MMAP_TOP));
    assert!(is_page_aligned(MMAP_BOTTOM));
    assert!(is_page_aligned(USER_SPACE_END));
    assert!(MMAP_BOTTOM < MMAP_TOP);
    assert!(MMAP_TOP <= USER_SPACE_END);
    assert!(HHDM_BASE > USER_SPACE_END);
};
