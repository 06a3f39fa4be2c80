//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and 4 KiB page bases used
//! by the frame allocator, the page-table code and the fault resolver.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`PhysicalPage`] | The page-aligned base of a 4 KiB physical page. |
//! | [`VirtualAddress`] | A byte address in a (translated) address space. |
//! | [`VirtualPage`] | The page-aligned base of a 4 KiB virtual page. |
//!
//! All four are `#[repr(transparent)]` wrappers around `u64` so mixing up
//! physical and virtual values is a type error, not a runtime bug.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_4000_0000_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x0000_4000_0000_1000);
//! assert_eq!(va.offset(), 0x234);
//!
//! let pp = PhysicalPage::from_number(0x42);
//! assert_eq!(pp.base().as_u64(), 0x42_000);
//! assert_eq!(pp.number(), 0x42);
//! ```
//!
//! ## Invariants
//!
//! - A [`PhysicalPage`] or [`VirtualPage`] always has its low [`PAGE_SHIFT`]
//!   bits cleared. Constructors either round down or reject unaligned input.
//! - Page arithmetic is checked where it can overflow; the `checked_*`
//!   variants return `None` instead of wrapping.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`; the number of in-page offset bits.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the in-page offset bits.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

const _: () = {
    assert!(1u64 << PAGE_SHIFT == PAGE_SIZE);
};

/// Round `value` down to the enclosing page boundary.
#[inline]
#[must_use]
pub const fn align_down(value: u64) -> u64 {
    value & !PAGE_MASK
}

/// Round `value` up to the next page boundary, or `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_MASK) {
        Some(v) => Some(align_down(v)),
        None => None,
    }
}

/// Whether `value` sits on a page boundary.
#[inline]
#[must_use]
pub const fn is_page_aligned(value: u64) -> bool {
    value & PAGE_MASK == 0
}

/// Number of pages needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}
