//! # Virtual Memory Support
//!
//! x86-64 four-level page tables for user address spaces, and the seams the
//! rest of the memory subsystem is written against.
//!
//! ## Overview
//!
//! - [`PhysMapper`]: how the kernel reaches a physical page (HHDM on bare
//!   metal, a heap arena on the host).
//! - [`FrameAlloc`]: where page-table frames come from and go back to.
//! - [`AddressSpace`]: one PML4-rooted translation tree with 4 KiB leaves.
//! - [`PageTableOps`]: the narrow interface the fault resolver needs
//!   (lookup, map, promote to writable, unmap).
//! - [`hosted::HostedRam`]: page-aligned heap memory posing as physical RAM
//!   so all of the above can run under `cargo test`.
//!
//! ## Address split
//!
//! A canonical 48-bit virtual address is effectively:
//!
//! ```text
//! VA = [PML4:9] [PDPT:9] [PD:9] [PT:9] [Offset:12]
//! ```
//!
//! Only the lower (user) half is managed here. Intermediate entries are
//! created present, writable and user-accessible; the leaf decides the
//! effective permissions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod address_space;
mod error;
pub mod hosted;
mod ops;
mod page_entry_bits;
mod page_table;
mod permissions;

pub use crate::address_space::AddressSpace;
pub use crate::error::MapError;
pub use crate::ops::PageTableOps;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{Level, PageTable};
pub use crate::permissions::{PagePermissions, Translation};
pub use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};

/// Source of **physical** 4 KiB frames for page tables.
///
/// The implementation decides where frames come from (bump region, the
/// reference-counted frame allocator, ...). Contents of returned frames are
/// unspecified; callers zero what they need.
pub trait FrameAlloc {
    /// Allocate one frame, or `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;

    /// Give a frame obtained from [`alloc_4k`](Self::alloc_4k) back.
    fn free_4k(&mut self, page: PhysicalPage);
}

/// Converts physical addresses to pointers usable in the current address
/// space (identity map, higher-half direct map, or a hosted arena).
pub trait PhysMapper {
    /// Pointer to the byte at `pa`.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Typed mutable view of the memory at `pa`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable and suitably aligned for `T`.
    /// - The bytes at `pa` must be a valid `T`.
    /// - No other reference to the same memory may be live for `'a`.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr(pa).cast::<T>() }
    }
}

/// Drop the TLB entry for `page` on this processor.
///
/// A no-op when not running on bare-metal x86-64.
#[inline]
pub fn invalidate_tlb_page(page: VirtualPage) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    unsafe {
        core::arch::asm!(
            "invlpg [{}]",
            in(reg) page.base().as_u64(),
            options(nostack, preserves_flags)
        );
    }

    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    let _ = page;
}
