//! # HHDM-based `PhysMapper`
//!
//! With a higher-half direct map every physical address `pa` is reachable at
//! `HHDM_BASE + pa`, so reaching a page is a single addition.

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// # Safety
/// The HHDM must be present and cover every physical page handed to it.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// Where `pa` appears in the direct map.
    #[inline]
    #[must_use]
    pub const fn virt_of(pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(HHDM_BASE + pa.as_u64())
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        core::ptr::with_exposed_provenance_mut(Self::virt_of(pa).as_u64() as usize)
    }
}
