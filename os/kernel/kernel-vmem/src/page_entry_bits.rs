use crate::permissions::PagePermissions;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalPage};

/// One 64-bit x86-64 paging-structure entry, any level.
///
/// | Bits   | Field                | Meaning |
/// |--------|----------------------|---------|
/// | 0      | `present`            | Entry is valid |
/// | 1      | `writable`           | Writes allowed |
/// | 2      | `user_access`        | CPL3 may access |
/// | 3      | `write_through`      | PWT |
/// | 4      | `cache_disabled`     | PCD |
/// | 5      | `accessed`           | Set by the CPU on any access |
/// | 6      | `dirty`              | Set by the CPU (or the pager) on write, leaf only |
/// | 7      | `large_page`         | PS; always clear here, only 4 KiB leaves are built |
/// | 8      | `global_translation` | Survives CR3 reloads, leaf only |
/// | 9–11   | `os_available_low`   | Ignored by hardware |
/// | 12–51  | frame number         | Physical page bits [51:12] |
/// | 52–58  | `os_available_high`  | Ignored by hardware |
/// | 59–62  | `protection_key`     | PKU key, or OS use |
/// | 63     | `no_execute`         | Instruction fetch disallowed |
///
/// ```rust
/// # use kernel_vmem::{PageEntryBits, PagePermissions, PhysicalPage};
/// let e = PageEntryBits::leaf(PhysicalPage::from_number(0x42), PagePermissions::READ | PagePermissions::USER);
/// assert!(e.present() && e.user_access() && e.no_execute() && !e.writable());
/// assert_eq!(e.frame().number(), 0x42);
/// ```
#[bitfield(u64)]
pub struct PageEntryBits {
    pub present: bool,
    pub writable: bool,
    pub user_access: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global_translation: bool,
    #[bits(3)]
    pub os_available_low: u8,
    #[bits(40)]
    phys_addr_bits_51_12: u64,
    #[bits(7)]
    pub os_available_high: u8,
    #[bits(4)]
    pub protection_key: u8,
    pub no_execute: bool,
}

impl PageEntryBits {
    /// Physical page this entry points at (next-level table or leaf frame).
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.phys_addr_bits_51_12())
    }

    #[inline]
    pub const fn set_frame(&mut self, page: PhysicalPage) {
        self.set_phys_addr_bits_51_12(page.base().as_u64() >> PAGE_SHIFT);
    }

    #[inline]
    #[must_use]
    pub const fn with_frame(mut self, page: PhysicalPage) -> Self {
        self.set_frame(page);
        self
    }

    /// Link to a next-level table. Permissive on purpose: the leaf decides.
    #[inline]
    #[must_use]
    pub const fn table_link(table: PhysicalPage) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_frame(table)
    }

    /// 4 KiB leaf mapping `page` with `perms`.
    ///
    /// x86-64 cannot express a present page that is not readable, so
    /// [`PagePermissions::READ`] carries no bit of its own.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalPage, perms: PagePermissions) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(perms.contains(PagePermissions::WRITE))
            .with_user_access(perms.contains(PagePermissions::USER))
            .with_no_execute(!perms.contains(PagePermissions::EXECUTE))
            .with_frame(page)
    }

    /// Permissions granted by a present leaf.
    #[must_use]
    pub const fn permissions(&self) -> PagePermissions {
        let mut perms = PagePermissions::empty();
        if !self.present() {
            return perms;
        }
        perms = perms.union(PagePermissions::READ);
        if self.writable() {
            perms = perms.union(PagePermissions::WRITE);
        }
        if !self.no_execute() {
            perms = perms.union(PagePermissions::EXECUTE);
        }
        if self.user_access() {
            perms = perms.union(PagePermissions::USER);
        }
        perms
    }
}

const _: () = {
    assert!(size_of::<PageEntryBits>() == 8);
};
