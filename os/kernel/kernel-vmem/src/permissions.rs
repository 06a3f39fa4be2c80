use crate::PageEntryBits;
use kernel_memory_addresses::PhysicalPage;

bitflags::bitflags! {
    /// Access rights of a leaf mapping, independent of the hardware encoding.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PagePermissions: u8 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Accessible from user mode.
        const USER    = 1 << 3;
    }
}

/// A present leaf translation as seen by [`lookup`](crate::PageTableOps::lookup).
#[derive(Debug, Copy, Clone)]
pub struct Translation {
    entry: PageEntryBits,
}

impl Translation {
    pub(crate) const fn new(entry: PageEntryBits) -> Self {
        Self { entry }
    }

    #[inline]
    #[must_use]
    pub const fn page(&self) -> PhysicalPage {
        self.entry.frame()
    }

    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> PagePermissions {
        self.entry.permissions()
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.entry.writable()
    }

    /// Whether the page has been written through this translation.
    #[inline]
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.entry.dirty()
    }
}
