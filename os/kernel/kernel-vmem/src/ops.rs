use crate::{FrameAlloc, MapError, PagePermissions, Translation};
use kernel_memory_addresses::{PhysicalPage, VirtualPage};

/// The page-table operations the fault resolver and region management rely on.
///
/// Implemented over an [`AddressSpace`](crate::AddressSpace). Nothing here
/// remembers a processor: frames for new tables come from the `alloc` passed
/// to [`map`](Self::map).
pub trait PageTableOps {
    /// The present leaf translation for `va`, if any.
    fn lookup(&self, va: VirtualPage) -> Option<Translation>;

    /// Install `va -> page` with `perms`. Missing intermediate tables are
    /// taken from `alloc`, which the caller binds to the current processor.
    ///
    /// # Errors
    /// [`MapError::AlreadyMapped`] if a translation exists, or
    /// [`MapError::OutOfMemory`] if an intermediate table could not be created.
    fn map<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualPage,
        page: PhysicalPage,
        perms: PagePermissions,
    ) -> Result<(), MapError>;

    /// Grant write access on the existing translation and mark it dirty.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if there is no translation.
    fn set_dirty_writable(&mut self, va: VirtualPage) -> Result<(), MapError>;

    /// Remove the translation and return the page it pointed at.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if there is no translation.
    fn unmap(&mut self, va: VirtualPage) -> Result<PhysicalPage, MapError>;
}
