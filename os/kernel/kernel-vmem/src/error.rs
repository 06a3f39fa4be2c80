use kernel_memory_addresses::VirtualPage;

/// Failures of page-table manipulation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory for page-table frames")]
    OutOfMemory,
    #[error("{0:?} is already mapped")]
    AlreadyMapped(VirtualPage),
    #[error("{0:?} is not mapped")]
    NotMapped(VirtualPage),
    #[error("{0:?} is outside the user half of the address space")]
    OutOfRange(VirtualPage),
}
