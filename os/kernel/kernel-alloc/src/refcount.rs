use alloc::vec;
use alloc::vec::Vec;
use kernel_memory_addresses::PhysicalPage;
use kernel_sync::SpinLock;

/// Why a count could not be changed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum CountError {
    /// The page is outside the managed range.
    Foreign,
    /// The page has no references (it is free).
    Unreferenced,
    /// The page already has references; carries the count found.
    Referenced(u32),
}

/// Per-page reference counts, indexed by page number relative to the first
/// managed page.
///
/// One lock guards the whole table. It is independent of the free-list locks
/// and never held while one of them is taken.
pub(crate) struct RefCountTable {
    first: u64,
    counts: SpinLock<Vec<u32>>,
}

impl RefCountTable {
    /// A table for `pages` pages starting at `first`, each with `initial` references.
    pub(crate) fn new(first: PhysicalPage, pages: usize, initial: u32) -> Self {
        Self {
            first: first.number(),
            counts: SpinLock::new(vec![initial; pages]),
        }
    }

    #[inline]
    pub(crate) fn slot(&self, page: PhysicalPage, len: usize) -> Option<usize> {
        let offset = usize::try_from(page.number().checked_sub(self.first)?).ok()?;
        (offset < len).then_some(offset)
    }

    pub(crate) fn get(&self, page: PhysicalPage) -> Option<u32> {
        let counts = self.counts.lock();
        let slot = self.slot(page, counts.len())?;
        Some(counts[slot])
    }

    /// 0 → 1 for a page just taken off a free list.
    pub(crate) fn claim(&self, page: PhysicalPage) -> Result<(), CountError> {
        self.update(page, |count| match *count {
            0 => {
                *count = 1;
                Ok(())
            }
            n => Err(CountError::Referenced(n)),
        })
    }

    /// One more holder. Returns the new count.
    pub(crate) fn increment(&self, page: PhysicalPage) -> Result<u32, CountError> {
        self.update(page, |count| match *count {
            0 => Err(CountError::Unreferenced),
            n => {
                *count = n + 1;
                Ok(*count)
            }
        })
    }

    /// One fewer holder. Returns the new count.
    pub(crate) fn decrement(&self, page: PhysicalPage) -> Result<u32, CountError> {
        self.update(page, |count| match *count {
            0 => Err(CountError::Unreferenced),
            n => {
                *count = n - 1;
                Ok(*count)
            }
        })
    }

    /// Copy of all counts, in page order.
    pub(crate) fn snapshot(&self) -> Vec<u32> {
        self.counts.lock().clone()
    }

    fn update<R>(
        &self,
        page: PhysicalPage,
        f: impl FnOnce(&mut u32) -> Result<R, CountError>,
    ) -> Result<R, CountError> {
        let mut counts = self.counts.lock();
        let slot = self.slot(page, counts.len()).ok_or(CountError::Foreign)?;
        f(&mut counts[slot])
    }
}
