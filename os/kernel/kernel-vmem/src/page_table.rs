use crate::PageEntryBits;
use kernel_memory_addresses::VirtualPage;

/// Entries per paging structure.
pub const ENTRIES: usize = 512;

/// A 4 KiB paging structure of any level.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES],
}

impl PageTable {
    /// Clear all entries.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    #[inline]
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntryBits {
        &mut self.entries[index]
    }

    #[inline]
    pub fn entries(&self) -> &[PageEntryBits; ENTRIES] {
        &self.entries
    }
}

/// Paging level, root first.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Level {
    /// PML4
    L4,
    /// PDPT
    L3,
    /// PD
    L2,
    /// PT (4 KiB leaves)
    L1,
}

impl Level {
    /// Levels that hold links to further tables.
    pub const INTERMEDIATE: [Self; 3] = [Self::L4, Self::L3, Self::L2];

    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::L4 => 39,
            Self::L3 => 30,
            Self::L2 => 21,
            Self::L1 => 12,
        }
    }

    /// Index of `page` within the table of this level.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, page: VirtualPage) -> usize {
        ((page.base().as_u64() >> self.shift()) & 0x1FF) as usize
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::L4 => Some(Self::L3),
            Self::L3 => Some(Self::L2),
            Self::L2 => Some(Self::L1),
            Self::L1 => None,
        }
    }
}

const _: () = {
    assert!(size_of::<PageTable>() == 4096);
    assert!(align_of::<PageTable>() == 4096);
};

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::VirtualAddress;

    #[test]
    fn indices_split_the_address() {
        // L4=1, L3=2, L2=3, L1=4
        let va = VirtualAddress::new((1 << 39) | (2 << 30) | (3 << 21) | (4 << 12) | 0x123);
        let page = va.page();
        assert_eq!(Level::L4.index_of(page), 1);
        assert_eq!(Level::L3.index_of(page), 2);
        assert_eq!(Level::L2.index_of(page), 3);
        assert_eq!(Level::L1.index_of(page), 4);
    }

    #[test]
    fn levels_descend_to_the_leaf() {
        let mut level = Level::L4;
        let mut seen = 1;
        while let Some(next) = level.next() {
            level = next;
            seen += 1;
        }
        assert_eq!(level, Level::L1);
        assert_eq!(seen, 4);
    }
}
