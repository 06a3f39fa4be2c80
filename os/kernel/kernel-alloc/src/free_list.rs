use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_vmem::PhysMapper;

/// Marks the end of a chain in a page's link word.
const NIL: u64 = u64::MAX;

/// An intrusive, singly linked list of free physical pages.
///
/// Each free page stores the physical address of its successor in its
/// first eight bytes:
///
/// ```text
/// head ──► +-----------+        +-----------+
///          | next ─────┼──────► | next = NIL| ◄── tail
///          | (garbage) |        | (garbage) |
///          +-----------+        +-----------+
/// ```
///
/// The list itself owns no memory; it only remembers head, tail and length
/// so that a whole chain can be spliced in constant time. All link accesses
/// go through the [`PhysMapper`] the pages belong to, and the caller keeps
/// one list per lock.
///
/// # Invariants
/// - `len` equals the number of pages reachable from `head`.
/// - `tail` is the last page reachable from `head`; both are `None` together.
/// - A page is on at most one list at a time.
pub struct FreeList {
    head: Option<PhysicalPage>,
    tail: Option<PhysicalPage>,
    len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn link<M: PhysMapper>(mapper: &M, page: PhysicalPage) -> *mut u64 {
        mapper.phys_to_ptr(page.base()).cast::<u64>()
    }

    #[inline]
    fn next_of<M: PhysMapper>(mapper: &M, page: PhysicalPage) -> Option<PhysicalPage> {
        // Safety: `page` is free and owned by this list; its first word is the link.
        let raw = unsafe { Self::link(mapper, page).read() };
        (raw != NIL).then(|| PhysicalPage::from_addr(PhysicalAddress::new(raw)))
    }

    #[inline]
    fn set_next<M: PhysMapper>(mapper: &M, page: PhysicalPage, next: Option<PhysicalPage>) {
        let raw = next.map_or(NIL, |p| p.base().as_u64());
        // Safety: as in `next_of`.
        unsafe { Self::link(mapper, page).write(raw) };
    }

    /// Put `page` at the front.
    pub fn push<M: PhysMapper>(&mut self, mapper: &M, page: PhysicalPage) {
        Self::set_next(mapper, page, self.head);
        if self.tail.is_none() {
            self.tail = Some(page);
        }
        self.head = Some(page);
        self.len += 1;
    }

    /// Take the front page.
    pub fn pop<M: PhysMapper>(&mut self, mapper: &M) -> Option<PhysicalPage> {
        let page = self.head?;
        self.head = Self::next_of(mapper, page);
        self.len -= 1;
        if self.head.is_none() {
            self.tail = None;
        }
        Some(page)
    }

    /// Detach up to `count` pages from the front and return them as their
    /// own list. The remainder stays here.
    pub fn split_front<M: PhysMapper>(&mut self, mapper: &M, count: usize) -> Self {
        if count == 0 || self.is_empty() {
            return Self::new();
        }
        if count >= self.len {
            return core::mem::replace(self, Self::new());
        }

        let Some(head) = self.head else {
            return Self::new();
        };
        let mut last = head;
        for _ in 1..count {
            match Self::next_of(mapper, last) {
                Some(next) => last = next,
                None => break,
            }
        }

        let rest = Self::next_of(mapper, last);
        Self::set_next(mapper, last, None);
        self.head = rest;
        self.len -= count;
        Self {
            head: Some(head),
            tail: Some(last),
            len: count,
        }
    }

    /// Splice all of `chain` in front of this list.
    pub fn prepend<M: PhysMapper>(&mut self, mapper: &M, chain: Self) {
        let (Some(head), Some(tail)) = (chain.head, chain.tail) else {
            return;
        };
        Self::set_next(mapper, tail, self.head);
        if self.tail.is_none() {
            self.tail = Some(tail);
        }
        self.head = Some(head);
        self.len += chain.len;
    }

    /// Walk the chain front to back.
    pub fn iter<'a, M: PhysMapper>(&self, mapper: &'a M) -> impl Iterator<Item = PhysicalPage> + 'a {
        let mut cursor = self.head;
        let mut remaining = self.len;
        core::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let page = cursor?;
            remaining -= 1;
            cursor = Self::next_of(mapper, page);
            Some(page)
        })
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}
