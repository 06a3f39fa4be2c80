use core::fmt;
use core::ops::Index;

/// Logical processor index (0..n-1).
///
/// Passed explicitly to every per-processor operation; nothing in this crate
/// reads it from a hardware register.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CpuId(u32);

impl CpuId {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The other processors among the first `online`, in the order a
    /// processor visits them when it looks for help: starting right after
    /// `self` and wrapping around. `self` is never yielded.
    ///
    /// ```rust
    /// # use kernel_sync::CpuId;
    /// let order: Vec<usize> = CpuId::new(2).peers(4).map(CpuId::index).collect();
    /// assert_eq!(order, [3, 0, 1]);
    /// ```
    pub fn peers(self, online: usize) -> impl Iterator<Item = Self> {
        let me = self.index();
        (1..online).map(move |step| Self::new((me + step) % online))
    }
}

impl fmt::Debug for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuId({})", self.0)
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

#[repr(C, align(64))] // one slot per cache line; no false sharing
struct Slot<T>(T);

/// One `T` per processor, indexed by [`CpuId`].
///
/// The array is sized at compile time to `N`; how many of the slots are
/// actually in use is the owner's business.
pub struct PerCpu<T, const N: usize> {
    slots: [Slot<T>; N],
}

impl<T, const N: usize> PerCpu<T, N> {
    /// Build every slot from its processor id.
    pub fn from_fn(mut f: impl FnMut(CpuId) -> T) -> Self {
        Self {
            slots: core::array::from_fn(|i| Slot(f(CpuId::new(i)))),
        }
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    #[must_use]
    pub fn get(&self, cpu: CpuId) -> Option<&T> {
        self.slots.get(cpu.index()).map(|slot| &slot.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (CpuId::new(i), &slot.0))
    }
}

impl<T, const N: usize> Index<CpuId> for PerCpu<T, N> {
    type Output = T;

    /// # Panics
    /// If `cpu` is outside the array.
    fn index(&self, cpu: CpuId) -> &T {
        &self.slots[cpu.index()].0
    }
}

impl<T: Default, const N: usize> Default for PerCpu<T, N> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}
