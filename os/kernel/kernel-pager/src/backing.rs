//! Files that back mapped regions.
//!
//! The pager only needs two things from the file layer: a per-inode lock, and
//! a positioned read performed while holding it. [`BackingFile::lock`] hands
//! out a guard implementing [`InodeRead`]; dropping the guard unlocks.

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};
use kernel_sync::{SpinLock, SpinLockGuard};

/// Why a backing read failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ReadError {
    #[error("device error reading file offset {offset:#x}")]
    Device { offset: u64 },
}

/// Positioned reads on a locked inode.
pub trait InodeRead {
    /// Read up to `dst.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` means end of file.
    ///
    /// # Errors
    /// [`ReadError`] if the underlying storage failed.
    fn read_at(&mut self, offset: u64, dst: &mut [u8]) -> Result<usize, ReadError>;
}

/// An inode a region can be mapped from.
pub trait BackingFile: Send + Sync {
    /// Held for the duration of one page read.
    type Guard<'a>: InodeRead
    where
        Self: 'a;

    /// Lock the inode. Spins until it is available.
    fn lock(&self) -> Self::Guard<'_>;
}

/// Fill `dst` from `offset`, stopping early at end of file.
///
/// # Errors
/// The first [`ReadError`] reported by `inode`.
pub fn read_full<R: InodeRead + ?Sized>(
    inode: &mut R,
    offset: u64,
    dst: &mut [u8],
) -> Result<usize, ReadError> {
    let mut filled = 0;
    while filled < dst.len() {
        let n = inode.read_at(offset.saturating_add(filled as u64), &mut dst[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// A file whose contents live on the kernel heap.
///
/// Used for RAM-resident files and in tests. Reads can be made to fail to
/// exercise error paths.
#[derive(Debug, Default)]
pub struct MemFile {
    inode: SpinLock<MemInode>,
}

#[derive(Debug, Default)]
struct MemInode {
    data: Vec<u8>,
    failing: bool,
    reads: usize,
}

impl MemFile {
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            inode: SpinLock::new(MemInode {
                data: data.into(),
                failing: false,
                reads: 0,
            }),
        }
    }

    /// File size in bytes.
    pub fn len(&self) -> u64 {
        self.inode.lock().data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inode.lock().failing = failing;
    }

    /// Number of [`InodeRead::read_at`] calls served so far.
    pub fn reads(&self) -> usize {
        self.inode.lock().reads
    }

    /// Whether some reader holds the inode lock right now.
    pub fn is_locked(&self) -> bool {
        self.inode.is_locked()
    }
}

/// Lock guard of a [`MemFile`].
pub struct MemFileGuard<'a> {
    inode: SpinLockGuard<'a, MemInode>,
}

impl InodeRead for MemFileGuard<'_> {
    fn read_at(&mut self, offset: u64, dst: &mut [u8]) -> Result<usize, ReadError> {
        let inode = self.inode.deref_mut();
        inode.reads += 1;
        if inode.failing {
            return Err(ReadError::Device { offset });
        }

        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = inode.data.get(start..) else {
            return Ok(0);
        };
        let n = available.len().min(dst.len());
        dst[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

impl Deref for MemFileGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inode.data
    }
}

impl BackingFile for MemFile {
    type Guard<'a> = MemFileGuard<'a>;

    fn lock(&self) -> MemFileGuard<'_> {
        MemFileGuard {
            inode: self.inode.lock(),
        }
    }
}
