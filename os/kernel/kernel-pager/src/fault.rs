//! Demand-paging fault resolution.
//!
//! [`resolve_fault`] is a plain function of the faulting task's memory state
//! and the fault, so it runs the same from the trap handler and from tests.
//!
//! ```text
//!  VmaLookup ──miss──────────────────────────────────────► Unhandled
//!     │ hit
//!     ├─ access not permitted ───────────────────────────► Unhandled
//!     ├─ translated, write on read-only ─► Upgrade ──────► Done
//!     ├─ translated otherwise ───────────────────────────► Done
//!     └─ not translated ─► Populate ─► Install ──────────► Done
//!                            │            │
//!                            └── fail ────┴─ release ────► Unhandled
//! ```

use crate::backing::{BackingFile, ReadError, read_full};
use crate::vma::{VmArea, VmaTable};
use kernel_alloc::{CpuFrames, FrameAllocator};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::CpuId;
use kernel_vmem::{MapError, PageTableOps, PhysMapper};

/// The access that faulted.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultKind {
    Read,
    Write,
    Execute,
}

/// A memory-access fault as reported by the trap layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Fault {
    pub address: VirtualAddress,
    pub kind: FaultKind,
}

impl Fault {
    #[inline]
    #[must_use]
    pub const fn new(address: VirtualAddress, kind: FaultKind) -> Self {
        Self { address, kind }
    }

    #[inline]
    #[must_use]
    pub const fn page(&self) -> VirtualPage {
        self.address.page()
    }
}

/// How a resumed fault was dealt with.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Resolved {
    /// A fresh page was read from the backing file and mapped.
    Populated(PhysicalPage),
    /// The existing read-only translation was made writable and dirty.
    Upgraded,
    /// A usable translation already existed; the instruction simply retries.
    AlreadyMapped,
}

/// Outcome of [`resolve_fault`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Resolution {
    /// Return to the task and re-execute the faulting instruction.
    Resumed(Resolved),
    /// The fault cannot be served; the task must be terminated.
    Terminated(FaultError),
}

impl Resolution {
    #[must_use]
    pub const fn is_resumed(&self) -> bool {
        matches!(self, Self::Resumed(_))
    }
}

/// Reasons a fault terminates the faulting task.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("no mapped region contains {0}")]
    Unmapped(VirtualAddress),
    #[error("{kind:?} access to {address} is not permitted by its region")]
    ProtectionViolation {
        address: VirtualAddress,
        kind: FaultKind,
    },
    #[error("out of physical memory")]
    Exhausted,
    #[error("backing read failed: {0}")]
    BackingRead(ReadError),
    #[error("could not install translation: {0}")]
    Install(MapError),
    #[error("could not upgrade translation: {0}")]
    Upgrade(MapError),
}

/// The parts of a process the resolver works on.
pub struct TaskMemory<'a, P, F> {
    /// For diagnostics only.
    pub pid: u32,
    /// Processor handling the fault; pages come from and return to its list.
    pub cpu: CpuId,
    pub vmas: &'a VmaTable<F>,
    pub page_table: &'a mut P,
}

/// Resolve one fault of `task`.
///
/// On [`Resolution::Terminated`] nothing is left allocated on the task's
/// behalf. Only the faulting task is affected by any failure here.
pub fn resolve_fault<M, P, F>(
    frames: &FrameAllocator<M>,
    task: &mut TaskMemory<'_, P, F>,
    fault: Fault,
) -> Resolution
where
    M: PhysMapper,
    P: PageTableOps,
    F: BackingFile,
{
    match try_resolve(frames, task, fault) {
        Ok(resolved) => {
            log::trace!(
                "pid {}: {:?} fault at {} resolved: {resolved:?}",
                task.pid,
                fault.kind,
                fault.address
            );
            Resolution::Resumed(resolved)
        }
        Err(err) => {
            log::error!(
                "pid {}: unhandled {:?} fault at {}: {err}",
                task.pid,
                fault.kind,
                fault.address
            );
            Resolution::Terminated(err)
        }
    }
}

fn try_resolve<M, P, F>(
    frames: &FrameAllocator<M>,
    task: &mut TaskMemory<'_, P, F>,
    fault: Fault,
) -> Result<Resolved, FaultError>
where
    M: PhysMapper,
    P: PageTableOps,
    F: BackingFile,
{
    let vmas = task.vmas;
    let vma = vmas
        .find(fault.address)
        .ok_or(FaultError::Unmapped(fault.address))?;
    if !vma.protection().permits(fault.kind) {
        return Err(FaultError::ProtectionViolation {
            address: fault.address,
            kind: fault.kind,
        });
    }

    let page = fault.page();
    if let Some(translation) = task.page_table.lookup(page) {
        if fault.kind == FaultKind::Write && !translation.is_writable() {
            task.page_table
                .set_dirty_writable(page)
                .map_err(FaultError::Upgrade)?;
            return Ok(Resolved::Upgraded);
        }
        return Ok(Resolved::AlreadyMapped);
    }

    let frame = populate(frames, task.cpu, vma, page)?;
    let perms = vma
        .protection()
        .page_permissions(fault.kind == FaultKind::Write);
    // Missing tables come from the faulting CPU, like the page itself.
    let mut tables = CpuFrames::new(frames, task.cpu);
    if let Err(err) = task.page_table.map(&mut tables, page, frame, perms) {
        frames.release_page(task.cpu, frame);
        return Err(FaultError::Install(err));
    }
    Ok(Resolved::Populated(frame))
}

/// Allocate a page and fill it with the file contents backing `page`.
fn populate<M, F>(
    frames: &FrameAllocator<M>,
    cpu: CpuId,
    vma: &VmArea<F>,
    page: VirtualPage,
) -> Result<PhysicalPage, FaultError>
where
    M: PhysMapper,
    F: BackingFile,
{
    let frame = frames
        .allocate_page(cpu)
        .map_err(|_| FaultError::Exhausted)?;

    // Safety: just allocated and not mapped anywhere yet.
    let bytes = unsafe { frames.frame_bytes_mut(frame) };
    bytes.fill(0);

    let offset = vma.file_offset_of(page);
    let read = {
        let mut inode = vma.file().lock();
        read_full(&mut inode, offset, bytes)
    };

    match read {
        Ok(n) => {
            log::trace!("{page:?}: read {n} bytes at file offset {offset:#x} into {frame:?}");
            Ok(frame)
        }
        Err(err) => {
            frames.release_page(cpu, frame);
            Err(FaultError::BackingRead(err))
        }
    }
}
