//! Classification of traps taken from user mode.
//!
//! The low-level entry stub saves the vector, the CPU-pushed error code and
//! `CR2` into a [`TrapFrame`]; [`handle_user_trap`] decides what happens next.

use crate::backing::BackingFile;
use crate::fault::{Fault, FaultError, FaultKind, Resolution, Resolved, TaskMemory, resolve_fault};
use bitfield_struct::bitfield;
use kernel_alloc::FrameAllocator;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{PageTableOps, PhysMapper};

pub const PAGE_FAULT_VECTOR: u8 = 0x0E; // 14

/// Software interrupt used for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// First vector routed to external devices; 0..32 are CPU exceptions.
pub const FIRST_DEVICE_VECTOR: u8 = 32;

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 “Page-Fault Exception (#PF)”.
#[bitfield(u64)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64, // reserved / ignored bits
}

impl PageFaultError {
    /// The access that faulted. Instruction fetches take precedence.
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        if self.instruction_fetch() {
            FaultKind::Execute
        } else if self.write() {
            FaultKind::Write
        } else {
            FaultKind::Read
        }
    }
}

/// State saved by the trap entry stub.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TrapFrame {
    pub vector: u8,
    /// CPU-pushed error code, zero for vectors without one.
    pub error_code: u64,
    /// `CR2` at entry; only meaningful for page faults.
    pub fault_address: VirtualAddress,
}

/// Why the task trapped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    Syscall,
    Device(u8),
    PageFault(Fault),
    Other { vector: u8, error_code: u64 },
}

impl TrapCause {
    #[must_use]
    pub fn classify(frame: &TrapFrame) -> Self {
        match frame.vector {
            PAGE_FAULT_VECTOR => {
                let err = PageFaultError::from_bits(frame.error_code);
                // Corrupt paging structures are a kernel bug, not demand paging.
                if err.reserved_bit() {
                    Self::Other {
                        vector: frame.vector,
                        error_code: frame.error_code,
                    }
                } else {
                    Self::PageFault(Fault::new(frame.fault_address, err.kind()))
                }
            }
            SYSCALL_VECTOR => Self::Syscall,
            vector if vector >= FIRST_DEVICE_VECTOR => Self::Device(vector),
            vector => Self::Other {
                vector,
                error_code: frame.error_code,
            },
        }
    }
}

/// Why a task is being killed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Termination {
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error("unexpected trap {vector:#04x}, error code {error_code:#x}")]
    UnexpectedTrap { vector: u8, error_code: u64 },
}

/// What the trap layer does after [`handle_user_trap`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapOutcome {
    /// Return to user mode and retry the faulting instruction.
    Resume(Resolved),
    /// Hand over to the system-call dispatcher.
    Syscall,
    /// Hand over to the driver registered for this vector.
    Device(u8),
    /// Kill the task.
    Terminate(Termination),
}

/// Dispatch a trap taken while `task` was running.
///
/// Page faults are resolved here; syscalls and device interrupts are only
/// classified and passed back.
pub fn handle_user_trap<M, P, F>(
    frames: &FrameAllocator<M>,
    task: &mut TaskMemory<'_, P, F>,
    frame: &TrapFrame,
) -> TrapOutcome
where
    M: PhysMapper,
    P: PageTableOps,
    F: BackingFile,
{
    match TrapCause::classify(frame) {
        TrapCause::Syscall => TrapOutcome::Syscall,
        TrapCause::Device(vector) => TrapOutcome::Device(vector),
        TrapCause::PageFault(fault) => match resolve_fault(frames, task, fault) {
            Resolution::Resumed(resolved) => TrapOutcome::Resume(resolved),
            Resolution::Terminated(err) => TrapOutcome::Terminate(err.into()),
        },
        TrapCause::Other { vector, error_code } => {
            log::error!(
                "pid {}: unexpected trap {vector:#04x} error code {error_code:#x} at {}",
                task.pid,
                frame.fault_address
            );
            TrapOutcome::Terminate(Termination::UnexpectedTrap { vector, error_code })
        }
    }
}
