//! # Demand Paging for File Mappings
//!
//! A process maps a file with [`map_file`]; nothing is allocated until the
//! process touches the region. The resulting page fault reaches
//! [`resolve_fault`], which finds the [`VmArea`] covering the address and
//! either
//!
//! * makes an existing read-only translation writable when the region allows
//!   writing and a write was attempted, or
//! * allocates a page from the [`FrameAllocator`](kernel_alloc::FrameAllocator),
//!   zero-fills it, reads the file contents into it with the inode locked, and
//!   installs it.
//!
//! Pages are installed read-only even in writable regions unless the
//! installing fault was a write, so pages are only marked dirty once written.
//!
//! Any failure terminates the faulting task only. Pages allocated along the
//! way are released before the fault is reported.
//!
//! ## Modules
//!
//! - [`vma`]: regions and the fixed-size per-process region table
//! - [`backing`]: the inode interface regions are read from, plus [`MemFile`]
//! - [`fault`]: the resolver
//! - [`trap`]: error-code decoding and trap dispatch
//! - [`mmap`]: region creation and removal
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kernel_alloc::{AllocatorConfig, FrameAllocator, Vmm};
//! use kernel_pager::{Fault, FaultKind, MemFile, Protection, TaskMemory, VmaTable};
//! use kernel_pager::{map_file, resolve_fault};
//! use kernel_sync::CpuId;
//! use kernel_vmem::hosted::HostedRam;
//! use kernel_vmem::PhysicalPage;
//!
//! let ram = HostedRam::new(PhysicalPage::from_number(0x100), 16);
//! let (start, end) = (ram.base().base(), ram.end());
//! let frames = FrameAllocator::new(ram, start, end, AllocatorConfig::new(1)).unwrap();
//! let cpu = CpuId::new(0);
//!
//! let mut vmas = VmaTable::new();
//! let file = Arc::new(MemFile::new(b"hello".to_vec()));
//! let base = map_file(&mut vmas, 5, Protection::READ, file, 0).unwrap();
//!
//! let mut vmm = Vmm::new(&frames, cpu).unwrap();
//! let mut task = TaskMemory { pid: 1, cpu, vmas: &vmas, page_table: &mut vmm };
//! let outcome = resolve_fault(&frames, &mut task, Fault::new(base, FaultKind::Read));
//! assert!(outcome.is_resumed());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod backing;
pub mod fault;
pub mod mmap;
pub mod trap;
pub mod vma;

pub use backing::{BackingFile, InodeRead, MemFile, ReadError};
pub use fault::{Fault, FaultError, FaultKind, Resolution, Resolved, TaskMemory, resolve_fault};
pub use mmap::{MmapError, map_file, release_all, unmap_range};
pub use trap::{PageFaultError, Termination, TrapCause, TrapFrame, TrapOutcome, handle_user_trap};
pub use vma::{Protection, VmArea, VmaError, VmaTable};
