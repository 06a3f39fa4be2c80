//! # Physical Page Allocation
//!
//! Owner of every physical page above the kernel image. Pages are handed out
//! and taken back one at a time, carry a reference count so several address
//! spaces can share them, and are spread over per-CPU free lists so that
//! processors rarely contend with each other.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  FrameAllocator<M>                       │
//! │  allocate_page · release_page · add/drop_reference       │
//! └───────┬───────────────────────┬──────────────────────────┘
//!         │                       │
//! ┌───────▼──────────────┐ ┌──────▼─────────────────────────┐
//! │ PerCpu<SpinLock<     │ │ RefCountTable                  │
//! │   FreeList>>         │ │ SpinLock<Vec<u32>>, one slot   │
//! │ one intrusive list   │ │ per managed page               │
//! │ per processor        │ │                                │
//! └───────┬──────────────┘ └────────────────────────────────┘
//!         │ links live inside the free pages
//! ┌───────▼──────────────────────────────────────────────────┐
//! │ PhysMapper (HHDM on hardware, HostedRam under test)      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`FrameAllocator`])
//!
//! * **Invariant**: a page is on a free list if and only if its reference
//!   count is zero.
//! * **Allocation**: pop from the calling CPU's list; if it is empty, steal
//!   up to [`AllocatorConfig::steal_batch`] pages from the first non-empty
//!   peer, then pop. [`AllocError::Exhausted`] only when every list is empty.
//! * **Release**: decrement; the last release refills the page with the
//!   release sentinel and pushes it onto the releasing CPU's list.
//! * **Double release** and references to free pages `panic!`: they mean
//!   kernel state is already corrupt.
//! * **Sentinels**: fresh pages read `0x05`, freed pages `0x01`, so stale or
//!   uninitialized use shows up as a recognizable pattern.
//!
//! ### Virtual Memory Manager ([`Vmm`])
//!
//! An [`AddressSpace`](kernel_vmem::AddressSpace) whose page-table frames
//! come from the frame allocator, usable as
//! [`PageTableOps`](kernel_vmem::PageTableOps).
//!
//! ### Physical Mapper ([`phys_mapper::HhdmPhysMapper`])
//!
//! Reaches physical memory through the higher-half direct map.
//!
//! ## Locking
//!
//! One spin lock per free list and one for the count table. No path holds
//! two of them at once: a steal splits the donor's list under the donor's
//! lock, lets go, and only then splices the batch into its own list.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{AllocatorConfig, FrameAllocator};
//! use kernel_sync::CpuId;
//! use kernel_vmem::hosted::HostedRam;
//! use kernel_vmem::PhysicalPage;
//!
//! let ram = HostedRam::new(PhysicalPage::from_number(0x100), 8);
//! let (start, end) = (ram.base().base(), ram.end());
//! let frames = FrameAllocator::new(ram, start, end, AllocatorConfig::new(2)).unwrap();
//!
//! let page = frames.allocate_page(CpuId::new(1)).unwrap();
//! assert_eq!(frames.reference_count(page), Some(1));
//! frames.release_page(CpuId::new(1), page);
//! assert_eq!(frames.free_pages(), 8);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod error;
mod frame_alloc;
mod free_list;
pub mod phys_mapper;
mod refcount;
mod vmm;

pub use error::{AllocError, InvariantViolation};
pub use frame_alloc::{AllocatorConfig, FrameAllocator, FrameStats};
pub use vmm::{CpuFrames, Vmm};
