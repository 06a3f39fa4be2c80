//! # Kernel Configuration
//!
//! Compile-time constants that govern the memory subsystem: where user space
//! ends, where file mappings are placed, how physical memory is reached, how
//! many processors the per-CPU structures are sized for and how the frame
//! allocator behaves under pressure.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Address-space boundaries shared by the page-table code and the pager:
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//!                       │   (text, data, heap, stacks)    │
//!                       │               ...               │
//!                       │   file mappings grow downward   │
//! MMAP_TOP              ├─────────────────────────────────┤ 0x0000_7000_0000_0000
//!                       │   reserved (stack, trampolines) │
//! USER_SPACE_END        ├─────────────────────────────────┤ 0x0000_8000_0000_0000
//!                       │   non-canonical hole            │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//!                       │   ...                           │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Allocator Tuning ([`tuning`])
//! Processor count, steal batch size, VMA table capacity and the sentinel
//! bytes written into pages on allocation and release.
//!
//! All values are `const` and validated by compile-time assertions, so an
//! inconsistent configuration fails the build instead of the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod tuning;
