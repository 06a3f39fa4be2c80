//! # Kernel synchronization primitives
//!
//! - [`SpinLock`]: test-and-test-and-set spin lock with an RAII guard.
//! - [`CpuId`] / [`PerCpu`]: explicit processor identity and a fixed array of
//!   per-processor slots, each on its own cache line.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod per_cpu;
mod spin_lock;

pub use per_cpu::{CpuId, PerCpu};
pub use spin_lock::{SpinLock, SpinLockGuard};
