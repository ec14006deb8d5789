//! # Cross-core synchronization primitives
//!
//! Nothing here yields to a scheduler; every wait is a busy-wait on a
//! shared word. The crate provides:
//!
//! - [`SyncFlag`], the rendezvous word followers spin on during bring-up,
//!   together with the [`WaitStrategy`] used while spinning,
//! - [`SpinLock`], which serializes patching of the startup trampoline,
//! - [`SyncOnceCell`], used to publish the detected platform capabilities
//!   from the boot core to everybody else.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod barrier;
mod spin_lock;
mod sync_once_cell;

pub use barrier::{AdaptiveWait, PauseSpin, SyncFlag, WaitStrategy};
#[cfg(all(feature = "asm", target_arch = "x86_64", target_os = "none"))]
pub use barrier::MonitorMwait;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
