//! # Hypervisor bring-up core
//!
//! Takes every physical CPU from reset to a verified, VMX-capable state and
//! back down again, for orderly shutdown and around S3.
//!
//! ## Overview
//!
//! ```text
//!            leader (boot core)                         followers
//!   caps::detect_platform ──► ClusterState::caps
//!   registry: Init → Initializing
//!   smp::start_all_followers ── SIPI ─────────────►  boot::follower_main
//!        poll UpCount                                 registry: → Initializing
//!                                                     SyncFlag::wait_until(GO)
//!   SyncFlag::release(GO) ──────────────────────────► vmx_on, → Running
//!   registry: → Running                               smp::follower_idle_loop
//! ```
//!
//! ## Key Components
//!
//! * [`hw::Hardware`] is the only way this crate touches the machine. The
//!   native implementation issues the instructions; [`hw::sim`] (feature
//!   `sim`, always on in tests) is a deterministic fake.
//! * [`caps`] decides whether the platform can be virtualized on.
//! * [`registry::ClusterState`] owns every per-core record, the active-core
//!   bitmap, the up-count and the bring-up rendezvous flag.
//! * [`smp`] starts and stops followers and dispatches cross-core calls.
//! * [`pm`] sequences S3, S5 and reset.
//! * [`boot`] ties it together into the leader and follower entry points.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(feature = "sim", not(any(test, doctest))))]
extern crate std;

pub mod boot;
pub mod caps;
pub mod fatal;
pub mod hw;
pub mod pm;
pub mod registry;
pub mod smp;

pub use boot::{BootError, boot_follower, boot_leader, follower_main, leader_main};
pub use caps::{Deficiencies, Deficiency, PlatformCapabilities, detect_platform};
pub use hw::{Hardware, IpiDestination};
pub use registry::{ClusterState, CoreId, LifecycleState, TransitionError};
pub use smp::{SmpCall, SmpError, start_all_followers, stop_all_followers};
