//! # ACPI register access for power transitions
//!
//! The hypervisor does not parse ACPI tables itself. Everything it needs to
//! put the platform to sleep, power it off or reset it is handed over as
//! plain register descriptors at board-configuration time; this crate knows
//! how to drive those descriptors.
//!
//! ## Overview
//!
//! ```text
//! board config (PM1 GAS descriptors, S3/S5 packages, reset register)
//!     ↓
//! SleepStateData / ResetRegister
//!     ↓
//! GenericAddress::read16 / write16
//!     ↓
//! RegisterIo (MMIO or port I/O, chosen by the address-space id)
//! ```
//!
//! ## Key Components
//!
//! ### Generic Address Structure ([`GenericAddress`])
//! The ACPI GAS: address space id, register bit width, bit offset, access
//! size and the address itself. Only the system-memory and system-I/O
//! spaces are routed; any other id is treated as port I/O.
//!
//! ### I/O seam ([`RegisterIo`])
//! The only place actual hardware is touched. The hypervisor core supplies
//! a native implementation; tests supply a recording fake.
//!
//! ### Sleep-state sequencing ([`enter_sleep_state`])
//! Writes the PM1 control values and polls the PM1 status registers until
//! `WAK_STS` is observed. The poll has no timeout: while the platform is
//! asleep nothing executes, and on wake the bit is already set.
//!
//! ### Processor power-state descriptors ([`CpuStateInfo`])
//! `_PSS`/`_CST`-shaped performance and idle-state entries, grouped per
//! processor model.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod gas;
mod pstate;
mod reset;
mod sleep;

pub use gas::{GenericAddress, RegisterIo, SpaceId};
pub use pstate::{CpuStateInfo, CpuStateTable, CxState, MAX_CX_ENTRY, MAX_PSTATE, PxState};
pub use reset::{CF9_PORT, ResetMethod, ResetRegister};
pub use sleep::{
    BIT_SLP_EN, BIT_SLP_TYPX, BIT_WAK_STS, SleepStateData, SleepTypePackage, enter_sleep_state,
};
