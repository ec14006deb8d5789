//! # Typed `x86_64` Registers for VMX Bring-up
//!
//! Bitfield models of the control registers and model-specific registers the
//! hypervisor inspects while deciding whether a platform can be virtualized,
//! and while switching VMX operation on and off around sleep transitions.
//!
//! Raw instruction access (`mov cr4`, `rdmsr`, `wrmsr`) is only compiled with
//! the `asm` feature; the bitfield types themselves are plain values and can be
//! built from synthetic bits in tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr4;
pub mod msr;

pub use cr4::Cr4;
pub use msr::{
    Ia32ArchCapabilities, Ia32FeatureControl, Msr, VmxAllowedControls, VmxEptVpidCap, VmxMisc,
    ctls,
};

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
