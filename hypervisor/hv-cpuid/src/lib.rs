//! # CPUID Leaves
//!
//! Typed views over the CPUID leaves the capability detector consumes. Every
//! parser takes a [`CpuidResult`] by value, so the same code decodes real
//! hardware output and synthetic register values in tests. Executing the
//! instruction itself is gated behind the `asm` feature.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod address_sizes;
mod brand;
mod features;
mod leaf01h;
mod ranges;

pub use address_sizes::AddressSizes;
pub use brand::BrandString;
pub use features::{CpuidRegister, FEATURE_WORDS, Feature, FeatureWord};
pub use leaf01h::{Leaf01h, Leaf1Eax, Leaf1Ebx};
pub use ranges::{CpuVendor, CpuidRanges};

/// Vendor string and maximum basic leaf.
pub const LEAF_VENDOR: u32 = 0x00;
/// Version information and classic feature flags.
pub const LEAF_FEATURES: u32 = 0x01;
/// Structured extended feature flags (subleaf 0).
pub const LEAF_EXTENDED_FEATURES: u32 = 0x07;
/// TSC / core crystal clock ratio. The hypervisor requires at least this basic level.
pub const LEAF_TSC_CRYSTAL: u32 = 0x15;
/// Maximum extended leaf.
pub const LEAF_MAX_EXTENDED: u32 = 0x8000_0000;
/// Extended signature and feature bits.
pub const LEAF_EXTENDED_FUNCTION_1: u32 = 0x8000_0001;
/// Brand string, part 1 of 3.
pub const LEAF_BRAND_1: u32 = 0x8000_0002;
/// Brand string, part 2 of 3.
pub const LEAF_BRAND_2: u32 = 0x8000_0003;
/// Brand string, part 3 of 3.
pub const LEAF_BRAND_3: u32 = 0x8000_0004;
/// Physical and linear address sizes.
pub const LEAF_ADDRESS_SIZE: u32 = 0x8000_0008;

/// The four output registers of one `cpuid` invocation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl CpuidResult {
    #[must_use]
    pub const fn new(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
        Self { eax, ebx, ecx, edx }
    }

    #[must_use]
    pub const fn register(&self, reg: CpuidRegister) -> u32 {
        match reg {
            CpuidRegister::Eax => self.eax,
            CpuidRegister::Ebx => self.ebx,
            CpuidRegister::Ecx => self.ecx,
            CpuidRegister::Edx => self.edx,
        }
    }

    pub const fn register_mut(&mut self, reg: CpuidRegister) -> &mut u32 {
        match reg {
            CpuidRegister::Eax => &mut self.eax,
            CpuidRegister::Ebx => &mut self.ebx,
            CpuidRegister::Ecx => &mut self.ecx,
            CpuidRegister::Edx => &mut self.edx,
        }
    }
}

/// Execute CPUID with the given leaf and subleaf.
///
/// # Safety
/// The CPUID instruction must be available (always true in long mode).
#[cfg(feature = "asm")]
#[inline(always)]
#[allow(unused_assignments, clippy::inline_always)]
pub unsafe fn cpuid(leaf: u32, subleaf: u32) -> CpuidResult {
    let (mut eax, mut ebx, mut ecx, mut edx) = (leaf, 0u32, subleaf, 0u32);
    unsafe {
        core::arch::asm!(
            "push rbx",
            "cpuid",
            "mov {ebx_out:e}, ebx",
            "pop rbx",
            ebx_out = lateout(reg) ebx,
            inlateout("eax") eax,
            inlateout("ecx") ecx,
            lateout("edx") edx,
            options(nomem, preserves_flags),
        );
    }
    CpuidResult { eax, ebx, ecx, edx }
}
