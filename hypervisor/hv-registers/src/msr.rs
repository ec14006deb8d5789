//! # Model-Specific Registers (MSR) used by the VMX capability gate
//!
//! The hypervisor reads a handful of MSRs exactly once on the boot core to
//! decide whether VMX operation is possible and which optional VMX features
//! may be turned on later:
//!
//! - `IA32_FEATURE_CONTROL` (`0x3A`): firmware lock and VMX enable bits.
//! - `IA32_VMX_PINBASED_CTLS` / `IA32_VMX_PROCBASED_CTLS` / `IA32_VMX_PROCBASED_CTLS2`
//!   (`0x481`, `0x482`, `0x48B`): allowed-0 / allowed-1 settings of the
//!   VM-execution controls (Intel SDM Vol. 3, Appendix A.3).
//! - `IA32_VMX_MISC` (`0x485`) and `IA32_VMX_EPT_VPID_CAP` (`0x48C`).
//! - `IA32_ARCH_CAPABILITIES` (`0x10A`) for the speculation/L1TF posture.
//!
//! The x2APIC ID and ICR registers (`0x802`, `0x830`) identify the running
//! core and send the startup and notification IPIs.
//!
//! Two more are written on every core: `IA32_TSC_AUX` receives the logical
//! core index and `IA32_TIME_STAMP_COUNTER` is rewritten after an S3 resume.

mod arch_capabilities;
mod feature_control;
mod vmx;

pub use arch_capabilities::Ia32ArchCapabilities;
pub use feature_control::Ia32FeatureControl;
pub use vmx::{VmxAllowedControls, VmxEptVpidCap, VmxMisc, ctls};

/// Identifies a **Model-Specific Register (MSR)** by its architectural index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msr(pub u32);

impl Msr {
    pub const IA32_TIME_STAMP_COUNTER: Self = Self::new(0x10);
    pub const IA32_FEATURE_CONTROL: Self = Self::new(0x3A);
    pub const IA32_ARCH_CAPABILITIES: Self = Self::new(0x10A);
    pub const IA32_FLUSH_CMD: Self = Self::new(0x10B);
    pub const IA32_VMX_BASIC: Self = Self::new(0x480);
    pub const IA32_VMX_PINBASED_CTLS: Self = Self::new(0x481);
    pub const IA32_VMX_PROCBASED_CTLS: Self = Self::new(0x482);
    pub const IA32_VMX_MISC: Self = Self::new(0x485);
    pub const IA32_VMX_PROCBASED_CTLS2: Self = Self::new(0x48B);
    pub const IA32_VMX_EPT_VPID_CAP: Self = Self::new(0x48C);
    /// x2APIC ID register.
    pub const IA32_X2APIC_APICID: Self = Self::new(0x802);
    /// x2APIC interrupt command register; one 64-bit write sends the IPI.
    pub const IA32_X2APIC_ICR: Self = Self::new(0x830);
    pub const IA32_TSC_AUX: Self = Self::new(0xC000_0103);

    /// Creates a new `Msr` from a raw index.
    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying raw MSR index.
    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Write a 64-bit value to this MSR.
    ///
    /// # Safety
    /// - Executes the privileged `WRMSR` instruction (CPL 0 only, `#GP(0)` otherwise).
    /// - The MSR must exist and the value must be legal for it.
    #[cfg(feature = "asm")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    #[doc(alias = "wrmsr")]
    pub unsafe fn store_raw(self, val: u64) {
        let lo = (val & 0xFFFF_FFFF) as u32;
        let hi = (val >> 32) as u32;
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") self.raw(),
                in("eax") lo,
                in("edx") hi,
                options(nostack, preserves_flags)
            );
        }
    }

    /// Reads the 64-bit value of this MSR.
    ///
    /// # Safety
    /// Executes the privileged `RDMSR` instruction; the MSR must exist.
    #[cfg(feature = "asm")]
    #[inline]
    #[doc(alias = "rdmsr")]
    pub unsafe fn load_raw(self) -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") self.raw(),
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}

/// Value written to `IA32_FLUSH_CMD` to flush the L1 data cache.
pub const IA32_L1D_FLUSH: u64 = 1;
