use crate::caps::FeatureTable;
use crate::hw::Hardware;
use hv_cpuid::Feature;
use hv_registers::msr::IA32_L1D_FLUSH;
use hv_registers::{Ia32ArchCapabilities, Msr};

/// How indirect-branch prediction is handled across the VM exit boundary.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum IbrsMode {
    /// No predictor control, or the image is built with retpolines.
    #[default]
    None,
    /// Flush predictor state on every privilege-boundary crossing.
    Raw,
    /// `Raw`, with single-thread indirect-branch predictors (STIBP) also
    /// available.
    Opt,
}

impl IbrsMode {
    #[must_use]
    pub const fn select(features: &FeatureTable) -> Self {
        if cfg!(feature = "retpoline") || !features.has(Feature::IBRS_IBPB) {
            Self::None
        } else if features.has(Feature::STIBP) {
            Self::Opt
        } else {
            Self::Raw
        }
    }
}

/// Side-channel related capabilities, checked once on the leader.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SecurityPosture {
    /// `None` when CPUID does not enumerate the MSR.
    pub arch_capabilities: Option<Ia32ArchCapabilities>,
    pub l1d_flush: bool,
    pub ibrs_ibpb: bool,
    pub stibp: bool,
}

impl SecurityPosture {
    pub fn read(hw: &impl Hardware, features: &FeatureTable) -> Self {
        Self {
            arch_capabilities: features
                .has(Feature::ARCH_CAP)
                .then(|| Ia32ArchCapabilities::from_bits(hw.read_msr(Msr::IA32_ARCH_CAPABILITIES))),
            l1d_flush: features.has(Feature::L1D_FLUSH),
            ibrs_ibpb: features.has(Feature::IBRS_IBPB),
            stibp: features.has(Feature::STIBP),
        }
    }

    const fn skip_l1dfl_vmentry(&self) -> bool {
        match self.arch_capabilities {
            Some(caps) => caps.skip_l1dfl_vmentry(),
            None => false,
        }
    }

    /// Architectural capabilities are enumerated, L1TF is handled either by
    /// the flush command or by the processor itself, and some indirect
    /// branch control exists.
    #[must_use]
    pub const fn is_sound(&self) -> bool {
        self.arch_capabilities.is_some()
            && (self.l1d_flush || self.skip_l1dfl_vmentry())
            && (self.ibrs_ibpb || self.stibp)
    }

    /// Whether the L1 data cache must be flushed before VM entry.
    #[must_use]
    pub const fn l1d_flush_needed(&self) -> bool {
        let immune = match self.arch_capabilities {
            Some(caps) => caps.rdcl_no() || caps.skip_l1dfl_vmentry(),
            None => false,
        };
        self.l1d_flush && !immune
    }

    /// Flushes L1D on the calling core if [`l1d_flush_needed`](Self::l1d_flush_needed).
    pub fn l1d_flush(&self, hw: &impl Hardware) {
        if self.l1d_flush_needed() {
            hw.write_msr(Msr::IA32_FLUSH_CMD, IA32_L1D_FLUSH);
        }
    }
}
