use crate::CpuidResult;

/// Maximum supported basic / extended leaves and the vendor, from
/// `cpuid(0)` and `cpuid(0x8000_0000)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuidRanges {
    pub max_basic: u32,
    pub max_extended: u32,
    pub vendor: CpuVendor,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CpuVendor {
    Intel,
    Amd,
    #[default]
    Other,
}

impl CpuidRanges {
    #[must_use]
    pub fn from_leaves(leaf0: CpuidResult, ext0: CpuidResult) -> Self {
        Self {
            max_basic: leaf0.eax,
            max_extended: ext0.eax,
            vendor: CpuVendor::from_signature(leaf0),
        }
    }

    #[inline]
    #[must_use]
    pub const fn has_basic(&self, leaf: u32) -> bool {
        leaf <= self.max_basic
    }

    #[inline]
    #[must_use]
    pub const fn has_ext(&self, leaf: u32) -> bool {
        leaf >= 0x8000_0000 && leaf <= self.max_extended
    }
}

impl CpuVendor {
    /// Decodes the 12-byte vendor signature in `EBX:EDX:ECX` order.
    #[must_use]
    pub fn from_signature(leaf0: CpuidResult) -> Self {
        let mut sig = [0u8; 12];
        sig[0..4].copy_from_slice(&leaf0.ebx.to_le_bytes());
        sig[4..8].copy_from_slice(&leaf0.edx.to_le_bytes());
        sig[8..12].copy_from_slice(&leaf0.ecx.to_le_bytes());
        match &sig {
            b"GenuineIntel" => Self::Intel,
            b"AuthenticAMD" => Self::Amd,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Intel => "Intel",
            Self::Amd => "AMD",
            Self::Other => "Other",
        }
    }
}
