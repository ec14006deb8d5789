use crate::CpuidResult;
use bitfield_struct::bitfield;

/// CPUID.01H — version information and the classic feature words.
///
/// Only EAX/EBX are decoded here; ECX/EDX are kept raw because the detector
/// stores them verbatim in its feature table.
///
/// Reference: Intel SDM Vol. 2A, "CPUID—CPU Identification", leaf 01H.
#[derive(Copy, Clone, Debug)]
pub struct Leaf01h {
    pub eax: Leaf1Eax,
    pub ebx: Leaf1Ebx,
    pub ecx: u32,
    pub edx: u32,
}

impl From<CpuidResult> for Leaf01h {
    fn from(r: CpuidResult) -> Self {
        Self {
            eax: Leaf1Eax::from_bits(r.eax),
            ebx: Leaf1Ebx::from_bits(r.ebx),
            ecx: r.ecx,
            edx: r.edx,
        }
    }
}

impl Leaf01h {
    #[inline]
    #[must_use]
    pub const fn family(&self) -> u16 {
        self.eax.effective_family()
    }

    #[inline]
    #[must_use]
    pub const fn model(&self) -> u8 {
        self.eax.effective_model()
    }

    #[inline]
    #[must_use]
    pub const fn initial_apic_id(&self) -> u8 {
        self.ebx.initial_apic_id()
    }
}

/// CPUID.01H:EAX — Version Information.
#[bitfield(u32)]
pub struct Leaf1Eax {
    /// Stepping ID (bits 3:0).
    #[bits(4)]
    pub stepping: u8,
    /// Base model (bits 7:4).
    #[bits(4)]
    pub model: u8,
    /// Base family (bits 11:8).
    #[bits(4)]
    pub family: u8,
    /// Processor type (bits 13:12).
    #[bits(2)]
    pub cpu_type: u8,
    #[bits(2)]
    _rsv14_15: u8,
    /// Extended model (bits 19:16).
    #[bits(4)]
    pub ext_model: u8,
    /// Extended family (bits 27:20).
    #[bits(8)]
    pub ext_family: u8,
    #[bits(4)]
    _rsv28_31: u8,
}

impl Leaf1Eax {
    /// Family with the extension folded in:
    /// base family `0xF` → base + extended family, anything else → base.
    /// Wider than either field; `0xF + 0xFF` does not fit a byte.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn effective_family(self) -> u16 {
        let fam = self.family() as u16;
        if fam == 0x0F {
            fam + self.ext_family() as u16
        } else {
            fam
        }
    }

    /// Model with the extension folded in when the effective family is 6 or above.
    #[inline]
    #[must_use]
    pub const fn effective_model(self) -> u8 {
        let base = self.model();
        if self.effective_family() >= 0x06 {
            base + (self.ext_model() << 4)
        } else {
            base
        }
    }
}

/// CPUID.01H:EBX — Brand/CLFLUSH/Logical Count/APIC ID.
#[bitfield(u32)]
pub struct Leaf1Ebx {
    /// Brand index (bits 7:0).
    #[bits(8)]
    pub brand_index: u8,
    /// CLFLUSH line size in 8-byte units (bits 15:8).
    #[bits(8)]
    pub clflush_line_size_8b: u8,
    /// Logical processors per package (legacy) (bits 23:16).
    #[bits(8)]
    pub logical_processor_count: u8,
    /// Initial APIC ID (bits 31:24).
    #[bits(8)]
    pub initial_apic_id: u8,
}
