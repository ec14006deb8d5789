use crate::CpuidResult;

/// Low 12 bits of an address are the page offset.
const PAGE_MASK: u64 = !0xFFF;

/// CPUID.80000008H:EAX — physical and linear address widths.
///
/// A zero width means the leaf was not available; the capability gate
/// rejects such platforms.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressSizes {
    pub phys_bits: u8,
    pub virt_bits: u8,
}

impl From<CpuidResult> for AddressSizes {
    #[allow(clippy::cast_possible_truncation)]
    fn from(r: CpuidResult) -> Self {
        Self {
            phys_bits: (r.eax & 0xFF) as u8,
            virt_bits: ((r.eax >> 8) & 0xFF) as u8,
        }
    }
}

impl AddressSizes {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.phys_bits != 0 && self.virt_bits != 0
    }

    /// Page-aligned mask covering every implemented physical address bit.
    #[must_use]
    pub const fn physical_address_mask(&self) -> u64 {
        match self.phys_bits {
            0 => 0,
            bits @ 1..64 => ((1u64 << bits) - 1) & PAGE_MASK,
            _ => PAGE_MASK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_widths_and_mask() {
        let sizes = AddressSizes::from(CpuidResult::new(0x3027, 0, 0, 0));
        assert_eq!(sizes.phys_bits, 39);
        assert_eq!(sizes.virt_bits, 48);
        assert!(sizes.is_valid());
        assert_eq!(sizes.physical_address_mask(), 0x0000_007F_FFFF_F000);
    }

    #[test]
    fn missing_leaf_is_invalid() {
        let sizes = AddressSizes::default();
        assert!(!sizes.is_valid());
        assert_eq!(sizes.physical_address_mask(), 0);
    }
}
