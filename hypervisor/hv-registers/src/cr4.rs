use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// Control register 4.
///
/// Only the bits the hypervisor changes are named: `VMXE` around
/// `vmxon`/`vmxoff`, `OSXSAVE` when CPUID advertises XSAVE, and the
/// supervisor protections `SMEP`/`SMAP` the detector insists on. Everything
/// else is carried through untouched.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Cr4 {
    /// Bits 0..=12, owned by the paging and FPU setup.
    #[bits(13)]
    pub low: u16,

    /// `vmxon` raises `#UD` while this is clear.
    pub vmxe: bool,
    pub smxe: bool,

    #[bits(3)]
    pub mid: u8,

    /// Flips `CPUID.01H:ECX.OSXSAVE`; cached feature words go stale.
    pub osxsave: bool,

    #[bits(1)]
    __: u8,

    pub smep: bool,
    pub smap: bool,

    #[bits(42)]
    pub high: u64,
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let cr4: u64;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Cr4 {
    unsafe fn store_unsafe(self) {
        let cr4 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr4, {}", in(reg) cr4, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmxe_and_osxsave_positions() {
        assert_eq!(Cr4::new().with_vmxe(true).into_bits(), 1 << 13);
        assert_eq!(Cr4::new().with_osxsave(true).into_bits(), 1 << 18);
        assert_eq!(Cr4::new().with_smep(true).into_bits(), 1 << 20);
        assert_eq!(Cr4::new().with_smap(true).into_bits(), 1 << 21);
    }

    #[test]
    fn toggling_one_bit_leaves_others() {
        // PAE, PGE, SMEP
        let cr4 = Cr4::from_bits((1 << 5) | (1 << 7) | (1 << 20));
        let on = cr4.with_vmxe(true);
        assert_eq!(on.low(), (1 << 5) | (1 << 7));
        assert!(on.smep() && on.vmxe());
        assert_eq!(on.with_vmxe(false), cr4);
    }
}
