//! # Hardware access seam
//!
//! Every privileged instruction the core needs, behind one trait. All
//! methods act on the *calling* core; the only cross-core effects are the
//! IPIs.

#[cfg(all(feature = "asm", target_arch = "x86_64", target_os = "none"))]
mod native;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(all(feature = "asm", target_arch = "x86_64", target_os = "none"))]
pub use native::NativeHardware;

use hv_acpi::RegisterIo;
use hv_cpuid::CpuidResult;
use hv_registers::{Cr4, Ia32FeatureControl, Msr};

/// Target of a startup IPI.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IpiDestination {
    /// Every core but the sender (ICR shorthand `0b11`).
    AllExcludingSelf,
    /// One core, by local-APIC id.
    Apic(u32),
}

pub trait Hardware: RegisterIo + Sync {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult;
    fn read_msr(&self, msr: Msr) -> u64;
    fn write_msr(&self, msr: Msr, value: u64);
    fn read_cr4(&self) -> Cr4;
    fn write_cr4(&self, cr4: Cr4);

    fn current_apic_id(&self) -> u32;
    /// INIT followed by the startup sequence; the target begins fetching at
    /// `start_paddr` in real mode. Fire and forget.
    fn send_startup_ipi(&self, dest: IpiDestination, start_paddr: u64);
    /// Kicks a core out of its idle loop so it looks at its mailbox.
    fn send_notification(&self, apic_id: u32);

    fn udelay(&self, us: u32);
    fn read_cycles(&self) -> u64;
    fn write_cycles(&self, value: u64);

    /// Sets `CR4.VMXE` and enters VMX root operation. `IA32_FEATURE_CONTROL`
    /// must already be locked with VMX enabled; see [`enter_vmx`].
    fn vmx_on(&self);
    /// Leaves VMX root operation and clears `CR4.VMXE`.
    fn vmx_off(&self);
    /// Writes back and invalidates all caches.
    fn flush_caches(&self);
    fn disable_irq(&self);
    fn enable_irq(&self);

    #[inline]
    fn pause(&self) {
        core::hint::spin_loop();
    }
    /// One iteration of the follower idle loop.
    fn cpu_idle(&self);
    fn halt_forever(&self) -> !;

    fn write_phys_u32(&self, paddr: u64, value: u32);
    fn read_phys_u64(&self, paddr: u64) -> u64;
    fn write_phys_u64(&self, paddr: u64, value: u64);
}

/// Enters VMX root operation on the calling core. If firmware left
/// `IA32_FEATURE_CONTROL` unlocked, it is locked here with VMX outside SMX
/// enabled first.
pub fn enter_vmx(hw: &impl Hardware) {
    let control = Ia32FeatureControl::from_bits(hw.read_msr(Msr::IA32_FEATURE_CONTROL));
    if !control.lock() {
        log::debug!("locking IA32_FEATURE_CONTROL");
        let locked = control.with_vmx_outside_smx(true).with_lock(true);
        hw.write_msr(Msr::IA32_FEATURE_CONTROL, locked.into_bits());
    }
    hw.vmx_on();
}
