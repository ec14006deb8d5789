//! Bare-metal implementation of [`Hardware`].
//!
//! Assumes x2APIC mode and an identity mapping of every physical address
//! handed to it (trampoline, FACS, VMXON regions, MMIO registers).

use super::{Hardware, IpiDestination};
use hv_acpi::RegisterIo;
use hv_cpuid::CpuidResult;
use hv_registers::{Cr4, LoadRegisterUnsafe, Msr, StoreRegisterUnsafe};

/// ICR delivery mode INIT, level assert.
const ICR_INIT_ASSERT: u64 = (0b101 << 8) | (1 << 14);
/// ICR delivery mode STARTUP.
const ICR_STARTUP: u64 = 0b110 << 8;
/// ICR destination shorthand "all excluding self".
const ICR_ALL_EXCLUDING_SELF: u64 = 0b11 << 18;
/// Fixed-delivery vector used to kick idle followers.
pub const NOTIFY_VECTOR: u8 = 0xF2;

const INIT_DEASSERT_DELAY_US: u32 = 10_000;
const STARTUP_RETRY_DELAY_US: u32 = 200;

pub struct NativeHardware {
    tsc_khz: u64,
    /// Physical address of the 4 KiB VMXON region of a logical core.
    vmxon_region: fn(u16) -> u64,
}

impl NativeHardware {
    #[must_use]
    pub const fn new(tsc_khz: u64, vmxon_region: fn(u16) -> u64) -> Self {
        Self {
            tsc_khz,
            vmxon_region,
        }
    }

    fn write_icr(&self, dest: IpiDestination, command: u64) {
        let value = match dest {
            IpiDestination::AllExcludingSelf => command | ICR_ALL_EXCLUDING_SELF,
            IpiDestination::Apic(id) => command | (u64::from(id) << 32),
        };
        self.write_msr(Msr::IA32_X2APIC_ICR, value);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn current_core_index(&self) -> u16 {
        self.read_msr(Msr::IA32_TSC_AUX) as u16
    }
}

impl Hardware for NativeHardware {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        unsafe { hv_cpuid::cpuid(leaf, subleaf) }
    }

    fn read_msr(&self, msr: Msr) -> u64 {
        unsafe { msr.load_raw() }
    }

    fn write_msr(&self, msr: Msr, value: u64) {
        unsafe { msr.store_raw(value) }
    }

    fn read_cr4(&self) -> Cr4 {
        unsafe { Cr4::load_unsafe() }
    }

    fn write_cr4(&self, cr4: Cr4) {
        unsafe { cr4.store_unsafe() }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn current_apic_id(&self) -> u32 {
        self.read_msr(Msr::IA32_X2APIC_APICID) as u32
    }

    fn send_startup_ipi(&self, dest: IpiDestination, start_paddr: u64) {
        let vector = (start_paddr >> 12) & 0xFF;
        self.write_icr(dest, ICR_INIT_ASSERT);
        self.udelay(INIT_DEASSERT_DELAY_US);
        self.write_icr(dest, ICR_STARTUP | vector);
        self.udelay(STARTUP_RETRY_DELAY_US);
        self.write_icr(dest, ICR_STARTUP | vector);
    }

    fn send_notification(&self, apic_id: u32) {
        self.write_icr(IpiDestination::Apic(apic_id), u64::from(NOTIFY_VECTOR));
    }

    fn udelay(&self, us: u32) {
        let ticks = u64::from(us) * self.tsc_khz / 1000;
        let start = self.read_cycles();
        while self.read_cycles().wrapping_sub(start) < ticks {
            core::hint::spin_loop();
        }
    }

    fn read_cycles(&self) -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            core::arch::asm!(
                "lfence",
                "rdtsc",
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }

    fn write_cycles(&self, value: u64) {
        self.write_msr(Msr::IA32_TIME_STAMP_COUNTER, value);
    }

    fn vmx_on(&self) {
        let region = (self.vmxon_region)(self.current_core_index());
        #[allow(clippy::cast_possible_truncation)]
        let revision = (self.read_msr(Msr::IA32_VMX_BASIC) & 0x7FFF_FFFF) as u32;
        self.write_phys_u32(region, revision);
        self.write_cr4(self.read_cr4().with_vmxe(true));
        unsafe {
            core::arch::asm!("vmxon [{}]", in(reg) &raw const region, options(nostack));
        }
    }

    fn vmx_off(&self) {
        unsafe {
            core::arch::asm!("vmxoff", options(nomem, nostack));
        }
        self.write_cr4(self.read_cr4().with_vmxe(false));
    }

    fn flush_caches(&self) {
        unsafe { core::arch::asm!("wbinvd", options(nostack, preserves_flags)) }
    }

    fn disable_irq(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    fn enable_irq(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    fn cpu_idle(&self) {
        core::hint::spin_loop();
    }

    fn halt_forever(&self) -> ! {
        loop {
            unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) }
        }
    }

    fn write_phys_u32(&self, paddr: u64, value: u32) {
        unsafe { core::ptr::write_volatile(paddr as *mut u32, value) }
    }

    fn read_phys_u64(&self, paddr: u64) -> u64 {
        unsafe { core::ptr::read_volatile(paddr as *const u64) }
    }

    fn write_phys_u64(&self, paddr: u64, value: u64) {
        unsafe { core::ptr::write_volatile(paddr as *mut u64, value) }
    }
}

impl RegisterIo for NativeHardware {
    fn mmio_read16(&self, paddr: u64) -> u16 {
        unsafe { core::ptr::read_volatile(paddr as *const u16) }
    }

    fn mmio_write16(&self, paddr: u64, value: u16) {
        unsafe { core::ptr::write_volatile(paddr as *mut u16, value) }
    }

    fn pio_read16(&self, port: u16) -> u16 {
        let v: u16;
        unsafe {
            core::arch::asm!(
                "in ax, dx",
                in("dx") port,
                out("ax") v,
                options(nomem, nostack, preserves_flags)
            );
        }
        v
    }

    fn pio_write16(&self, port: u16, value: u16) {
        unsafe {
            core::arch::asm!(
                "out dx, ax",
                in("dx") port,
                in("ax") value,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    fn pio_write8(&self, port: u16, value: u8) {
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") port,
                in("al") value,
                options(nomem, nostack, preserves_flags)
            );
        }
    }
}
