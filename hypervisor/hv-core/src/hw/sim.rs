//! A simulated multi-core machine for host-side tests.
//!
//! Each simulated core is an OS thread bound to a local-APIC id with
//! [`bind_current`]; a thread that never bound itself acts as the first
//! enumerated core. Startup IPIs spawn one thread per responsive target and
//! run the hook registered with [`SimHardware::on_startup_ipi`] on it.
//!
//! Time is virtual: [`Hardware::udelay`] advances a shared microsecond clock
//! and the calling core's cycle counter, and only yields briefly in real
//! time. Writing `SLP_EN` to the PM1a control register "sleeps" instantly:
//! every cycle counter resets and `WAK_STS` is raised.

use crate::hw::{Hardware, IpiDestination};
use crate::pm::{Subsystem, SubsystemControl};
use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};
use hv_acpi::{BIT_SLP_EN, BIT_WAK_STS, GenericAddress, RegisterIo, SleepStateData};
use hv_board::BoardConfig;
use hv_cpuid::{
    BrandString, CpuidResult, Feature, LEAF_ADDRESS_SIZE, LEAF_BRAND_1, LEAF_EXTENDED_FEATURES,
    LEAF_EXTENDED_FUNCTION_1, LEAF_FEATURES, LEAF_MAX_EXTENDED, LEAF_VENDOR,
};
use hv_registers::{Cr4, Ia32FeatureControl, Msr, VmxEptVpidCap, VmxMisc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use std::vec::Vec;

/// Brand string of [`SimHardware::capable`]; one of the built-in power-state tables.
pub const BRAND: &str = "Intel(R) Core(TM) i7-8650U CPU @ 1.90GHz";

/// Simulated cycles per microsecond.
pub const CYCLES_PER_US: u64 = 2_000;

std::thread_local! {
    static CURRENT_APIC: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Makes the calling thread act as the core with local-APIC id `apic_id`.
pub fn bind_current(apic_id: u32) {
    CURRENT_APIC.with(|c| c.set(Some(apic_id)));
}

/// Something the simulated machine was asked to do, in call order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimEvent {
    StartupIpi { dest: IpiDestination, start_paddr: u64 },
    Notify(u32),
    VmxOn(u32),
    VmxOff(u32),
    CacheFlush(u32),
    IrqDisabled(u32),
    IrqEnabled(u32),
    CyclesWritten { apic_id: u32, value: u64 },
    Suspend(Subsystem),
    Resume(Subsystem),
    PortWrite8 { port: u16, value: u8 },
    PortWrite16 { port: u16, value: u16 },
    MmioWrite16 { paddr: u64, value: u16 },
    /// A write to a locked MSR, or `vmxon` without VMX enabled.
    GeneralProtection(u32),
    Slept,
    Halted(u32),
}

type StartupHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Copy, Clone, Debug)]
struct CoreRegs {
    tsc_aux: u64,
    cycles: u64,
    cr4: Cr4,
    in_vmx: bool,
    /// Per-thread `IA32_FEATURE_CONTROL` once written; the machine-wide value before.
    feature_control: Option<u64>,
}

pub struct SimHardware {
    lapic_ids: Vec<u32>,
    cpuid: Mutex<HashMap<(u32, u32), CpuidResult>>,
    msrs: Mutex<HashMap<Msr, u64>>,
    cores: Mutex<HashMap<u32, CoreRegs>>,
    unresponsive: Mutex<HashSet<u32>>,
    clock_us: AtomicU64,
    phys: Mutex<HashMap<u64, u64>>,
    ports: Mutex<HashMap<u16, u16>>,
    mmio: Mutex<HashMap<u64, u16>>,
    sleep: SleepStateData,
    events: Mutex<Vec<SimEvent>>,
    startup: Mutex<Option<StartupHook>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

const fn leaf(eax: u32, ebx: u32, ecx: u32, edx: u32) -> CpuidResult {
    CpuidResult { eax, ebx, ecx, edx }
}

impl SimHardware {
    /// A machine with no CPUID leaves and no MSRs set; it fails every check.
    #[must_use]
    pub fn bare(lapic_ids: &[u32]) -> Self {
        let cores = lapic_ids
            .iter()
            .zip(1u64..)
            .map(|(&id, n)| {
                (
                    id,
                    CoreRegs {
                        tsc_aux: 0,
                        cycles: n * 1_000_000_000,
                        cr4: Cr4::new(),
                        in_vmx: false,
                        feature_control: None,
                    },
                )
            })
            .collect();
        Self {
            lapic_ids: lapic_ids.to_vec(),
            cpuid: Mutex::new(HashMap::new()),
            msrs: Mutex::new(HashMap::new()),
            cores: Mutex::new(cores),
            unresponsive: Mutex::new(HashSet::new()),
            clock_us: AtomicU64::new(0),
            phys: Mutex::new(HashMap::new()),
            ports: Mutex::new(HashMap::new()),
            mmio: Mutex::new(HashMap::new()),
            sleep: BoardConfig::host().sleep,
            events: Mutex::new(Vec::new()),
            startup: Mutex::new(None),
        }
    }

    /// A Kaby Lake-like machine that passes every check.
    #[must_use]
    pub fn capable(lapic_ids: &[u32]) -> Self {
        let hw = Self::bare(lapic_ids);

        let brand = BrandString::from_text(BRAND).to_leaves();
        {
            let mut cpuid = locked(&hw.cpuid);
            // "GenuineIntel"
            cpuid.insert((LEAF_VENDOR, 0), leaf(0x16, 0x756E_6547, 0x6C65_746E, 0x4965_6E69));
            cpuid.insert(
                (LEAF_FEATURES, 0),
                leaf(
                    0x0008_06EA,
                    0,
                    Feature::MONITOR.mask()
                        | Feature::VMX.mask()
                        | Feature::X2APIC.mask()
                        | Feature::TSC_DEADLINE.mask()
                        | Feature::XSAVE.mask(),
                    Feature::MTRR.mask(),
                ),
            );
            cpuid.insert(
                (LEAF_EXTENDED_FEATURES, 0),
                leaf(
                    0,
                    Feature::SMEP.mask() | Feature::SMAP.mask(),
                    0,
                    Feature::IBRS_IBPB.mask()
                        | Feature::STIBP.mask()
                        | Feature::L1D_FLUSH.mask()
                        | Feature::ARCH_CAP.mask(),
                ),
            );
            cpuid.insert((LEAF_MAX_EXTENDED, 0), leaf(LEAF_ADDRESS_SIZE, 0, 0, 0));
            cpuid.insert(
                (LEAF_EXTENDED_FUNCTION_1, 0),
                leaf(
                    0,
                    0,
                    0,
                    Feature::NX.mask() | Feature::PAGE1GB.mask() | Feature::LM.mask(),
                ),
            );
            for (i, regs) in (0u32..).zip(brand) {
                cpuid.insert((LEAF_BRAND_1 + i, 0), regs);
            }
            // 39 physical, 48 linear address bits.
            cpuid.insert((LEAF_ADDRESS_SIZE, 0), leaf(0x3027, 0, 0, 0));
        }

        // Allowed-1 settings (high dword) all set: every control may be used.
        let all_ones = 0xFFFF_FFFF_0000_0000;
        let ept_vpid = VmxEptVpidCap::new()
            .with_page_walk_4(true)
            .with_memtype_wb(true)
            .with_page_2m(true)
            .with_page_1g(true)
            .with_invept(true)
            .with_invept_single_context(true)
            .with_invept_all_context(true)
            .with_invvpid(true)
            .with_invvpid_individual_address(true)
            .with_invvpid_single_context(true)
            .with_invvpid_all_context(true);
        {
            let mut msrs = locked(&hw.msrs);
            msrs.insert(
                Msr::IA32_FEATURE_CONTROL,
                Ia32FeatureControl::new()
                    .with_lock(true)
                    .with_vmx_outside_smx(true)
                    .into_bits(),
            );
            msrs.insert(Msr::IA32_VMX_BASIC, 0x00DA_0400_0000_0004);
            msrs.insert(Msr::IA32_VMX_PINBASED_CTLS, all_ones);
            msrs.insert(Msr::IA32_VMX_PROCBASED_CTLS, all_ones);
            msrs.insert(Msr::IA32_VMX_PROCBASED_CTLS2, all_ones);
            msrs.insert(Msr::IA32_VMX_MISC, VmxMisc::UNRESTRICTED_GUEST);
            msrs.insert(Msr::IA32_VMX_EPT_VPID_CAP, ept_vpid.into_bits());
            msrs.insert(Msr::IA32_ARCH_CAPABILITIES, 0);
        }
        hw
    }

    /// Uses `sleep` instead of the host board's PM1 registers.
    #[must_use]
    pub const fn with_sleep_state(mut self, sleep: SleepStateData) -> Self {
        self.sleep = sleep;
        self
    }

    #[must_use]
    pub fn lapic_ids(&self) -> &[u32] {
        &self.lapic_ids
    }

    /// Clears `feature` in the CPUID leaf it is reported in.
    pub fn clear_feature(&self, feature: Feature) {
        let (leaf, subleaf, reg) = feature.word.source();
        let mut cpuid = locked(&self.cpuid);
        let entry = cpuid.entry((leaf, subleaf)).or_default();
        *entry.register_mut(reg) &= !feature.mask();
    }

    pub fn set_leaf1_eax(&self, eax: u32) {
        locked(&self.cpuid).entry((LEAF_FEATURES, 0)).or_default().eax = eax;
    }

    pub fn set_cpuid(&self, leaf: u32, subleaf: u32, value: CpuidResult) {
        locked(&self.cpuid).insert((leaf, subleaf), value);
    }

    pub fn set_msr(&self, msr: Msr, value: u64) {
        locked(&self.msrs).insert(msr, value);
    }

    /// Last value written to a package-wide MSR.
    #[must_use]
    pub fn msr(&self, msr: Msr) -> u64 {
        locked(&self.msrs).get(&msr).copied().unwrap_or(0)
    }

    /// The core never answers startup IPIs.
    pub fn set_unresponsive(&self, apic_id: u32) {
        locked(&self.unresponsive).insert(apic_id);
    }

    /// Runs `hook` on a fresh thread for every core a startup IPI reaches.
    pub fn on_startup_ipi(&self, hook: impl Fn() + Send + Sync + 'static) {
        *locked(&self.startup) = Some(Arc::new(hook));
    }

    /// Virtual microseconds spent in `udelay` so far.
    #[must_use]
    pub fn clock_us(&self) -> u64 {
        self.clock_us.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn cycles_of(&self, apic_id: u32) -> u64 {
        locked(&self.cores).get(&apic_id).map_or(0, |c| c.cycles)
    }

    #[must_use]
    pub fn in_vmx_operation(&self, apic_id: u32) -> bool {
        locked(&self.cores).get(&apic_id).is_some_and(|c| c.in_vmx)
    }

    #[must_use]
    pub fn phys(&self, paddr: u64) -> u64 {
        locked(&self.phys).get(&paddr).copied().unwrap_or(0)
    }

    pub fn set_phys(&self, paddr: u64, value: u64) {
        locked(&self.phys).insert(paddr, value);
    }

    #[must_use]
    pub fn events(&self) -> Vec<SimEvent> {
        locked(&self.events).clone()
    }

    pub fn clear_events(&self) {
        locked(&self.events).clear();
    }

    /// Polls the event log in real time until `pred` holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[SimEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&locked(&self.events)) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn record(&self, event: SimEvent) {
        locked(&self.events).push(event);
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut CoreRegs) -> R) -> R {
        let apic_id = self.current_apic_id();
        let mut cores = locked(&self.cores);
        let regs = cores.entry(apic_id).or_insert(CoreRegs {
            tsc_aux: 0,
            cycles: 0,
            cr4: Cr4::new(),
            in_vmx: false,
            feature_control: None,
        });
        f(regs)
    }

    /// Reacts to a PM1a control write that sets `SLP_EN`.
    fn observe_control_write(&self, reg: GenericAddress, value: u16) {
        let cnt = self.sleep.pm1a_cnt;
        if reg.is_memory_mapped() != cnt.is_memory_mapped()
            || reg.address != cnt.address
            || value & (1 << BIT_SLP_EN) == 0
        {
            return;
        }
        for regs in locked(&self.cores).values_mut() {
            regs.cycles = 0;
            regs.in_vmx = false;
        }
        let evt = self.sleep.pm1a_evt;
        let wak = 1u16 << BIT_WAK_STS;
        if evt.is_memory_mapped() {
            *locked(&self.mmio).entry(evt.address).or_default() |= wak;
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let port = evt.address as u16;
            *locked(&self.ports).entry(port).or_default() |= wak;
        }
        self.record(SimEvent::Slept);
    }

    fn startup_targets(&self, dest: IpiDestination) -> Vec<u32> {
        let me = self.current_apic_id();
        let unresponsive = locked(&self.unresponsive);
        let candidates: Vec<u32> = match dest {
            IpiDestination::AllExcludingSelf => {
                self.lapic_ids.iter().copied().filter(|&id| id != me).collect()
            }
            IpiDestination::Apic(id) => std::vec![id],
        };
        candidates
            .into_iter()
            .filter(|id| !unresponsive.contains(id))
            .collect()
    }
}

impl RegisterIo for SimHardware {
    fn mmio_read16(&self, paddr: u64) -> u16 {
        locked(&self.mmio).get(&paddr).copied().unwrap_or(0)
    }

    fn mmio_write16(&self, paddr: u64, value: u16) {
        locked(&self.mmio).insert(paddr, value);
        self.record(SimEvent::MmioWrite16 { paddr, value });
        self.observe_control_write(GenericAddress::system_memory(paddr, 16), value);
    }

    fn pio_read16(&self, port: u16) -> u16 {
        locked(&self.ports).get(&port).copied().unwrap_or(0)
    }

    fn pio_write16(&self, port: u16, value: u16) {
        locked(&self.ports).insert(port, value);
        self.record(SimEvent::PortWrite16 { port, value });
        self.observe_control_write(GenericAddress::system_io(port, 16), value);
    }

    fn pio_write8(&self, port: u16, value: u8) {
        self.record(SimEvent::PortWrite8 { port, value });
    }
}

impl Hardware for SimHardware {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        let mut result = locked(&self.cpuid)
            .get(&(leaf, subleaf))
            .copied()
            .unwrap_or_default();
        if leaf == LEAF_FEATURES && self.read_cr4().osxsave() {
            result.ecx |= Feature::OSXSAVE.mask();
        }
        result
    }

    fn read_msr(&self, msr: Msr) -> u64 {
        match msr {
            Msr::IA32_TSC_AUX => self.with_core(|c| c.tsc_aux),
            Msr::IA32_TIME_STAMP_COUNTER => self.read_cycles(),
            Msr::IA32_X2APIC_APICID => u64::from(self.current_apic_id()),
            Msr::IA32_FEATURE_CONTROL => self
                .with_core(|c| c.feature_control)
                .unwrap_or_else(|| self.msr(msr)),
            other => self.msr(other),
        }
    }

    fn write_msr(&self, msr: Msr, value: u64) {
        match msr {
            Msr::IA32_TSC_AUX => self.with_core(|c| c.tsc_aux = value),
            Msr::IA32_TIME_STAMP_COUNTER => self.write_cycles(value),
            Msr::IA32_FEATURE_CONTROL => {
                if Ia32FeatureControl::from_bits(self.read_msr(msr)).lock() {
                    self.record(SimEvent::GeneralProtection(self.current_apic_id()));
                } else {
                    self.with_core(|c| c.feature_control = Some(value));
                }
            }
            other => self.set_msr(other, value),
        }
    }

    fn read_cr4(&self) -> Cr4 {
        self.with_core(|c| c.cr4)
    }

    fn write_cr4(&self, cr4: Cr4) {
        self.with_core(|c| c.cr4 = cr4);
    }

    fn current_apic_id(&self) -> u32 {
        CURRENT_APIC
            .with(Cell::get)
            .or_else(|| self.lapic_ids.first().copied())
            .unwrap_or(0)
    }

    fn send_startup_ipi(&self, dest: IpiDestination, start_paddr: u64) {
        self.record(SimEvent::StartupIpi { dest, start_paddr });
        let Some(hook) = locked(&self.startup).clone() else {
            return;
        };
        for apic_id in self.startup_targets(dest) {
            let hook = Arc::clone(&hook);
            std::thread::spawn(move || {
                bind_current(apic_id);
                hook();
            });
        }
    }

    fn send_notification(&self, apic_id: u32) {
        self.record(SimEvent::Notify(apic_id));
    }

    fn udelay(&self, us: u32) {
        self.clock_us.fetch_add(u64::from(us), Ordering::AcqRel);
        self.with_core(|c| c.cycles += u64::from(us) * CYCLES_PER_US);
        std::thread::sleep(Duration::from_micros(1));
    }

    fn read_cycles(&self) -> u64 {
        self.with_core(|c| c.cycles)
    }

    fn write_cycles(&self, value: u64) {
        let apic_id = self.current_apic_id();
        self.with_core(|c| c.cycles = value);
        self.record(SimEvent::CyclesWritten { apic_id, value });
    }

    fn vmx_on(&self) {
        let apic_id = self.current_apic_id();
        let control = Ia32FeatureControl::from_bits(self.read_msr(Msr::IA32_FEATURE_CONTROL));
        if !control.lock() || !control.vmx_outside_smx() {
            self.record(SimEvent::GeneralProtection(apic_id));
            return;
        }
        self.with_core(|c| {
            c.cr4 = c.cr4.with_vmxe(true);
            c.in_vmx = true;
        });
        self.record(SimEvent::VmxOn(apic_id));
    }

    fn vmx_off(&self) {
        let apic_id = self.current_apic_id();
        self.with_core(|c| {
            c.cr4 = c.cr4.with_vmxe(false);
            c.in_vmx = false;
        });
        self.record(SimEvent::VmxOff(apic_id));
    }

    fn flush_caches(&self) {
        self.record(SimEvent::CacheFlush(self.current_apic_id()));
    }

    fn disable_irq(&self) {
        self.record(SimEvent::IrqDisabled(self.current_apic_id()));
    }

    fn enable_irq(&self) {
        self.record(SimEvent::IrqEnabled(self.current_apic_id()));
    }

    fn cpu_idle(&self) {
        std::thread::sleep(Duration::from_micros(20));
    }

    fn halt_forever(&self) -> ! {
        self.record(SimEvent::Halted(self.current_apic_id()));
        loop {
            std::thread::park();
        }
    }

    fn write_phys_u32(&self, paddr: u64, value: u32) {
        self.set_phys(paddr, u64::from(value));
    }

    fn read_phys_u64(&self, paddr: u64) -> u64 {
        self.phys(paddr)
    }

    fn write_phys_u64(&self, paddr: u64, value: u64) {
        self.set_phys(paddr, value);
    }
}

impl SubsystemControl for SimHardware {
    fn suspend(&self, subsystem: Subsystem) {
        self.record(SimEvent::Suspend(subsystem));
    }

    fn resume(&self, subsystem: Subsystem) {
        self.record(SimEvent::Resume(subsystem));
    }
}
