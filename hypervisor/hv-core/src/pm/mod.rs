//! # Power transitions
//!
//! S3 suspend/resume of the whole host, S5 shutdown, host reset and the
//! processor power-state tables.
//!
//! S3 runs on the leader with every follower taken offline first:
//!
//! ```text
//!  wake vector → SaveCycles (all) → stop followers → patch trampoline
//!  → irq off, vmx off → suspend console, irq routing, IOMMU, LAPIC
//!  → PM1 sleep ... wake
//!  → resume LAPIC, IOMMU, irq routing → vmx on, irq on → restore trampoline
//!  → start followers → RestoreCycles (all) → resume console
//! ```

mod tables;

pub use tables::BUILTIN_CPU_STATE_TABLES;

use crate::hw::{self, Hardware};
use crate::registry::ClusterState;
use crate::smp::{self, SmpCall, SmpError};
use hv_acpi::{CF9_PORT, CpuStateInfo, CpuStateTable, ResetMethod, ResetRegister, enter_sleep_state};
use hv_cpuid::BrandString;

/// Platform subsystems quiesced around S3.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Subsystem {
    Console,
    InterruptRouting,
    Iommu,
    LocalApic,
}

/// Suspend order; resume walks it backwards.
pub const SUSPEND_ORDER: [Subsystem; 4] = [
    Subsystem::Console,
    Subsystem::InterruptRouting,
    Subsystem::Iommu,
    Subsystem::LocalApic,
];

pub trait SubsystemControl {
    fn suspend(&self, subsystem: Subsystem);
    fn resume(&self, subsystem: Subsystem);
}

/// The host's subsystems. Only the console is owned by this workspace; the
/// others are driven by their own modules and only traced here.
#[derive(Debug, Default, Copy, Clone)]
pub struct HostSubsystems;

impl SubsystemControl for HostSubsystems {
    fn suspend(&self, subsystem: Subsystem) {
        match subsystem {
            Subsystem::Console => hv_console::suspend(),
            other => log::debug!("suspend {other:?}"),
        }
    }

    fn resume(&self, subsystem: Subsystem) {
        match subsystem {
            Subsystem::Console => hv_console::resume(),
            other => log::debug!("resume {other:?}"),
        }
    }
}

/// Suspends the host to S3 and returns after wake-up, with every follower
/// running again.
///
/// `resume_entry` is where followers land while the trampoline is patched.
///
/// # Errors
/// Any follower stop/start failure. Nothing is rolled back.
pub fn host_enter_s3(
    cluster: &ClusterState,
    hw: &impl Hardware,
    subsystems: &impl SubsystemControl,
    resume_entry: u64,
    pm1a_cnt_val: u16,
    pm1b_cnt_val: u16,
) -> Result<(), SmpError> {
    let sleep = &cluster.board().sleep;

    #[allow(clippy::cast_possible_truncation)]
    hw.write_phys_u32(
        sleep.wake_vector_32,
        cluster.board().trampoline_start16_paddr as u32,
    );

    smp::smp_call_function(cluster, hw, cluster.active_mask(), SmpCall::SaveCycles)?;
    smp::stop_all_followers(cluster, hw)?;

    let saved_entry = cluster
        .trampoline()
        .with_lock(|t| t.patch_main_entry(hw, resume_entry));

    hw.disable_irq();
    hw.vmx_off();

    for subsystem in SUSPEND_ORDER {
        subsystems.suspend(subsystem);
    }

    enter_sleep_state(hw, sleep, pm1a_cnt_val, pm1b_cnt_val);

    // The console comes back last, once the cycle counters are restored.
    for subsystem in SUSPEND_ORDER.into_iter().rev().filter(|&s| s != Subsystem::Console) {
        subsystems.resume(subsystem);
    }

    hw::enter_vmx(hw);
    hw.enable_irq();

    cluster
        .trampoline()
        .with_lock(|t| t.patch_main_entry(hw, saved_entry));

    smp::start_all_followers(cluster, hw)?;
    smp::smp_call_function(cluster, hw, cluster.active_mask(), SmpCall::RestoreCycles)?;

    subsystems.resume(Subsystem::Console);
    log::info!("resumed from S3");
    Ok(())
}

/// Remembers the PM1 control values [`shutdown_system`] writes.
pub fn save_s5_reg_val(cluster: &ClusterState, pm1a_cnt_val: u16, pm1b_cnt_val: u16) {
    cluster.set_s5_control(pm1a_cnt_val, pm1b_cnt_val);
}

/// Enters S5 with the saved control values.
pub fn shutdown_system(cluster: &ClusterState, hw: &impl Hardware) -> ! {
    let (pm1a, pm1b) = cluster.s5_control();
    log::info!("entering S5");
    enter_sleep_state(hw, &cluster.board().sleep, pm1a, pm1b);
    hw.halt_forever()
}

/// Resets the host through the ACPI reset register if it is usable, else
/// through port 0xCF9.
pub fn reset_host(hw: &impl Hardware, reset: &ResetRegister) -> ! {
    match reset.method() {
        ResetMethod::AcpiPort { port, value } => hw.pio_write8(port, value),
        ResetMethod::Cf9 => {
            // RST_CPU (bit 2) must be 0 when the reset command is issued.
            hw.pio_write8(CF9_PORT, 0x2);
            hw.udelay(50);
            hw.pio_write8(CF9_PORT, 0xE);
        }
    }
    log::error!("host reset did not take effect");
    hw.halt_forever()
}

/// Px/Cx tables for the processor named `model_name`: a built-in table if
/// the name matches exactly, else the board table if it matches, else none.
#[must_use]
pub fn load_cpu_state_info(model_name: &BrandString, board_table: &CpuStateTable) -> CpuStateInfo {
    let name = model_name.as_str();
    BUILTIN_CPU_STATE_TABLES
        .iter()
        .chain(core::iter::once(board_table))
        .find(|t| t.model_name == name)
        .map_or(CpuStateInfo::EMPTY, |t| t.info.clamped())
}
