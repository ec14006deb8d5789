//! # Leader and follower entry points
//!
//! The leader detects and publishes the platform capabilities, brings
//! itself online, starts the followers and enters VMX operation. A follower
//! finds its core id from its local-APIC id, comes online, checks its own
//! feature bits, then waits in the barrier for the leader's go.

use crate::caps::{self, Deficiencies};
use crate::fatal;
use crate::hw::{self, Hardware};
use crate::pm;
use crate::registry::{ClusterState, CoreId, LifecycleState, TransitionError};
use crate::smp::{self, SYNC_GO, SmpError};
use hv_console::ConsoleLogger;
use hv_sync::AdaptiveWait;
use log::LevelFilter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("no cores enumerated")]
    NoCores,
    #[error("local APIC id {0:#x} enumerated twice")]
    DuplicateHardwareId(u32),
    #[error("local APIC id {0:#x} has no core id")]
    UnknownHardwareId(u32),
    #[error("local APIC id {0:#x} is not the boot core")]
    NotBootCore(u32),
    #[error("platform unsupported: {0}")]
    Unsupported(#[from] Deficiencies),
    #[error(transparent)]
    Smp(#[from] SmpError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Brings the platform up from the boot core. Returns with every core
/// `Running`.
///
/// # Errors
/// [`BootError::NotBootCore`] on the wrong core, [`BootError::Unsupported`]
/// with every failed requirement, or a bring-up failure.
pub fn boot_leader(cluster: &ClusterState, hw: &impl Hardware) -> Result<CoreId, BootError> {
    let me = cluster.boot_core();
    let apic_id = hw.current_apic_id();
    if cluster.record(me)?.hw_id() != apic_id {
        return Err(BootError::NotBootCore(apic_id));
    }

    let limit = cluster.board().pcpu_limit();
    let detected = caps::detect_platform(hw, cluster.detected_count(), limit)?;
    let caps = cluster.publish_caps(detected);

    let power = cluster.publish_power_states(pm::load_cpu_state_info(
        &caps.features.model_name,
        &cluster.board().cpu_state_table,
    ));
    log::debug!("{} P-states, {} C-states", power.px.len(), power.cx.len());

    cluster.bring_online(hw, me)?;
    smp::start_all_followers(cluster, hw)?;

    hw::enter_vmx(hw);
    cluster.transition(me, LifecycleState::Running)?;
    log::info!("{me} running, {} cores up", cluster.up_count());
    Ok(me)
}

/// Leader entry: installs the console logger, boots, then idles. Any
/// failure halts the core.
pub fn leader_main(cluster: &ClusterState, hw: &impl Hardware) -> ! {
    if ConsoleLogger::new(LevelFilter::Info).init().is_err() {
        log::warn!("logger already installed");
    }
    if let Err(err) = boot_leader(cluster, hw) {
        fatal::halt(hw, err);
    }
    loop {
        hw.cpu_idle();
    }
}

/// Brings the calling follower up to `Running`. The feature checks run
/// before the core enters `Initializing`.
///
/// # Errors
/// [`BootError::UnknownHardwareId`] if the local-APIC id was not enumerated,
/// [`BootError::Unsupported`] if this core fails the feature checks.
pub fn boot_follower(cluster: &ClusterState, hw: &impl Hardware) -> Result<CoreId, BootError> {
    let apic_id = hw.current_apic_id();
    let me = cluster
        .core_id_of(apic_id)
        .ok_or(BootError::UnknownHardwareId(apic_id))?;

    caps::verify_follower(hw)?;
    cluster.bring_online(hw, me)?;

    let wait = cluster.caps().map_or(AdaptiveWait::Pause, |c| c.wait);
    cluster.sync().wait_until(SYNC_GO, &wait);

    hw::enter_vmx(hw);
    cluster.transition(me, LifecycleState::Running)?;
    Ok(me)
}

/// Follower entry, reached from the startup trampoline.
pub fn follower_main(cluster: &ClusterState, hw: &impl Hardware) -> ! {
    match boot_follower(cluster, hw) {
        Ok(me) => smp::follower_idle_loop(cluster, hw, me),
        Err(err) => fatal::halt(hw, err),
    }
}
