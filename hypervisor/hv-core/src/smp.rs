//! # Bring-up / teardown orchestrator
//!
//! Driven by the leader only. Start broadcasts the startup IPI and waits
//! for the up-count to reach the core count; stop asks every other core to
//! take itself offline and waits for the up-count to fall to one. Both
//! waits are bounded by the board's core-up timeout and poll in
//! `poll_interval_us` steps.
//!
//! Followers spend their life in [`follower_idle_loop`], which services
//! the cross-core call mailbox and offline requests.

use crate::hw::{Hardware, IpiDestination};
use crate::registry::{ClusterState, CoreId, LifecycleState, TransitionError};
use core::sync::atomic::Ordering;
use thiserror::Error;

/// Followers hold in the barrier while the flag has this value.
pub const SYNC_HOLD: u64 = 1;
/// Written once every follower is up.
pub const SYNC_GO: u64 = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum SmpError {
    #[error("only {observed} of {expected} cores came up within {waited_us} us")]
    StartupTimeout {
        expected: u32,
        observed: u32,
        waited_us: u64,
    },
    #[error("{remaining} cores still up after {waited_us} us")]
    OfflineTimeout { remaining: u32, waited_us: u64 },
    #[error("calling core is not bound to a core id")]
    UnboundCore,
}

/// Work a core can be asked to run on behalf of another.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SmpCall {
    /// Save the cycle counter into the core's record.
    SaveCycles = 1,
    /// Write the saved value back into the cycle counter.
    RestoreCycles = 2,
}

impl SmpCall {
    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::SaveCycles),
            2 => Some(Self::RestoreCycles),
            _ => None,
        }
    }
}

/// Polls the up-count until it equals `target` or the budget is spent.
/// Returns the time waited, or the last observed count with the time waited.
fn wait_for_up_count(
    cluster: &ClusterState,
    hw: &impl Hardware,
    target: u32,
) -> Result<u64, (u32, u64)> {
    let budget = cluster.board().cpu_up_timeout_us();
    let step = cluster.board().poll_interval_us;
    let mut waited = 0u64;
    loop {
        let observed = cluster.up_count();
        if observed == target {
            return Ok(waited);
        }
        if waited >= budget {
            return Err((observed, waited));
        }
        hw.udelay(step);
        waited += u64::from(step);
    }
}

/// Starts every follower and releases them once all are `Initializing`.
///
/// The leader must already be `Initializing` or `Running`.
///
/// # Errors
/// [`SmpError::StartupTimeout`] if the cores did not all come up in time.
/// The barrier stays closed then; partial bring-up is not recoverable.
#[allow(clippy::cast_possible_truncation)]
pub fn start_all_followers(cluster: &ClusterState, hw: &impl Hardware) -> Result<(), SmpError> {
    let expected = cluster.core_count() as u32;
    cluster.sync().release(SYNC_HOLD);
    let cycle = cluster.begin_cycle();

    {
        let trampoline = cluster.trampoline().lock();
        hw.send_startup_ipi(IpiDestination::AllExcludingSelf, trampoline.start16_paddr);
    }

    match wait_for_up_count(cluster, hw, expected) {
        Ok(waited_us) => {
            cluster.sync().release(SYNC_GO);
            log::info!("{expected} cores up after {waited_us} us (cycle {cycle})");
            Ok(())
        }
        Err((observed, waited_us)) => Err(SmpError::StartupTimeout {
            expected,
            observed,
            waited_us,
        }),
    }
}

/// Asks `core` to go offline at its next idle-loop iteration.
///
/// # Errors
/// [`TransitionError::InvalidCoreId`] for an unknown core,
/// [`TransitionError::AlreadyDead`] (logged, nothing sent) for a core that
/// is already offline.
pub fn request_offline(
    cluster: &ClusterState,
    hw: &impl Hardware,
    core: CoreId,
) -> Result<(), TransitionError> {
    let record = cluster.record(core)?;
    if record.state() == LifecycleState::Dead {
        log::warn!("{core} already dead, offline request dropped");
        return Err(TransitionError::AlreadyDead { core });
    }
    record.offline_request.store(true, Ordering::Release);
    hw.send_notification(record.hw_id());
    Ok(())
}

/// Takes every core but the caller offline.
///
/// # Errors
/// [`SmpError::UnboundCore`] if the caller has no core id,
/// [`SmpError::OfflineTimeout`] if cores are still up when the budget runs out.
pub fn stop_all_followers(cluster: &ClusterState, hw: &impl Hardware) -> Result<(), SmpError> {
    let me = cluster.current_core(hw).ok_or(SmpError::UnboundCore)?;
    for core in cluster.active_cores().filter(|&c| c != me) {
        if let Err(err) = request_offline(cluster, hw, core) {
            log::warn!("not offlining {core}: {err}");
        }
    }

    match wait_for_up_count(cluster, hw, 1) {
        Ok(waited_us) => {
            log::info!("followers offline after {waited_us} us");
            Ok(())
        }
        Err((remaining, waited_us)) => Err(SmpError::OfflineTimeout { remaining, waited_us }),
    }
}

/// Takes the calling core offline: clears its active bit, leaves VMX
/// operation, flushes caches, goes `Dead` and halts.
///
/// Returns only if the core was already offline; that is logged.
pub fn core_dead(cluster: &ClusterState, hw: &impl Hardware, core: CoreId) {
    if let Err(err) = cluster.begin_offline(core) {
        log::warn!("offline request ignored: {err}");
        return;
    }

    hw.vmx_off();
    hw.flush_caches();
    if let Err(err) = cluster.finish_offline(core) {
        log::warn!("{err}");
    }

    if let Ok(record) = cluster.record(core) {
        record.parked.store(true, Ordering::Release);
    }
    log::debug!("{core} parked");
    hw.halt_forever();
}

fn run_call(cluster: &ClusterState, hw: &impl Hardware, core: CoreId, call: SmpCall) {
    let Ok(record) = cluster.record(core) else {
        return;
    };
    match call {
        SmpCall::SaveCycles => record.tsc_suspend.store(hw.read_cycles(), Ordering::Release),
        SmpCall::RestoreCycles => hw.write_cycles(record.tsc_suspend.load(Ordering::Acquire)),
    }
}

/// Runs `call` on every active core in `mask`, the caller included, and
/// waits until all of them are done. There is no timeout.
///
/// # Errors
/// [`SmpError::UnboundCore`] if the caller has no core id.
pub fn smp_call_function(
    cluster: &ClusterState,
    hw: &impl Hardware,
    mask: u64,
    call: SmpCall,
) -> Result<(), SmpError> {
    let me = cluster.current_core(hw).ok_or(SmpError::UnboundCore)?;
    let active = cluster.active_mask();
    if mask & !active != 0 {
        log::warn!("{call:?}: skipping inactive cores {:#x}", mask & !active);
    }
    let targets = mask & active & !me.bit();

    for core in cluster.cores().filter(|c| targets & c.bit() != 0) {
        if let Ok(record) = cluster.record(core) {
            record.mailbox.store(call as u8, Ordering::Release);
            hw.send_notification(record.hw_id());
        }
    }

    if mask & me.bit() != 0 {
        run_call(cluster, hw, me, call);
    }

    for core in cluster.cores().filter(|c| targets & c.bit() != 0) {
        if let Ok(record) = cluster.record(core) {
            while record.mailbox.load(Ordering::Acquire) != 0 {
                hw.pause();
            }
        }
    }
    Ok(())
}

/// One pass over the calling follower's pending work.
fn service_mailbox(cluster: &ClusterState, hw: &impl Hardware, core: CoreId) {
    let Ok(record) = cluster.record(core) else {
        return;
    };
    let raw = record.mailbox.load(Ordering::Acquire);
    if raw == 0 {
        return;
    }
    match SmpCall::from_raw(raw) {
        Some(call) => run_call(cluster, hw, core, call),
        None => log::warn!("{core}: unknown call {raw}"),
    }
    record.mailbox.store(0, Ordering::Release);
}

/// Where a follower waits after bring-up. Leaves only through [`core_dead`].
pub fn follower_idle_loop(cluster: &ClusterState, hw: &impl Hardware, core: CoreId) -> ! {
    loop {
        service_mailbox(cluster, hw, core);
        if let Ok(record) = cluster.record(core)
            && record.offline_request.swap(false, Ordering::AcqRel)
        {
            core_dead(cluster, hw, core);
        }
        hw.cpu_idle();
    }
}
