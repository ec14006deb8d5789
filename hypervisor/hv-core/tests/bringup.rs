use hv_board::BoardConfig;
use hv_core::hw::sim::{SimEvent, SimHardware, bind_current};
use hv_core::smp::{SYNC_GO, SYNC_HOLD, core_dead, request_offline, smp_call_function};
use hv_core::{
    BootError, ClusterState, CoreId, Deficiency, Hardware, LifecycleState, SmpCall, SmpError,
    TransitionError, boot_follower, boot_leader, follower_main, stop_all_followers,
};
use hv_cpuid::Feature;
use hv_registers::{Ia32FeatureControl, Msr};
use std::time::{Duration, Instant};

const IDS: [u32; 4] = [0, 2, 4, 6];

fn platform(ids: &[u32], board: BoardConfig) -> (&'static SimHardware, &'static ClusterState) {
    let hw: &'static SimHardware = Box::leak(Box::new(SimHardware::capable(ids)));
    let cluster: &'static ClusterState =
        Box::leak(Box::new(ClusterState::new(board, ids).unwrap()));
    hw.on_startup_ipi(move || follower_main(cluster, hw));
    (hw, cluster)
}

fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn all_running(cluster: &ClusterState) -> bool {
    cluster
        .cores()
        .all(|c| cluster.state(c) == Some(LifecycleState::Running))
}

#[test]
fn all_cores_come_up_then_go_down() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());

    assert_eq!(boot_leader(cluster, hw).unwrap(), CoreId::new(0));
    assert_eq!(cluster.up_count(), 4);
    assert_eq!(cluster.active_mask(), 0b1111);
    assert_eq!(cluster.sync().load(), SYNC_GO);
    assert!(cluster.caps().is_some());
    assert_eq!(cluster.power_states().map(|p| p.px.len()), Some(16));
    assert!(hw.events().contains(&SimEvent::StartupIpi {
        dest: hv_core::IpiDestination::AllExcludingSelf,
        start_paddr: cluster.board().trampoline_start16_paddr,
    }));

    eventually("followers running", || all_running(cluster));
    for id in IDS {
        assert!(hw.in_vmx_operation(id), "apic {id}");
    }

    stop_all_followers(cluster, hw).unwrap();
    assert_eq!(cluster.up_count(), 1);
    assert_eq!(cluster.active_mask(), 0b1);
    assert_eq!(cluster.state(CoreId::new(0)), Some(LifecycleState::Running));

    eventually("followers halted", || {
        let events = hw.events();
        IDS[1..].iter().all(|id| events.contains(&SimEvent::Halted(*id)))
    });
    let events = hw.events();
    for (i, &id) in IDS.iter().enumerate().skip(1) {
        let core = CoreId::new(u16::try_from(i).unwrap());
        assert_eq!(cluster.state(core), Some(LifecycleState::Dead));
        assert!(cluster.record(core).unwrap().is_parked());
        assert!(!hw.in_vmx_operation(id));
        let off = events.iter().position(|e| *e == SimEvent::VmxOff(id)).unwrap();
        let flush = events.iter().position(|e| *e == SimEvent::CacheFlush(id)).unwrap();
        let halt = events.iter().position(|e| *e == SimEvent::Halted(id)).unwrap();
        assert!(off < flush && flush < halt);
    }
}

#[test]
fn followers_can_be_restarted() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    boot_leader(cluster, hw).unwrap();
    eventually("followers running", || all_running(cluster));
    stop_all_followers(cluster, hw).unwrap();

    hv_core::start_all_followers(cluster, hw).unwrap();
    assert_eq!(cluster.up_count(), 4);
    eventually("followers running again", || all_running(cluster));
    assert_eq!(cluster.cycle(), 2);

    stop_all_followers(cluster, hw).unwrap();
}

#[test]
fn unresponsive_core_times_out_on_the_virtual_clock() {
    let board = BoardConfig {
        poll_interval_us: 250,
        ..BoardConfig::host()
    };
    let (hw, cluster) = platform(&[0, 1, 2, 3], board);
    hw.set_unresponsive(3);

    let err = boot_leader(cluster, hw).unwrap_err();
    assert!(
        matches!(
            err,
            BootError::Smp(SmpError::StartupTimeout {
                expected: 4,
                observed: 3,
                waited_us: 1_000_000,
            })
        ),
        "{err:?}"
    );
    assert!(hw.clock_us() >= 1_000_000);
    assert_eq!(cluster.sync().load(), SYNC_HOLD);
    assert_eq!(cluster.state(CoreId::new(3)), Some(LifecycleState::Init));

    // Let the two stranded followers finish so they stop spinning.
    cluster.sync().release(SYNC_GO);
    eventually("stranded followers running", || {
        (1..3).all(|i| cluster.state(CoreId::new(i)) == Some(LifecycleState::Running))
    });
}

#[test]
fn zero_budget_fails_immediately() {
    let board = BoardConfig::host().with_cpu_up_timeout_secs(0);
    let (hw, cluster) = platform(&[0, 1], board);
    hw.set_unresponsive(1);

    let err = boot_leader(cluster, hw).unwrap_err();
    assert!(
        matches!(
            err,
            BootError::Smp(SmpError::StartupTimeout {
                expected: 2,
                observed: 1,
                waited_us: 0
            })
        ),
        "{err:?}"
    );
    assert_eq!(hw.clock_us(), 0);
}

#[test]
fn single_core_machine_needs_no_followers() {
    let (hw, cluster) = platform(&[0], BoardConfig::host());
    boot_leader(cluster, hw).unwrap();
    assert_eq!(cluster.up_count(), 1);
    stop_all_followers(cluster, hw).unwrap();
    assert_eq!(cluster.up_count(), 1);
}

#[test]
fn unsupported_platform_starts_nothing() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    hw.clear_feature(Feature::SMEP);

    match boot_leader(cluster, hw) {
        Err(BootError::Unsupported(list)) => assert!(list.contains(&Deficiency::Smep)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(cluster.up_count(), 0);
    assert!(
        !hw.events()
            .iter()
            .any(|e| matches!(e, SimEvent::StartupIpi { .. }))
    );
}

#[test]
fn leader_must_run_on_the_boot_core() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    let result = std::thread::spawn(move || {
        bind_current(4);
        boot_leader(cluster, hw).map(|_| ())
    })
    .join()
    .unwrap();
    assert!(matches!(result, Err(BootError::NotBootCore(4))), "{result:?}");
}

#[test]
fn unknown_follower_is_rejected() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    let result = std::thread::spawn(move || {
        bind_current(0x99);
        boot_follower(cluster, hw).map(|_| ())
    })
    .join()
    .unwrap();
    assert!(matches!(result, Err(BootError::UnknownHardwareId(0x99))), "{result:?}");
    assert_eq!(cluster.up_count(), 0);
}

#[test]
fn boot_failures_halt_the_core() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    hw.clear_feature(Feature::VMX);
    std::thread::spawn(move || {
        hv_core::leader_main(cluster, hw);
    });
    std::thread::spawn(move || {
        bind_current(0x99);
        follower_main(cluster, hw);
    });

    assert!(hw.wait_for(Duration::from_secs(10), |e| {
        e.contains(&SimEvent::Halted(0)) && e.contains(&SimEvent::Halted(0x99))
    }));
    let events = hw.events();
    assert!(events.contains(&SimEvent::IrqDisabled(0)));
    assert!(!events.iter().any(|e| matches!(e, SimEvent::StartupIpi { .. })));
}

fn halted_followers(hw: &SimHardware) -> bool {
    let events = hw.events();
    IDS[1..].iter().all(|id| events.contains(&SimEvent::Halted(*id)))
}

#[test]
fn follower_failing_its_own_checks_is_never_counted() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    hw.clear_feature(Feature::SMAP);
    let result = std::thread::spawn(move || {
        bind_current(2);
        boot_follower(cluster, hw).map(|_| ())
    })
    .join()
    .unwrap();

    match result {
        Err(BootError::Unsupported(list)) => assert!(list.contains(&Deficiency::Smap)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(cluster.up_count(), 0);
    assert_eq!(cluster.active_mask(), 0);
    assert_eq!(cluster.state(CoreId::new(1)), Some(LifecycleState::Init));
}

#[test]
fn failing_followers_make_bring_up_time_out() {
    let board = BoardConfig {
        poll_interval_us: 250,
        ..BoardConfig::host()
    };
    let (hw, cluster) = platform(&IDS, board);
    // The leader has already passed detection when the followers start.
    hw.on_startup_ipi(move || {
        hw.clear_feature(Feature::SMAP);
        follower_main(cluster, hw);
    });

    let err = boot_leader(cluster, hw).unwrap_err();
    assert!(
        matches!(
            err,
            BootError::Smp(SmpError::StartupTimeout {
                expected: 4,
                observed: 1,
                waited_us: 1_000_000,
            })
        ),
        "{err:?}"
    );
    assert_eq!(cluster.sync().load(), SYNC_HOLD);
    assert!(hw.wait_for(Duration::from_secs(10), |e| {
        IDS[1..].iter().all(|id| e.contains(&SimEvent::Halted(*id)))
    }));
}

#[test]
fn unlocked_feature_control_is_locked_before_vmxon() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    hw.set_msr(Msr::IA32_FEATURE_CONTROL, 0);

    boot_leader(cluster, hw).unwrap();
    eventually("followers running", || all_running(cluster));

    let control = Ia32FeatureControl::from_bits(hw.read_msr(Msr::IA32_FEATURE_CONTROL));
    assert!(control.lock() && control.vmx_outside_smx());
    for id in IDS {
        assert!(hw.in_vmx_operation(id), "apic {id}");
    }
    assert!(
        !hw.events()
            .iter()
            .any(|e| matches!(e, SimEvent::GeneralProtection(_)))
    );
    stop_all_followers(cluster, hw).unwrap();
}

#[test]
fn vmxon_faults_when_firmware_locked_vmx_off() {
    let (hw, _cluster) = platform(&[0], BoardConfig::host());
    hw.set_msr(
        Msr::IA32_FEATURE_CONTROL,
        Ia32FeatureControl::new().with_lock(true).into_bits(),
    );
    hv_core::hw::enter_vmx(hw);
    assert!(!hw.in_vmx_operation(0));
    assert_eq!(hw.events(), [SimEvent::GeneralProtection(0)]);
}

#[test]
fn follower_ignoring_offline_request_times_out_teardown() {
    let board = BoardConfig {
        poll_interval_us: 250,
        ..BoardConfig::host()
    };
    let (hw, cluster) = platform(&IDS, board);
    hw.on_startup_ipi(move || {
        if hw.current_apic_id() == 6 {
            if boot_follower(cluster, hw).is_ok() {
                loop {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        } else {
            follower_main(cluster, hw);
        }
    });

    boot_leader(cluster, hw).unwrap();
    eventually("followers running", || all_running(cluster));

    assert_eq!(
        stop_all_followers(cluster, hw),
        Err(SmpError::OfflineTimeout {
            remaining: 2,
            waited_us: 1_000_000
        })
    );
    assert_eq!(cluster.state(CoreId::new(3)), Some(LifecycleState::Running));
    assert_eq!(cluster.active_mask(), 0b1001);
}

#[test]
fn offlining_a_dead_core_again_changes_nothing() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    boot_leader(cluster, hw).unwrap();
    eventually("followers running", || all_running(cluster));
    stop_all_followers(cluster, hw).unwrap();
    eventually("followers halted", || halted_followers(hw));
    hw.clear_events();

    let core = CoreId::new(1);
    assert_eq!(
        request_offline(cluster, hw, core),
        Err(TransitionError::AlreadyDead { core })
    );
    core_dead(cluster, hw, core);

    assert_eq!(cluster.state(core), Some(LifecycleState::Dead));
    assert_eq!((cluster.up_count(), cluster.active_mask()), (1, 0b1));
    assert!(hw.events().is_empty(), "{:?}", hw.events());
}

#[test]
fn orchestration_from_an_unbound_core_is_refused() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    let results = std::thread::spawn(move || {
        bind_current(0x99);
        (
            stop_all_followers(cluster, hw),
            smp_call_function(cluster, hw, 0b1, SmpCall::SaveCycles),
        )
    })
    .join()
    .unwrap();

    assert_eq!(
        results,
        (Err(SmpError::UnboundCore), Err(SmpError::UnboundCore))
    );
    assert!(hw.events().is_empty());
}

#[test]
fn cross_core_calls_skip_inactive_cores() {
    let (hw, cluster) = platform(&IDS, BoardConfig::host());
    boot_leader(cluster, hw).unwrap();
    eventually("followers running", || all_running(cluster));
    stop_all_followers(cluster, hw).unwrap();
    eventually("followers halted", || halted_followers(hw));
    hw.clear_events();

    smp_call_function(cluster, hw, 0b1111, SmpCall::SaveCycles).unwrap();

    let saved = |i: u16| cluster.record(CoreId::new(i)).unwrap().saved_cycles();
    assert_eq!(saved(0), hw.cycles_of(0));
    for i in 1..4 {
        assert_eq!(saved(i), 0, "core {i}");
    }
    assert!(
        !hw.events()
            .iter()
            .any(|e| matches!(e, SimEvent::Notify(_)))
    );
}
