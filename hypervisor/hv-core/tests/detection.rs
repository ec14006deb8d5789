use hv_core::caps::{Deficiency, detect_platform};
use hv_core::hw::sim::SimHardware;
use hv_cpuid::{CpuidResult, Feature, LEAF_ADDRESS_SIZE, LEAF_VENDOR};
use hv_registers::{Ia32ArchCapabilities, Ia32FeatureControl, Msr, VmxEptVpidCap, ctls};

fn only(hw: &SimHardware) -> Vec<Deficiency> {
    detect_platform(hw, 1, 64).unwrap_err().iter().collect()
}

#[test]
fn each_missing_feature_is_its_own_deficiency() {
    let cases = [
        (Feature::X2APIC, Deficiency::X2Apic),
        (Feature::LM, Deficiency::LongMode),
        (Feature::TSC_DEADLINE, Deficiency::TscDeadline),
        (Feature::NX, Deficiency::NoExecute),
        (Feature::SMEP, Deficiency::Smep),
        (Feature::SMAP, Deficiency::Smap),
        (Feature::MTRR, Deficiency::Mtrr),
        (Feature::PAGE1GB, Deficiency::Page1Gb),
    ];
    for (feature, expected) in cases {
        let hw = SimHardware::capable(&[0]);
        hw.clear_feature(feature);
        assert_eq!(only(&hw), [expected], "{feature:?}");
    }
}

#[test]
fn every_failure_is_reported_in_checklist_order() {
    let hw = SimHardware::capable(&[0]);
    hw.clear_feature(Feature::SMAP);
    hw.clear_feature(Feature::X2APIC);
    hw.set_msr(Msr::IA32_VMX_MISC, 0);
    assert_eq!(
        only(&hw),
        [Deficiency::X2Apic, Deficiency::Smap, Deficiency::UnrestrictedGuest]
    );
}

#[test]
fn bare_machine_fails_everything_it_can() {
    let hw = SimHardware::bare(&[0]);
    assert_eq!(
        only(&hw),
        [
            Deficiency::X2Apic,
            Deficiency::LongMode,
            Deficiency::AddressWidths,
            Deficiency::TscDeadline,
            Deficiency::NoExecute,
            Deficiency::Smep,
            Deficiency::Smap,
            Deficiency::Mtrr,
            Deficiency::Page1Gb,
            Deficiency::Vmx,
            Deficiency::UnrestrictedGuest,
            Deficiency::Ept,
            Deficiency::CpuidLevel {
                found: 0,
                required: 0x15
            },
            Deficiency::Invept,
            Deficiency::Invvpid,
            Deficiency::Ept1GbPage,
        ]
    );
}

#[test]
fn address_widths_must_be_reported() {
    let hw = SimHardware::capable(&[0]);
    hw.set_cpuid(LEAF_ADDRESS_SIZE, 0, CpuidResult::default());
    assert_eq!(only(&hw), [Deficiency::AddressWidths]);
}

#[test]
fn low_cpuid_level_is_rejected() {
    let hw = SimHardware::capable(&[0]);
    hw.set_cpuid(
        LEAF_VENDOR,
        0,
        CpuidResult {
            eax: 0xD,
            ebx: 0x756E_6547,
            ecx: 0x6C65_746E,
            edx: 0x4965_6E69,
        },
    );
    assert_eq!(
        only(&hw),
        [Deficiency::CpuidLevel {
            found: 0xD,
            required: 0x15
        }]
    );
}

#[test]
fn firmware_locked_vmx_off() {
    let hw = SimHardware::capable(&[0]);
    hw.set_msr(
        Msr::IA32_FEATURE_CONTROL,
        Ia32FeatureControl::new().with_lock(true).into_bits(),
    );
    assert_eq!(only(&hw), [Deficiency::VmxLockedOff]);

    // Unlocked firmware leaves it to us.
    hw.set_msr(Msr::IA32_FEATURE_CONTROL, 0);
    assert!(detect_platform(&hw, 1, 64).is_ok());
}

#[test]
fn ept_needs_the_secondary_control() {
    let hw = SimHardware::capable(&[0]);
    let allowed = 0xFFFF_FFFF_0000_0000 & !(u64::from(ctls::PROCBASED2_EPT) << 32);
    hw.set_msr(Msr::IA32_VMX_PROCBASED_CTLS2, allowed);
    assert_eq!(only(&hw), [Deficiency::Ept]);
}

#[test]
fn no_secondary_controls_means_no_ept_no_vpid() {
    let hw = SimHardware::capable(&[0]);
    let allowed = 0xFFFF_FFFF_0000_0000 & !(u64::from(ctls::PROCBASED_SECONDARY_CONTROLS) << 32);
    hw.set_msr(Msr::IA32_VMX_PROCBASED_CTLS, allowed);
    assert_eq!(
        only(&hw),
        [
            Deficiency::UnrestrictedGuest,
            Deficiency::Ept,
            Deficiency::Invept,
            Deficiency::Invvpid,
            Deficiency::Ept1GbPage,
        ]
    );
}

#[test]
fn mmu_capabilities_are_itemized() {
    let full = VmxEptVpidCap::from_bits(
        SimHardware::capable(&[0]).msr(Msr::IA32_VMX_EPT_VPID_CAP),
    );

    let hw = SimHardware::capable(&[0]);
    hw.set_msr(Msr::IA32_VMX_EPT_VPID_CAP, full.with_page_1g(false).into_bits());
    assert_eq!(only(&hw), [Deficiency::Ept1GbPage]);

    hw.set_msr(
        Msr::IA32_VMX_EPT_VPID_CAP,
        full.with_invvpid_all_context(false).with_invept(false).into_bits(),
    );
    assert_eq!(only(&hw), [Deficiency::Invept, Deficiency::Invvpid]);
}

#[test]
fn too_many_cores_counts_detected_not_recorded() {
    let hw = SimHardware::capable(&[0]);
    assert!(detect_platform(&hw, 64, 64).is_ok());
    assert_eq!(
        detect_platform(&hw, 80, 64).unwrap_err().iter().collect::<Vec<_>>(),
        [Deficiency::TooManyCores { found: 80, max: 64 }]
    );
}

#[test]
fn weak_security_config_is_not_fatal() {
    let hw = SimHardware::capable(&[0]);
    hw.clear_feature(Feature::ARCH_CAP);
    let caps = detect_platform(&hw, 1, 64).unwrap();
    assert!(!caps.security.is_sound());
    assert_eq!(caps.security.arch_capabilities, None);
}

#[test]
fn l1d_flush_follows_arch_capabilities() {
    let hw = SimHardware::capable(&[0]);
    let caps = detect_platform(&hw, 1, 64).unwrap();
    assert!(caps.security.l1d_flush_needed());
    caps.security.l1d_flush(&hw);
    assert_eq!(hw.msr(Msr::IA32_FLUSH_CMD), hv_registers::msr::IA32_L1D_FLUSH);

    hw.set_msr(
        Msr::IA32_ARCH_CAPABILITIES,
        Ia32ArchCapabilities::new().with_skip_l1dfl_vmentry(true).into_bits(),
    );
    let caps = detect_platform(&hw, 1, 64).unwrap();
    assert!(!caps.security.l1d_flush_needed());
}
