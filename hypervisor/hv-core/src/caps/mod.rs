//! # Capability detector
//!
//! Runs once on the leader before any follower is started. Reads CPUID and
//! the VMX capability MSRs into a [`FeatureTable`] and a
//! [`VmxCapabilitySet`], picks the speculation-mitigation mode and checks the
//! platform against a fixed list of requirements. Every failed requirement
//! is reported; any failure stops the boot.
//!
//! Followers only [`verify_follower`]: their own feature bits must satisfy
//! the same feature checks, everything else is taken from the leader.

mod deficiency;
mod speculation;
mod vmx;

pub use deficiency::{Deficiencies, Deficiency, MAX_DEFICIENCIES};
pub use speculation::{IbrsMode, SecurityPosture};
pub use vmx::{ApicvFeatures, VmxCapabilitySet};

use crate::hw::Hardware;
use hv_cpuid::{
    AddressSizes, BrandString, CpuidRanges, FEATURE_WORDS, Feature, FeatureWord, LEAF_ADDRESS_SIZE,
    LEAF_BRAND_1, LEAF_BRAND_2, LEAF_BRAND_3, LEAF_FEATURES, LEAF_MAX_EXTENDED, LEAF_TSC_CRYSTAL,
    LEAF_VENDOR, Leaf1Eax,
};
use hv_sync::AdaptiveWait;

/// Lowest maximum basic leaf the hypervisor accepts.
pub const MIN_CPUID_LEVEL: u32 = LEAF_TSC_CRYSTAL;

/// Family 6 model 0x5C (Apollo Lake) loses MONITOR wake-ups.
const MONITOR_ERRATUM: (u16, u8) = (0x06, 0x5C);

/// Raw CPUID state of one core.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FeatureTable {
    pub words: [u32; FEATURE_WORDS],
    pub family: u16,
    pub model: u8,
    pub ranges: CpuidRanges,
    pub address: AddressSizes,
    pub physical_address_mask: u64,
    pub model_name: BrandString,
}

impl FeatureTable {
    pub fn read(hw: &impl Hardware) -> Self {
        let ranges = CpuidRanges::from_leaves(
            hw.cpuid(LEAF_VENDOR, 0),
            hw.cpuid(LEAF_MAX_EXTENDED, 0),
        );
        let available = |leaf: u32| ranges.has_basic(leaf) || ranges.has_ext(leaf);

        let mut table = Self {
            ranges,
            ..Self::default()
        };

        for word in FeatureWord::ALL {
            let (leaf, subleaf, reg) = word.source();
            if available(leaf) {
                table.words[word.index()] = hw.cpuid(leaf, subleaf).register(reg);
            }
        }

        if available(LEAF_FEATURES) {
            let eax = Leaf1Eax::from_bits(hw.cpuid(LEAF_FEATURES, 0).eax);
            table.family = eax.effective_family();
            table.model = eax.effective_model();
        }

        if available(LEAF_BRAND_3) {
            table.model_name = BrandString::from_leaves([
                hw.cpuid(LEAF_BRAND_1, 0),
                hw.cpuid(LEAF_BRAND_2, 0),
                hw.cpuid(LEAF_BRAND_3, 0),
            ]);
        }

        if available(LEAF_ADDRESS_SIZE) {
            table.address = AddressSizes::from(hw.cpuid(LEAF_ADDRESS_SIZE, 0));
            table.physical_address_mask = table.address.physical_address_mask();
        }

        table
    }

    #[inline]
    #[must_use]
    pub const fn has(&self, feature: Feature) -> bool {
        feature.is_set_in(&self.words)
    }

    /// MONITOR/MWAIT is advertised and not affected by the wake-up erratum.
    #[must_use]
    pub const fn monitor_usable(&self) -> bool {
        self.has(Feature::MONITOR)
            && !(self.family == MONITOR_ERRATUM.0 && self.model == MONITOR_ERRATUM.1)
    }

    /// Re-reads CPUID.01H:ECX; `OSXSAVE` mirrors `CR4.OSXSAVE`.
    fn refresh_leaf1_ecx(&mut self, hw: &impl Hardware) {
        let (leaf, subleaf, reg) = FeatureWord::Leaf1Ecx.source();
        self.words[FeatureWord::Leaf1Ecx.index()] = hw.cpuid(leaf, subleaf).register(reg);
    }
}

/// Everything the leader learned about the platform, published once.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlatformCapabilities {
    pub features: FeatureTable,
    pub vmx: VmxCapabilitySet,
    pub ibrs: IbrsMode,
    pub security: SecurityPosture,
    /// How followers wait on the bring-up flag.
    pub wait: AdaptiveWait,
}

/// Enables `CR4.OSXSAVE` when XSAVE is advertised and refreshes the feature
/// word it is reflected in.
pub fn xsave_init(hw: &impl Hardware, features: &mut FeatureTable) {
    if features.has(Feature::XSAVE) {
        hw.write_cr4(hw.read_cr4().with_osxsave(true));
        features.refresh_leaf1_ecx(hw);
    }
}

fn check_features(features: &FeatureTable, out: &mut Deficiencies) {
    out.require(features.has(Feature::X2APIC), Deficiency::X2Apic);
    out.require(features.has(Feature::LM), Deficiency::LongMode);
    out.require(features.address.is_valid(), Deficiency::AddressWidths);
    out.require(features.has(Feature::TSC_DEADLINE), Deficiency::TscDeadline);
    out.require(features.has(Feature::NX), Deficiency::NoExecute);
    out.require(features.has(Feature::SMEP), Deficiency::Smep);
    out.require(features.has(Feature::SMAP), Deficiency::Smap);
    out.require(features.has(Feature::MTRR), Deficiency::Mtrr);
    out.require(features.has(Feature::PAGE1GB), Deficiency::Page1Gb);
    out.require(features.has(Feature::VMX), Deficiency::Vmx);
}

/// The full checklist, in order.
#[must_use]
pub fn check_platform(
    features: &FeatureTable,
    vmx: &VmxCapabilitySet,
    detected_cores: usize,
    max_pcpus: usize,
) -> Deficiencies {
    let mut out = Deficiencies::new();
    check_features(features, &mut out);
    out.require(vmx.unrestricted_guest, Deficiency::UnrestrictedGuest);
    out.require(vmx.ept, Deficiency::Ept);
    out.require(
        features.ranges.max_basic >= MIN_CPUID_LEVEL,
        Deficiency::CpuidLevel {
            found: features.ranges.max_basic,
            required: MIN_CPUID_LEVEL,
        },
    );
    out.require(!vmx.locked_off, Deficiency::VmxLockedOff);
    out.require(
        detected_cores <= max_pcpus,
        Deficiency::TooManyCores {
            found: detected_cores,
            max: max_pcpus,
        },
    );
    out.require(vmx.has_invept(), Deficiency::Invept);
    out.require(vmx.has_invvpid(), Deficiency::Invvpid);
    out.require(vmx.has_ept_1g_pages(), Deficiency::Ept1GbPage);
    out
}

/// Detects and validates the platform on the leader.
///
/// # Errors
/// Every failed requirement, in checklist order. Each one is also logged.
pub fn detect_platform(
    hw: &impl Hardware,
    detected_cores: usize,
    max_pcpus: usize,
) -> Result<PlatformCapabilities, Deficiencies> {
    let mut features = FeatureTable::read(hw);
    xsave_init(hw, &mut features);

    let vmx = VmxCapabilitySet::read(hw, &features);
    let security = SecurityPosture::read(hw, &features);
    if !security.is_sound() {
        log::warn!("platform lacks side-channel mitigations: {security:?}");
    }

    let caps = PlatformCapabilities {
        features,
        vmx,
        ibrs: IbrsMode::select(&features),
        security,
        wait: AdaptiveWait::select(features.monitor_usable()),
    };

    let deficiencies = check_platform(&features, &vmx, detected_cores, max_pcpus);
    for item in deficiencies.iter() {
        log::error!("{item}");
    }
    deficiencies.into_result()?;

    log::info!(
        "{} {} family {:#x} model {:#x}, {} phys bits, ibrs {:?}, apicv {:?}",
        features.ranges.vendor.as_str(),
        features.model_name.as_str(),
        features.family,
        features.model,
        features.address.phys_bits,
        caps.ibrs,
        caps.vmx.apicv,
    );
    Ok(caps)
}

/// Runs the per-core part of detection on a follower.
///
/// # Errors
/// The feature requirements this core fails.
pub fn verify_follower(hw: &impl Hardware) -> Result<(), Deficiencies> {
    let mut features = FeatureTable::read(hw);
    xsave_init(hw, &mut features);

    let mut out = Deficiencies::new();
    check_features(&features, &mut out);
    out.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimHardware;

    #[test]
    fn capable_machine_passes() {
        let hw = SimHardware::capable(&[0, 2, 4, 6]);
        let caps = detect_platform(&hw, 4, 64).unwrap();
        assert_eq!(caps.features.family, 6);
        assert_eq!(caps.features.model, 0x8E);
        assert_eq!(caps.features.address.phys_bits, 39);
        assert_eq!(caps.features.physical_address_mask, 0x7F_FFFF_F000);
        assert_eq!(caps.features.model_name.as_str(), crate::hw::sim::BRAND);
        assert_eq!(caps.ibrs, IbrsMode::Opt);
        assert_eq!(caps.wait, AdaptiveWait::MonitorMwait);
        assert!(caps.vmx.apicv.is_advanced());
        assert!(caps.security.is_sound());
    }

    #[test]
    fn xsave_sets_osxsave_and_refreshes_the_word() {
        let hw = SimHardware::capable(&[0]);
        let caps = detect_platform(&hw, 1, 64).unwrap();
        assert!(hw.read_cr4().osxsave());
        assert!(caps.features.has(Feature::OSXSAVE));
    }

    #[test]
    fn no_xsave_leaves_cr4_alone() {
        let hw = SimHardware::capable(&[0]);
        hw.clear_feature(Feature::XSAVE);
        let caps = detect_platform(&hw, 1, 64).unwrap();
        assert!(!hw.read_cr4().osxsave());
        assert!(!caps.features.has(Feature::OSXSAVE));
    }

    #[test]
    fn monitor_erratum_falls_back_to_pause() {
        let hw = SimHardware::capable(&[0]);
        // Family 6, model 0x5C.
        hw.set_leaf1_eax(0x0005_06C9);
        let caps = detect_platform(&hw, 1, 64).unwrap();
        assert_eq!(caps.features.model, 0x5C);
        assert_eq!(caps.wait, AdaptiveWait::Pause);
    }

    #[test]
    fn too_many_cores_is_reported() {
        let hw = SimHardware::capable(&[0]);
        let err = detect_platform(&hw, 65, 64).unwrap_err();
        assert_eq!(
            err.iter().collect::<Vec<_>>(),
            [Deficiency::TooManyCores { found: 65, max: 64 }]
        );
    }

    #[test]
    fn missing_vmx_skips_the_vmx_msrs() {
        let hw = SimHardware::capable(&[0]);
        hw.clear_feature(Feature::VMX);
        let err = detect_platform(&hw, 1, 64).unwrap_err();
        for item in [
            Deficiency::Vmx,
            Deficiency::UnrestrictedGuest,
            Deficiency::Ept,
            Deficiency::Invept,
            Deficiency::Invvpid,
            Deficiency::Ept1GbPage,
        ] {
            assert!(err.contains(&item), "{item:?} missing from {err:?}");
        }
        assert!(!err.contains(&Deficiency::VmxLockedOff));
    }

    #[test]
    fn follower_check_uses_its_own_cpuid() {
        let hw = SimHardware::capable(&[0]);
        assert_eq!(verify_follower(&hw), Ok(()));
        hw.clear_feature(Feature::SMAP);
        assert_eq!(
            verify_follower(&hw).unwrap_err().iter().collect::<Vec<_>>(),
            [Deficiency::Smap]
        );
    }
}
