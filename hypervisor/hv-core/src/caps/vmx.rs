use crate::caps::FeatureTable;
use crate::hw::Hardware;
use bitfield_struct::bitfield;
use hv_cpuid::Feature;
use hv_registers::{Ia32FeatureControl, Msr, VmxAllowedControls, VmxEptVpidCap, VmxMisc, ctls};

/// APIC-virtualization controls the processor allows.
#[bitfield(u8)]
#[derive(Eq, PartialEq)]
pub struct ApicvFeatures {
    pub tpr_shadow: bool,
    pub virtualize_apic_accesses: bool,
    pub apic_register_virtualization: bool,
    pub virtualize_x2apic_mode: bool,
    pub virtual_interrupt_delivery: bool,
    /// Only reported when virtual-interrupt delivery is also allowed.
    pub posted_interrupts: bool,
    #[bits(2)]
    __: u8,
}

impl ApicvFeatures {
    /// TPR shadow, APIC-access virtualization and APIC-register
    /// virtualization; without all three APICv is not used at all.
    #[must_use]
    pub const fn is_basic(self) -> bool {
        self.tpr_shadow() && self.virtualize_apic_accesses() && self.apic_register_virtualization()
    }

    /// Basic APICv plus interrupt delivery and posted interrupts.
    #[must_use]
    pub const fn is_advanced(self) -> bool {
        self.is_basic() && self.virtual_interrupt_delivery() && self.posted_interrupts()
    }
}

/// What VMX operation can do on this platform.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VmxCapabilitySet {
    /// The secondary processor-based controls can be activated.
    pub secondary_controls: bool,
    pub ept: bool,
    pub vpid: bool,
    pub unrestricted_guest: bool,
    pub ept_vpid: VmxEptVpidCap,
    pub apicv: ApicvFeatures,
    /// Firmware locked `IA32_FEATURE_CONTROL` with VMX disabled.
    pub locked_off: bool,
}

impl VmxCapabilitySet {
    /// Reads the VMX capability MSRs. Nothing is read when CPUID does not
    /// advertise VMX; the result is then all-unsupported.
    pub fn read(hw: &impl Hardware, features: &FeatureTable) -> Self {
        if !features.has(Feature::VMX) {
            return Self::default();
        }

        let feature_control = Ia32FeatureControl::from_bits(hw.read_msr(Msr::IA32_FEATURE_CONTROL));
        let pin = VmxAllowedControls(hw.read_msr(Msr::IA32_VMX_PINBASED_CTLS));
        let proc = VmxAllowedControls(hw.read_msr(Msr::IA32_VMX_PROCBASED_CTLS));
        let misc = VmxMisc(hw.read_msr(Msr::IA32_VMX_MISC));

        let secondary_controls = proc.allows(ctls::PROCBASED_SECONDARY_CONTROLS);
        let proc2 = if secondary_controls {
            VmxAllowedControls(hw.read_msr(Msr::IA32_VMX_PROCBASED_CTLS2))
        } else {
            VmxAllowedControls::default()
        };

        let ept = proc2.allows(ctls::PROCBASED2_EPT);
        let vpid = proc2.allows(ctls::PROCBASED2_VPID);
        let ept_vpid = if ept || vpid {
            VmxEptVpidCap::from_bits(hw.read_msr(Msr::IA32_VMX_EPT_VPID_CAP))
        } else {
            VmxEptVpidCap::new()
        };

        let vid = proc2.allows(ctls::PROCBASED2_VIRTUAL_INTERRUPT_DELIVERY);
        let apicv = ApicvFeatures::new()
            .with_tpr_shadow(proc.allows(ctls::PROCBASED_TPR_SHADOW))
            .with_virtualize_apic_accesses(proc2.allows(ctls::PROCBASED2_VIRTUALIZE_APIC_ACCESSES))
            .with_apic_register_virtualization(
                proc2.allows(ctls::PROCBASED2_APIC_REGISTER_VIRTUALIZATION),
            )
            .with_virtualize_x2apic_mode(proc2.allows(ctls::PROCBASED2_VIRTUALIZE_X2APIC_MODE))
            .with_virtual_interrupt_delivery(vid)
            .with_posted_interrupts(vid && pin.allows(ctls::PINBASED_POSTED_INTERRUPTS));

        Self {
            secondary_controls,
            ept,
            vpid,
            unrestricted_guest: misc.supports_unrestricted_guest()
                && proc2.allows(ctls::PROCBASED2_UNRESTRICTED_GUEST),
            ept_vpid,
            apicv,
            locked_off: feature_control.vmx_locked_off(),
        }
    }

    #[must_use]
    pub const fn has_invept(&self) -> bool {
        self.ept_vpid.invept()
    }

    /// `INVVPID` with both the single-context and all-context types.
    #[must_use]
    pub const fn has_invvpid(&self) -> bool {
        self.ept_vpid.invvpid()
            && self.ept_vpid.invvpid_single_context()
            && self.ept_vpid.invvpid_all_context()
    }

    #[must_use]
    pub const fn has_ept_1g_pages(&self) -> bool {
        self.ept_vpid.page_1g()
    }
}
