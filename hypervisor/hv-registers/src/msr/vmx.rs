use bitfield_struct::bitfield;

/// Control bits of the VM-execution control fields the capability gate cares about.
///
/// Positions refer to the 32-bit control field, i.e. to the *low* half of the
/// matching capability MSR (Intel SDM Vol. 3, §25.6).
pub mod ctls {
    /// Pin-based: process posted interrupts.
    pub const PINBASED_POSTED_INTERRUPTS: u32 = 1 << 7;

    /// Primary processor-based: use TPR shadow.
    pub const PROCBASED_TPR_SHADOW: u32 = 1 << 21;
    /// Primary processor-based: activate secondary controls.
    pub const PROCBASED_SECONDARY_CONTROLS: u32 = 1 << 31;

    /// Secondary processor-based: virtualize APIC accesses.
    pub const PROCBASED2_VIRTUALIZE_APIC_ACCESSES: u32 = 1 << 0;
    /// Secondary processor-based: enable EPT.
    pub const PROCBASED2_EPT: u32 = 1 << 1;
    /// Secondary processor-based: virtualize x2APIC mode.
    pub const PROCBASED2_VIRTUALIZE_X2APIC_MODE: u32 = 1 << 4;
    /// Secondary processor-based: enable VPID.
    pub const PROCBASED2_VPID: u32 = 1 << 5;
    /// Secondary processor-based: unrestricted guest.
    pub const PROCBASED2_UNRESTRICTED_GUEST: u32 = 1 << 7;
    /// Secondary processor-based: APIC-register virtualization.
    pub const PROCBASED2_APIC_REGISTER_VIRTUALIZATION: u32 = 1 << 8;
    /// Secondary processor-based: virtual-interrupt delivery.
    pub const PROCBASED2_VIRTUAL_INTERRUPT_DELIVERY: u32 = 1 << 9;
}

/// Raw value of a VMX control capability MSR
/// (`IA32_VMX_PINBASED_CTLS`, `IA32_VMX_PROCBASED_CTLS`, `IA32_VMX_PROCBASED_CTLS2`).
///
/// Bits 31:0 report the allowed 0-settings and bits 63:32 the allowed
/// 1-settings: control bit `X` may be 1 only if bit `32 + X` is 1.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmxAllowedControls(pub u64);

impl VmxAllowedControls {
    /// The allowed 1-settings (bits 63:32).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn allowed_ones(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The allowed 0-settings (bits 31:0); a set bit forces the control to 1.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn allowed_zeros(self) -> u32 {
        self.0 as u32
    }

    /// Whether every bit in `ctrl` may be set to 1.
    #[inline]
    #[must_use]
    pub const fn allows(self, ctrl: u32) -> bool {
        (self.allowed_ones() & ctrl) == ctrl
    }
}

/// `IA32_VMX_MISC` (MSR `0x485`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmxMisc(pub u64);

impl VmxMisc {
    /// Bit 5: VM exits store `EFER.LMA` into the "IA-32e mode guest" entry
    /// control. Required for unrestricted guests that switch modes.
    pub const UNRESTRICTED_GUEST: u64 = 1 << 5;

    #[inline]
    #[must_use]
    pub const fn supports_unrestricted_guest(self) -> bool {
        self.0 & Self::UNRESTRICTED_GUEST != 0
    }
}

/// `IA32_VMX_EPT_VPID_CAP` (MSR `0x48C`), Intel SDM Vol. 3, Appendix A.10.
///
/// The low dword describes EPT and `INVEPT`, the high dword `INVVPID`.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct VmxEptVpidCap {
    /// Bit 0 — execute-only EPT translations.
    pub execute_only: bool,
    #[bits(5)]
    _rsv1_5: u8,
    /// Bit 6 — 4-level page walk.
    pub page_walk_4: bool,
    /// Bit 7 — 5-level page walk.
    pub page_walk_5: bool,
    /// Bit 8 — UC memory type for EPT structures.
    pub memtype_uc: bool,
    #[bits(5)]
    _rsv9_13: u8,
    /// Bit 14 — WB memory type for EPT structures.
    pub memtype_wb: bool,
    _rsv15: bool,
    /// Bit 16 — 2 MiB EPT pages.
    pub page_2m: bool,
    /// Bit 17 — 1 GiB EPT pages.
    pub page_1g: bool,
    #[bits(2)]
    _rsv18_19: u8,
    /// Bit 20 — `INVEPT` supported.
    pub invept: bool,
    /// Bit 21 — accessed/dirty flags.
    pub accessed_dirty: bool,
    /// Bit 22 — advanced VM-exit information for EPT violations.
    pub advanced_exit_info: bool,
    /// Bit 23 — supervisor shadow-stack control.
    pub supervisor_shadow_stack: bool,
    _rsv24: bool,
    /// Bit 25 — single-context `INVEPT`.
    pub invept_single_context: bool,
    /// Bit 26 — all-context `INVEPT`.
    pub invept_all_context: bool,
    #[bits(5)]
    _rsv27_31: u8,
    /// Bit 32 — `INVVPID` supported.
    pub invvpid: bool,
    #[bits(7)]
    _rsv33_39: u8,
    /// Bit 40 — individual-address `INVVPID`.
    pub invvpid_individual_address: bool,
    /// Bit 41 — single-context `INVVPID`.
    pub invvpid_single_context: bool,
    /// Bit 42 — all-context `INVVPID`.
    pub invvpid_all_context: bool,
    /// Bit 43 — single-context-retaining-globals `INVVPID`.
    pub invvpid_single_context_retaining_globals: bool,
    #[bits(20)]
    _rsv44_63: u32,
}
