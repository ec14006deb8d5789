use bitfield_struct::bitfield;

/// `IA32_FEATURE_CONTROL` (MSR `0x3A`).
///
/// Firmware programs this register and usually sets the lock bit. Once
/// locked, VMX can only be entered if the matching enable bit was set
/// before locking; otherwise `vmxon` raises `#GP`.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Ia32FeatureControl {
    /// Bit 0 — Lock. Writes fault until the next reset.
    pub lock: bool,

    /// Bit 1 — Enable VMX inside SMX operation.
    pub vmx_inside_smx: bool,

    /// Bit 2 — Enable VMX outside SMX operation.
    pub vmx_outside_smx: bool,

    /// Bits 3–63.
    #[bits(61)]
    pub rest: u64,
}

impl Ia32FeatureControl {
    /// Whether firmware locked the register with VMX (outside SMX) disabled.
    #[inline]
    #[must_use]
    pub const fn vmx_locked_off(self) -> bool {
        self.lock() && !self.vmx_outside_smx()
    }
}
