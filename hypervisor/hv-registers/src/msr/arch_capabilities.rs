use bitfield_struct::bitfield;

/// `IA32_ARCH_CAPABILITIES` (MSR `0x10A`), enumerated by `CPUID.(EAX=7,ECX=0):EDX[29]`.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Ia32ArchCapabilities {
    /// Bit 0 — RDCL_NO: not susceptible to rogue data cache load.
    pub rdcl_no: bool,

    /// Bit 1 — IBRS_ALL: enhanced IBRS.
    pub ibrs_all: bool,

    /// Bit 2 — RSBA: RSB alternate.
    pub rsba: bool,

    /// Bit 3 — SKIP_L1DFL_VMENTRY: no L1D flush needed on VM entry.
    pub skip_l1dfl_vmentry: bool,

    /// Bit 4 — SSB_NO.
    pub ssb_no: bool,

    /// Bits 5–63.
    #[bits(59)]
    pub rest: u64,
}
