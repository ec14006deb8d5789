use crate::GenericAddress;

/// Most performance states the hypervisor exposes.
pub const MAX_PSTATE: usize = 20;
/// Most idle-state entries (C1..C7).
pub const MAX_CX_ENTRY: usize = 7;

/// One `_PSS` entry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PxState {
    /// MHz.
    pub core_frequency: u64,
    /// mW.
    pub power: u64,
    /// µs.
    pub transition_latency: u64,
    /// µs.
    pub bus_master_latency: u64,
    pub control: u64,
    pub status: u64,
}

impl PxState {
    #[must_use]
    pub const fn new(core_frequency: u64, power: u64, latency: u64, control: u64) -> Self {
        Self {
            core_frequency,
            power,
            transition_latency: latency,
            bus_master_latency: latency,
            control,
            status: control,
        }
    }
}

/// One `_CST` entry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CxState {
    pub entry_method: GenericAddress,
    pub cx_type: u8,
    /// µs.
    pub latency: u32,
    /// mW.
    pub power: u64,
}

/// Power-state tables for one processor model.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CpuStateInfo {
    pub px: &'static [PxState],
    pub cx: &'static [CxState],
}

impl CpuStateInfo {
    pub const EMPTY: Self = Self { px: &[], cx: &[] };

    /// The tables truncated to what the hypervisor can expose.
    #[must_use]
    pub fn clamped(&self) -> Self {
        let (px, cx) = (self.px, self.cx);
        Self {
            px: &px[..px.len().min(MAX_PSTATE)],
            cx: &cx[..cx.len().min(MAX_CX_ENTRY)],
        }
    }
}

/// Tables keyed by the exact CPUID brand string.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CpuStateTable {
    pub model_name: &'static str,
    pub info: CpuStateInfo,
}
