//! # Board configuration
//!
//! Everything the hypervisor core needs to know about the machine that is
//! fixed at build time: how many pCPUs the per-CPU arrays are sized for,
//! how long bring-up may take, which core boots first, where the startup
//! trampoline lives, and the ACPI power-management register descriptors
//! that would otherwise come from parsing the FADT/FACS.
//!
//! ## Layout
//!
//! * [`limits`] holds the sizing and timing constants.
//! * [`platform`] holds this board's ACPI register descriptors and its
//!   generated processor power-state table.
//! * [`BoardConfig`] bundles both into one value the core takes by
//!   reference, so tests can substitute another board.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod limits;
pub mod platform;

use hv_acpi::{CpuStateTable, ResetRegister, SleepStateData};
pub use limits::{BOOT_CPU_ID, CPU_UP_TIMEOUT_SECS, MAX_PCPU_NUM, POLL_INTERVAL_US};

/// Build-time description of the host board.
#[derive(Copy, Clone, Debug)]
pub struct BoardConfig {
    /// Upper bound on enumerated pCPUs; never above [`MAX_PCPU_NUM`].
    pub max_pcpus: usize,
    /// Budget for bring-up and for teardown, in whole seconds.
    pub cpu_up_timeout_secs: u32,
    /// Delay between two polls of the up-count.
    pub poll_interval_us: u32,
    /// Logical index of the core that runs first.
    pub boot_cpu_id: u16,
    /// Physical address of the real-mode trampoline entry (the SIPI vector
    /// page); must be 4 KiB aligned and below 1 MiB.
    pub trampoline_start16_paddr: u64,
    pub sleep: SleepStateData,
    pub reset: ResetRegister,
    /// Generated for this board; used when the brand string matches none of
    /// the built-in tables.
    pub cpu_state_table: CpuStateTable,
}

impl BoardConfig {
    #[must_use]
    pub const fn host() -> Self {
        Self {
            max_pcpus: MAX_PCPU_NUM,
            cpu_up_timeout_secs: CPU_UP_TIMEOUT_SECS,
            poll_interval_us: POLL_INTERVAL_US,
            boot_cpu_id: BOOT_CPU_ID,
            trampoline_start16_paddr: platform::TRAMPOLINE_START16_PADDR,
            sleep: platform::HOST_SLEEP_STATE,
            reset: platform::HOST_RESET_REGISTER,
            cpu_state_table: platform::BOARD_CPU_STATE_TABLE,
        }
    }

    /// The bring-up/teardown budget in microseconds.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn cpu_up_timeout_us(&self) -> u64 {
        self.cpu_up_timeout_secs as u64 * 1_000_000
    }

    /// [`max_pcpus`](Self::max_pcpus), capped at [`MAX_PCPU_NUM`] for boards
    /// built by hand.
    #[must_use]
    pub const fn pcpu_limit(&self) -> usize {
        if self.max_pcpus < MAX_PCPU_NUM {
            self.max_pcpus
        } else {
            MAX_PCPU_NUM
        }
    }

    #[must_use]
    pub const fn with_cpu_up_timeout_secs(mut self, secs: u32) -> Self {
        self.cpu_up_timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_max_pcpus(mut self, max_pcpus: usize) -> Self {
        self.max_pcpus = max_pcpus;
        self.max_pcpus = self.pcpu_limit();
        self
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_converts_seconds_to_microseconds() {
        let board = BoardConfig::host().with_cpu_up_timeout_secs(3);
        assert_eq!(board.cpu_up_timeout_us(), 3_000_000);
        assert_eq!(BoardConfig::host().with_cpu_up_timeout_secs(0).cpu_up_timeout_us(), 0);
    }

    #[test]
    fn max_pcpus_is_capped() {
        assert_eq!(BoardConfig::host().with_max_pcpus(4).max_pcpus, 4);
        assert_eq!(BoardConfig::host().with_max_pcpus(1000).max_pcpus, MAX_PCPU_NUM);

        let by_hand = BoardConfig {
            max_pcpus: 100,
            ..BoardConfig::host()
        };
        assert_eq!(by_hand.pcpu_limit(), MAX_PCPU_NUM);
    }
}
