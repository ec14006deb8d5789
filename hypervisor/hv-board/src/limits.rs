//! # Sizing and timing limits

/// Capacity of every per-CPU array, and the width of the active-core bitmap.
pub const MAX_PCPU_NUM: usize = 64;

/// How long the boot core waits for followers to come up (or go down).
pub const CPU_UP_TIMEOUT_SECS: u32 = 1;

/// Granularity of the up-count poll.
pub const POLL_INTERVAL_US: u32 = 10;

/// Logical index of the boot core.
pub const BOOT_CPU_ID: u16 = 0;

const _: () = {
    assert!(MAX_PCPU_NUM <= u64::BITS as usize);
    assert!(MAX_PCPU_NUM > 0);
    assert!((BOOT_CPU_ID as usize) < MAX_PCPU_NUM);
    assert!(POLL_INTERVAL_US > 0);
};
