//! Unrecoverable-error exit.

use crate::hw::Hardware;
use core::fmt::Display;

/// Logs `reason` and parks the calling core for good.
#[cold]
pub fn halt(hw: &impl Hardware, reason: impl Display) -> ! {
    log::error!("fatal: {reason}");
    hw.disable_irq();
    hw.halt_forever()
}
