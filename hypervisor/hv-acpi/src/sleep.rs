use crate::{GenericAddress, RegisterIo};
use core::hint::spin_loop;

/// `SLP_TYPx` field position in PM1x_CNT.
pub const BIT_SLP_TYPX: u32 = 10;
/// `SLP_EN` bit in PM1x_CNT.
pub const BIT_SLP_EN: u32 = 13;
/// `WAK_STS` bit in PM1x_STS (ACPI 6.5, 4.8.3.1.1).
pub const BIT_WAK_STS: u32 = 15;

/// The `\_Sx` package: `SLP_TYPa` / `SLP_TYPb` for one sleep state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SleepTypePackage {
    pub pm1a: u8,
    pub pm1b: u8,
}

impl SleepTypePackage {
    #[must_use]
    pub const fn new(pm1a: u8, pm1b: u8) -> Self {
        Self { pm1a, pm1b }
    }

    /// PM1a/PM1b control values that enter this state: `SLP_TYPx | SLP_EN`.
    #[must_use]
    pub const fn control_values(&self) -> (u16, u16) {
        #[allow(clippy::cast_lossless)]
        const fn encode(typ: u8) -> u16 {
            (((typ & 0x7) as u16) << BIT_SLP_TYPX) | (1 << BIT_SLP_EN)
        }
        (encode(self.pm1a), encode(self.pm1b))
    }
}

/// Host sleep-state registers and firmware wake vector locations.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SleepStateData {
    pub pm1a_evt: GenericAddress,
    pub pm1b_evt: GenericAddress,
    pub pm1a_cnt: GenericAddress,
    pub pm1b_cnt: GenericAddress,
    pub s3_pkg: SleepTypePackage,
    pub s5_pkg: SleepTypePackage,
    /// Physical address of the FACS 32-bit firmware waking vector.
    pub wake_vector_32: u64,
    /// Physical address of the FACS 64-bit firmware waking vector.
    pub wake_vector_64: u64,
}

/// Writes the sleep control values, then polls PM1 status until the
/// platform reports `WAK_STS`.
///
/// PM1b registers are skipped when their address is zero. Returns only once
/// the wake status is observed; there is deliberately no time bound.
pub fn enter_sleep_state(
    io: &(impl RegisterIo + ?Sized),
    data: &SleepStateData,
    pm1a_cnt_val: u16,
    pm1b_cnt_val: u16,
) {
    log::trace!("PM1 control a={pm1a_cnt_val:#06x} b={pm1b_cnt_val:#06x}");

    data.pm1a_cnt.write16(io, pm1a_cnt_val);
    if data.pm1b_cnt.is_present() {
        data.pm1b_cnt.write16(io, pm1b_cnt_val);
    }

    loop {
        let mut status = data.pm1a_evt.read16(io);
        if data.pm1b_evt.is_present() {
            status |= data.pm1b_evt.read16(io);
        }
        if status & (1 << BIT_WAK_STS) != 0 {
            break;
        }
        spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::tests::{Access, Recorder};
    use core::cell::Cell;

    fn board() -> SleepStateData {
        SleepStateData {
            pm1a_evt: GenericAddress::system_io(0x400, 32),
            pm1a_cnt: GenericAddress::system_io(0x404, 16),
            s3_pkg: SleepTypePackage::new(0x05, 0x00),
            s5_pkg: SleepTypePackage::new(0x07, 0x00),
            ..SleepStateData::default()
        }
    }

    #[test]
    fn control_values_set_type_and_enable() {
        assert_eq!(board().s3_pkg.control_values(), (0x3400, 0x2000));
        assert_eq!(board().s5_pkg.control_values(), (0x3C00, 0x2000));
    }

    #[test]
    fn pm1b_is_skipped_when_absent() {
        let io = Recorder {
            read_value: 1 << BIT_WAK_STS,
            ..Recorder::default()
        };
        let (a, b) = board().s3_pkg.control_values();
        enter_sleep_state(&io, &board(), a, b);
        assert_eq!(
            *io.log.borrow(),
            [Access::PioWrite16(0x404, 0x3400), Access::PioRead(0x400)]
        );
    }

    #[test]
    fn both_blocks_are_written_and_polled() {
        let io = Recorder {
            read_value: 1 << BIT_WAK_STS,
            ..Recorder::default()
        };
        let data = SleepStateData {
            pm1b_evt: GenericAddress::system_memory(0xFE00_0000, 16),
            pm1b_cnt: GenericAddress::system_memory(0xFE00_0004, 16),
            ..board()
        };
        enter_sleep_state(&io, &data, 0x3400, 0x3400);
        assert_eq!(
            *io.log.borrow(),
            [
                Access::PioWrite16(0x404, 0x3400),
                Access::MmioWrite(0xFE00_0004, 0x3400),
                Access::PioRead(0x400),
                Access::MmioRead(0xFE00_0000),
            ]
        );
    }

    /// Status reads return 0 a few times before the wake bit appears.
    struct WakesLate {
        polls: Cell<u32>,
    }

    impl RegisterIo for WakesLate {
        fn mmio_read16(&self, _: u64) -> u16 {
            0
        }
        fn mmio_write16(&self, _: u64, _: u16) {}
        fn pio_read16(&self, _: u16) -> u16 {
            self.polls.set(self.polls.get() + 1);
            if self.polls.get() < 5 { 0x0001 } else { 0x8001 }
        }
        fn pio_write16(&self, _: u16, _: u16) {}
        fn pio_write8(&self, _: u16, _: u8) {}
    }

    #[test]
    fn keeps_polling_until_wake_status() {
        let io = WakesLate { polls: Cell::new(0) };
        enter_sleep_state(&io, &board(), 0x3400, 0x2000);
        assert_eq!(io.polls.get(), 5);
    }
}
