//! # Host platform description
//!
//! Values as the board tooling extracts them from the host's FADT, FACS and
//! `\_S3`/`\_S5` objects.

use hv_acpi::{
    CpuStateInfo, CpuStateTable, CxState, GenericAddress, PxState, ResetRegister, SleepStateData,
    SleepTypePackage, SpaceId,
};

/// SIPI vector page holding the real-mode trampoline.
pub const TRAMPOLINE_START16_PADDR: u64 = 0x9_F000;

pub const HOST_SLEEP_STATE: SleepStateData = SleepStateData {
    pm1a_evt: GenericAddress::system_io(0x400, 32),
    pm1b_evt: GenericAddress::NONE,
    pm1a_cnt: GenericAddress::system_io(0x404, 16),
    pm1b_cnt: GenericAddress::NONE,
    s3_pkg: SleepTypePackage::new(0x05, 0x00),
    s5_pkg: SleepTypePackage::new(0x07, 0x00),
    wake_vector_32: 0x7A86_BBDC,
    wake_vector_64: 0x7A86_BBE8,
};

pub const HOST_RESET_REGISTER: ResetRegister = ResetRegister {
    reg: GenericAddress::system_io(0xCF9, 8),
    value: 0x06,
};

const BOARD_PX: [PxState; 6] = [
    PxState::new(0xA8C, 15000, 10, 0x1D00),
    PxState::new(0xA28, 14000, 10, 0x1A00),
    PxState::new(0x960, 12500, 10, 0x1800),
    PxState::new(0x7D0, 10000, 10, 0x1400),
    PxState::new(0x5DC, 7000, 10, 0x0F00),
    PxState::new(0x190, 2000, 10, 0x0400),
];

const BOARD_CX: [CxState; 3] = [
    CxState {
        entry_method: GenericAddress::new(SpaceId::FunctionalFixedHw, 0, 0),
        cx_type: 1,
        latency: 1,
        power: 0,
    },
    CxState {
        entry_method: GenericAddress::system_io(0x1816, 8),
        cx_type: 2,
        latency: 0x97,
        power: 0,
    },
    CxState {
        entry_method: GenericAddress::system_io(0x1819, 8),
        cx_type: 3,
        latency: 0x40A,
        power: 0,
    },
];

pub const BOARD_CPU_STATE_TABLE: CpuStateTable = CpuStateTable {
    model_name: "Intel(R) Core(TM) i5-7300U CPU @ 2.60GHz",
    info: CpuStateInfo {
        px: &BOARD_PX,
        cx: &BOARD_CX,
    },
};

const _: () = {
    assert!(TRAMPOLINE_START16_PADDR.is_multiple_of(4096));
    assert!(TRAMPOLINE_START16_PADDR < 0x10_0000);
};
