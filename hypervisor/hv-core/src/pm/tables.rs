//! Built-in `_PSS`/`_CST` data for processors the hypervisor is validated on.

use hv_acpi::{CpuStateInfo, CpuStateTable, CxState, GenericAddress, PxState, SpaceId};

const fn px(freq: u64, control: u64) -> PxState {
    PxState::new(freq, 0, 0xA, control)
}

const fn cx(entry_method: GenericAddress, cx_type: u8, latency: u32, power: u64) -> CxState {
    CxState {
        entry_method,
        cx_type,
        latency,
        power,
    }
}

const FFH: GenericAddress = GenericAddress::new(SpaceId::FunctionalFixedHw, 0, 0);

const PX_A3960: [PxState; 17] = [
    px(0x960, 0x1800),
    px(0x8FC, 0x1700),
    px(0x898, 0x1600),
    px(0x834, 0x1500),
    px(0x7D0, 0x1400),
    px(0x76C, 0x1300),
    px(0x708, 0x1200),
    px(0x6A4, 0x1100),
    px(0x640, 0x1000),
    px(0x5DC, 0x0F00),
    px(0x578, 0x0E00),
    px(0x514, 0x0D00),
    px(0x4B0, 0x0C00),
    px(0x44C, 0x0B00),
    px(0x3E8, 0x0A00),
    px(0x384, 0x0900),
    px(0x320, 0x0800),
];

const PX_A3950: [PxState; 13] = [
    px(0x7D0, 0x1400),
    px(0x76C, 0x1300),
    px(0x708, 0x1200),
    px(0x6A4, 0x1100),
    px(0x640, 0x1000),
    px(0x5DC, 0x0F00),
    px(0x578, 0x0E00),
    px(0x514, 0x0D00),
    px(0x4B0, 0x0C00),
    px(0x44C, 0x0B00),
    px(0x3E8, 0x0A00),
    px(0x384, 0x0900),
    px(0x320, 0x0800),
];

const PX_J3455: [PxState; 9] = [
    px(0x5DD, 0x1700),
    px(0x5DC, 0x0F00),
    px(0x578, 0x0E00),
    px(0x514, 0x0D00),
    px(0x4B0, 0x0C00),
    px(0x44C, 0x0B00),
    px(0x3E8, 0x0A00),
    px(0x384, 0x0900),
    px(0x320, 0x0800),
];

const PX_N3350: [PxState; 5] = [
    px(0x44D, 0x1800),
    px(0x44C, 0x0B00),
    px(0x3E8, 0x0A00),
    px(0x384, 0x0900),
    px(0x320, 0x0800),
];

const PX_I7_8650U: [PxState; 16] = [
    px(0x835, 0x2A00),
    px(0x834, 0x1500),
    px(0x76C, 0x1300),
    px(0x708, 0x1200),
    px(0x6A4, 0x1100),
    px(0x640, 0x1000),
    px(0x5DC, 0x0F00),
    px(0x578, 0x0E00),
    px(0x4B0, 0x0C00),
    px(0x44C, 0x0B00),
    px(0x3E8, 0x0A00),
    px(0x320, 0x0800),
    px(0x2BC, 0x0700),
    px(0x258, 0x0600),
    px(0x1F4, 0x0500),
    px(0x190, 0x0400),
];

/// Broxton SoCs (A39x0, J3455, N3350).
const CX_BXT: [CxState; 3] = [
    cx(FFH, 1, 0x1, 0x3E8),
    cx(GenericAddress::system_io(0x415, 8), 2, 0x32, 0xA),
    cx(GenericAddress::system_io(0x419, 8), 3, 0x96, 0xA),
];

const CX_I7_8650U: [CxState; 3] = [
    cx(FFH, 1, 0x1, 0),
    cx(GenericAddress::system_io(0x1816, 8), 2, 0x97, 0),
    cx(GenericAddress::system_io(0x1819, 8), 3, 0x40A, 0),
];

pub const BUILTIN_CPU_STATE_TABLES: [CpuStateTable; 5] = [
    CpuStateTable {
        model_name: "Intel(R) Atom(TM) Processor A3960 @ 1.90GHz",
        info: CpuStateInfo {
            px: &PX_A3960,
            cx: &CX_BXT,
        },
    },
    CpuStateTable {
        model_name: "Intel(R) Atom(TM) Processor A3950 @ 1.60GHz",
        info: CpuStateInfo {
            px: &PX_A3950,
            cx: &CX_BXT,
        },
    },
    CpuStateTable {
        model_name: "Intel(R) Celeron(R) CPU J3455 @ 1.50GHz",
        info: CpuStateInfo {
            px: &PX_J3455,
            cx: &CX_BXT,
        },
    },
    CpuStateTable {
        model_name: "Intel(R) Celeron(R) CPU N3350 @ 1.10GHz",
        info: CpuStateInfo {
            px: &PX_N3350,
            cx: &CX_BXT,
        },
    },
    CpuStateTable {
        model_name: "Intel(R) Core(TM) i7-8650U CPU @ 1.90GHz",
        info: CpuStateInfo {
            px: &PX_I7_8650U,
            cx: &CX_I7_8650U,
        },
    },
];
