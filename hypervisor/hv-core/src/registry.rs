//! # Per-CPU lifecycle registry
//!
//! [`ClusterState`] is created once on the leader, before any follower is
//! signaled, and lives for the rest of the boot. Everything that more than
//! one core mutates is an atomic:
//!
//! * each [`CoreRecord`]'s lifecycle state (written by its own core only,
//!   except for the leader's record creation),
//! * the active-core bitmap and the up-count, which always move together:
//!   entering `Initializing` sets the bit and increments, going `Dead`
//!   test-and-clears the bit and decrements.
//!
//! ```text
//!   Init ──► Initializing ──► Running
//!                 │              │
//!                 └──► Dead ◄────┘
//!                       │
//!                       └──► Initializing   (next bring-up cycle only)
//! ```

use crate::boot::BootError;
use crate::caps::PlatformCapabilities;
use crate::hw::Hardware;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use hv_acpi::CpuStateInfo;
use hv_board::{BoardConfig, MAX_PCPU_NUM};
use hv_registers::Msr;
use hv_sync::{SpinLock, SyncFlag, SyncOnceCell};
use thiserror::Error;

/// Offset of the 64-bit long-mode entry pointer inside the trampoline page.
pub const TRAMPOLINE_MAIN_ENTRY_OFFSET: u64 = 0x10;

/// Logical index of a pCPU; dense in `0..core_count`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CoreId(u16);

impl CoreId {
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// This core's bit in the active-core bitmap; 0 for ids past its width.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn bit(self) -> u64 {
        match 1u64.checked_shl(self.0 as u32) {
            Some(bit) => bit,
            None => 0,
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pCPU{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum LifecycleState {
    Init = 0,
    Initializing = 1,
    Running = 2,
    Dead = 3,
}

impl LifecycleState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Initializing,
            2 => Self::Running,
            3 => Self::Dead,
            _ => Self::Init,
        }
    }

    /// Counted in the up-count and the active-core bitmap.
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum TransitionError {
    #[error("core id {0} out of range")]
    InvalidCoreId(u16),
    #[error("{core}: illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        core: CoreId,
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("{core} already dead")]
    AlreadyDead { core: CoreId },
    #[error("{core} went down in the current bring-up cycle")]
    NotNewCycle { core: CoreId },
}

/// Per-core slot, indexed by [`CoreId`].
#[derive(Debug)]
pub struct CoreRecord {
    hw_id: u32,
    state: AtomicU8,
    /// Bring-up cycle in which the core last entered `Initializing`.
    entered_cycle: AtomicU32,
    pub(crate) offline_request: AtomicBool,
    /// Pending [`SmpCall`](crate::smp::SmpCall), 0 when empty.
    pub(crate) mailbox: AtomicU8,
    pub(crate) tsc_suspend: AtomicU64,
    /// Set once the core has parked itself after going offline.
    pub(crate) parked: AtomicBool,
}

impl CoreRecord {
    const fn new(hw_id: u32) -> Self {
        Self {
            hw_id,
            state: AtomicU8::new(LifecycleState::Init as u8),
            entered_cycle: AtomicU32::new(0),
            offline_request: AtomicBool::new(false),
            mailbox: AtomicU8::new(0),
            tsc_suspend: AtomicU64::new(0),
            parked: AtomicBool::new(false),
        }
    }

    /// Local-APIC id.
    #[must_use]
    pub const fn hw_id(&self) -> u32 {
        self.hw_id
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_raw(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    /// Cycle counter value saved before the last S3 entry.
    #[must_use]
    pub fn saved_cycles(&self) -> u64 {
        self.tsc_suspend.load(Ordering::Acquire)
    }
}

/// The shared real-mode startup page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Trampoline {
    /// Where followers start fetching; also the S3 firmware wake vector.
    pub start16_paddr: u64,
    /// Physical address of the long-mode entry pointer the trampoline jumps through.
    pub main_entry_slot: u64,
}

impl Trampoline {
    #[must_use]
    pub const fn new(start16_paddr: u64) -> Self {
        Self {
            start16_paddr,
            main_entry_slot: start16_paddr + TRAMPOLINE_MAIN_ENTRY_OFFSET,
        }
    }

    /// Points the trampoline at `entry` and returns the previous target.
    pub fn patch_main_entry(&self, hw: &impl Hardware, entry: u64) -> u64 {
        let previous = hw.read_phys_u64(self.main_entry_slot);
        hw.write_phys_u64(self.main_entry_slot, entry);
        previous
    }
}

/// Process-wide bring-up state shared by every core.
pub struct ClusterState {
    board: BoardConfig,
    records: [CoreRecord; MAX_PCPU_NUM],
    core_count: usize,
    detected_count: usize,
    active: AtomicU64,
    up_count: AtomicU32,
    cycle: AtomicU32,
    sync: SyncFlag,
    trampoline: SpinLock<Trampoline>,
    caps: SyncOnceCell<PlatformCapabilities>,
    power_states: SyncOnceCell<CpuStateInfo>,
    /// PM1a (high half) and PM1b (low half) control values for S5.
    s5_control: AtomicU32,
}

impl ClusterState {
    /// Builds the hardware-id map from the enumerated local-APIC ids; the
    /// first id is the boot core's. Ids beyond the board's pCPU limit are counted
    /// but get no record.
    ///
    /// # Errors
    /// [`BootError::NoCores`] for an empty list,
    /// [`BootError::DuplicateHardwareId`] if an id repeats.
    pub fn new(board: BoardConfig, lapic_ids: &[u32]) -> Result<Self, BootError> {
        if lapic_ids.is_empty() {
            return Err(BootError::NoCores);
        }
        for (i, id) in lapic_ids.iter().enumerate() {
            if lapic_ids[..i].contains(id) {
                return Err(BootError::DuplicateHardwareId(*id));
            }
        }

        let core_count = lapic_ids.len().min(board.pcpu_limit());
        let records = core::array::from_fn(|i| {
            CoreRecord::new(if i < core_count { lapic_ids[i] } else { u32::MAX })
        });
        let (s5a, s5b) = board.sleep.s5_pkg.control_values();

        Ok(Self {
            board,
            records,
            core_count,
            detected_count: lapic_ids.len(),
            active: AtomicU64::new(0),
            up_count: AtomicU32::new(0),
            cycle: AtomicU32::new(0),
            sync: SyncFlag::new(crate::smp::SYNC_GO),
            trampoline: SpinLock::new(Trampoline::new(board.trampoline_start16_paddr)),
            caps: SyncOnceCell::new(),
            power_states: SyncOnceCell::new(),
            s5_control: AtomicU32::new(pack(s5a, s5b)),
        })
    }

    #[must_use]
    pub const fn board(&self) -> &BoardConfig {
        &self.board
    }

    /// Cores with a record.
    #[must_use]
    pub const fn core_count(&self) -> usize {
        self.core_count
    }

    /// Every enumerated core, including any without a record.
    #[must_use]
    pub const fn detected_count(&self) -> usize {
        self.detected_count
    }

    #[must_use]
    pub fn boot_core(&self) -> CoreId {
        CoreId::new(self.board.boot_cpu_id)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn cores(&self) -> impl Iterator<Item = CoreId> {
        (0..self.core_count).map(|i| CoreId::new(i as u16))
    }

    /// # Errors
    /// [`TransitionError::InvalidCoreId`] outside `0..core_count`.
    pub fn record(&self, core: CoreId) -> Result<&CoreRecord, TransitionError> {
        self.records[..self.core_count]
            .get(core.index())
            .ok_or(TransitionError::InvalidCoreId(core.raw()))
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn core_id_of(&self, hw_id: u32) -> Option<CoreId> {
        self.records[..self.core_count]
            .iter()
            .position(|r| r.hw_id == hw_id)
            .map(|i| CoreId::new(i as u16))
    }

    /// The calling core, as bound in `IA32_TSC_AUX` by [`bring_online`](Self::bring_online).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn current_core(&self, hw: &impl Hardware) -> Option<CoreId> {
        let raw = hw.read_msr(Msr::IA32_TSC_AUX);
        let core = CoreId::new(raw as u16);
        (raw < self.core_count as u64 && self.records[core.index()].hw_id == hw.current_apic_id())
            .then_some(core)
    }

    #[must_use]
    pub fn state(&self, core: CoreId) -> Option<LifecycleState> {
        self.record(core).ok().map(CoreRecord::state)
    }

    #[must_use]
    pub fn up_count(&self) -> u32 {
        self.up_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn active_mask(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_active(&self, core: CoreId) -> bool {
        self.active_mask() & core.bit() != 0
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn active_cores(&self) -> impl Iterator<Item = CoreId> {
        let mask = self.active_mask();
        (0..self.core_count as u16)
            .map(CoreId::new)
            .filter(move |c| mask & c.bit() != 0)
    }

    #[must_use]
    pub const fn sync(&self) -> &SyncFlag {
        &self.sync
    }

    #[must_use]
    pub const fn trampoline(&self) -> &SpinLock<Trampoline> {
        &self.trampoline
    }

    /// The leader's detection result; `None` until published.
    #[must_use]
    pub fn caps(&self) -> Option<&PlatformCapabilities> {
        self.caps.get()
    }

    /// Publishes the detected capabilities. Later calls return the first value.
    pub fn publish_caps(&self, caps: PlatformCapabilities) -> &PlatformCapabilities {
        self.caps.get_or_init(|| caps)
    }

    #[must_use]
    pub fn power_states(&self) -> Option<&CpuStateInfo> {
        self.power_states.get()
    }

    pub fn publish_power_states(&self, info: CpuStateInfo) -> &CpuStateInfo {
        self.power_states.get_or_init(|| info)
    }

    #[must_use]
    pub fn s5_control(&self) -> (u16, u16) {
        unpack(self.s5_control.load(Ordering::Acquire))
    }

    pub fn set_s5_control(&self, pm1a: u16, pm1b: u16) {
        self.s5_control.store(pack(pm1a, pm1b), Ordering::Release);
    }

    /// Current bring-up cycle; bumped by every [`begin_cycle`](Self::begin_cycle).
    #[must_use]
    pub fn cycle(&self) -> u32 {
        self.cycle.load(Ordering::Acquire)
    }

    /// Opens a new bring-up cycle: cores that went down earlier may enter
    /// `Initializing` again.
    pub fn begin_cycle(&self) -> u32 {
        self.cycle.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Binds the calling hardware thread to `core` and enters `Initializing`.
    ///
    /// # Errors
    /// Any [`transition`](Self::transition) error; the binding is not written then.
    pub fn bring_online(&self, hw: &impl Hardware, core: CoreId) -> Result<(), TransitionError> {
        let record = self.record(core)?;
        record.offline_request.store(false, Ordering::Release);
        record.mailbox.store(0, Ordering::Release);
        record.parked.store(false, Ordering::Release);
        self.transition(core, LifecycleState::Initializing)?;
        hw.write_msr(Msr::IA32_TSC_AUX, u64::from(core.raw()));
        Ok(())
    }

    /// Moves `core` to `to`, updating the bitmap and the up-count.
    ///
    /// # Errors
    /// See [`TransitionError`]; on error nothing was changed.
    pub fn transition(&self, core: CoreId, to: LifecycleState) -> Result<(), TransitionError> {
        use LifecycleState::{Dead, Init, Initializing, Running};

        let record = self.record(core)?;
        let from = record.state();
        match (from, to) {
            (Init, Initializing) => self.enter_initializing(core, record, from),
            (Dead, Initializing) => {
                if record.entered_cycle.load(Ordering::Acquire) >= self.cycle() {
                    return Err(TransitionError::NotNewCycle { core });
                }
                self.enter_initializing(core, record, from)
            }
            (Initializing, Running) => Self::swap_state(core, record, from, to),
            (Initializing | Running, Dead) => {
                self.begin_offline(core)?;
                self.finish_offline(core)
            }
            (Dead, Dead) => {
                log::warn!("{core} already dead");
                Err(TransitionError::AlreadyDead { core })
            }
            _ => Err(TransitionError::IllegalTransition { core, from, to }),
        }
    }

    fn enter_initializing(
        &self,
        core: CoreId,
        record: &CoreRecord,
        from: LifecycleState,
    ) -> Result<(), TransitionError> {
        Self::swap_state(core, record, from, LifecycleState::Initializing)?;
        record.entered_cycle.store(self.cycle(), Ordering::Release);
        self.active.fetch_or(core.bit(), Ordering::AcqRel);
        self.up_count.fetch_add(1, Ordering::AcqRel);
        log::debug!("{core} initializing");
        Ok(())
    }

    fn swap_state(
        core: CoreId,
        record: &CoreRecord,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), TransitionError> {
        record
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| log::debug!("{core} {from:?} -> {to:?}"))
            .map_err(|seen| TransitionError::IllegalTransition {
                core,
                from: LifecycleState::from_raw(seen),
                to,
            })
    }

    /// First half of going `Dead`: test-and-clear the active bit.
    ///
    /// # Errors
    /// [`TransitionError::AlreadyDead`] (logged) if the bit was already
    /// clear, [`TransitionError::IllegalTransition`] for a core that never
    /// came up.
    pub fn begin_offline(&self, core: CoreId) -> Result<(), TransitionError> {
        let record = self.record(core)?;
        let from = record.state();
        if !from.is_up() && from != LifecycleState::Dead {
            return Err(TransitionError::IllegalTransition {
                core,
                from,
                to: LifecycleState::Dead,
            });
        }
        let previous = self.active.fetch_and(!core.bit(), Ordering::AcqRel);
        if previous & core.bit() == 0 {
            log::warn!("{core} already dead");
            return Err(TransitionError::AlreadyDead { core });
        }
        Ok(())
    }

    /// Second half of going `Dead`: write the state and drop the up-count.
    ///
    /// # Errors
    /// [`TransitionError::IllegalTransition`] if the core is not up.
    pub fn finish_offline(&self, core: CoreId) -> Result<(), TransitionError> {
        let record = self.record(core)?;
        let from = record.state();
        if !from.is_up() {
            return Err(TransitionError::IllegalTransition {
                core,
                from,
                to: LifecycleState::Dead,
            });
        }
        Self::swap_state(core, record, from, LifecycleState::Dead)?;
        self.up_count.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

#[allow(clippy::cast_lossless)]
const fn pack(pm1a: u16, pm1b: u16) -> u32 {
    ((pm1a as u32) << 16) | pm1b as u32
}

#[allow(clippy::cast_possible_truncation)]
const fn unpack(v: u32) -> (u16, u16) {
    ((v >> 16) as u16, v as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::{Dead, Init, Initializing, Running};

    fn cluster(n: u32) -> ClusterState {
        let ids: Vec<u32> = (0..n).map(|i| i * 2).collect();
        ClusterState::new(BoardConfig::host(), &ids).unwrap()
    }

    #[test]
    fn enumeration_errors() {
        assert!(matches!(
            ClusterState::new(BoardConfig::host(), &[]),
            Err(BootError::NoCores)
        ));
        assert!(matches!(
            ClusterState::new(BoardConfig::host(), &[0, 4, 4]),
            Err(BootError::DuplicateHardwareId(4))
        ));
    }

    #[test]
    fn hardware_ids_map_to_dense_core_ids() {
        let c = cluster(4);
        assert_eq!(c.core_id_of(6), Some(CoreId::new(3)));
        assert_eq!(c.core_id_of(1), None);
        assert_eq!(c.core_count(), 4);
        assert_eq!(c.record(CoreId::new(2)).unwrap().hw_id(), 4);
        assert_eq!(
            c.record(CoreId::new(4)).unwrap_err(),
            TransitionError::InvalidCoreId(4)
        );
    }

    #[test]
    fn excess_cores_are_counted_but_not_recorded() {
        let ids: Vec<u32> = (0..6).collect();
        let c = ClusterState::new(BoardConfig::host().with_max_pcpus(4), &ids).unwrap();
        assert_eq!(c.core_count(), 4);
        assert_eq!(c.detected_count(), 6);
        assert_eq!(c.core_id_of(5), None);
    }

    #[test]
    fn oversized_board_limit_is_capped_at_the_record_array() {
        let board = BoardConfig {
            max_pcpus: 100,
            ..BoardConfig::host()
        };
        let ids: Vec<u32> = (0..70).collect();
        let c = ClusterState::new(board, &ids).unwrap();
        assert_eq!(c.core_count(), MAX_PCPU_NUM);
        assert_eq!(c.detected_count(), 70);
        assert_eq!(c.record(CoreId::new(0)).unwrap().hw_id(), 0);
        assert_eq!(
            c.record(CoreId::new(64)).unwrap_err(),
            TransitionError::InvalidCoreId(64)
        );
        assert_eq!(c.core_id_of(69), None);
        assert_eq!(c.cores().count(), MAX_PCPU_NUM);
    }

    #[test]
    fn full_lifecycle_moves_bit_and_count_together() {
        let c = cluster(2);
        let core = CoreId::new(1);
        c.transition(core, Initializing).unwrap();
        assert_eq!((c.up_count(), c.active_mask()), (1, 0b10));
        c.transition(core, Running).unwrap();
        assert_eq!((c.up_count(), c.active_mask()), (1, 0b10));
        c.transition(core, Dead).unwrap();
        assert_eq!((c.up_count(), c.active_mask()), (0, 0));
        assert_eq!(c.state(core), Some(Dead));
    }

    #[test]
    fn init_cannot_skip_initializing() {
        let c = cluster(1);
        let core = CoreId::new(0);
        assert_eq!(
            c.transition(core, Running),
            Err(TransitionError::IllegalTransition {
                core,
                from: Init,
                to: Running
            })
        );
        assert!(matches!(
            c.transition(core, Dead),
            Err(TransitionError::IllegalTransition { .. })
        ));
        assert_eq!(c.up_count(), 0);
    }

    #[test]
    fn double_offline_is_reported_and_harmless() {
        let c = cluster(2);
        let core = CoreId::new(1);
        c.transition(core, Initializing).unwrap();
        c.transition(core, Dead).unwrap();
        assert_eq!(c.transition(core, Dead), Err(TransitionError::AlreadyDead { core }));
        assert_eq!(c.begin_offline(core), Err(TransitionError::AlreadyDead { core }));
        assert_eq!((c.up_count(), c.active_mask()), (0, 0));
    }

    #[test]
    fn dead_core_returns_only_in_a_new_cycle() {
        let c = cluster(2);
        let core = CoreId::new(1);
        c.begin_cycle();
        c.transition(core, Initializing).unwrap();
        c.transition(core, Dead).unwrap();
        assert_eq!(
            c.transition(core, Initializing),
            Err(TransitionError::NotNewCycle { core })
        );
        c.begin_cycle();
        c.transition(core, Initializing).unwrap();
        assert_eq!(c.up_count(), 1);
    }

    #[test]
    fn s5_values_default_to_the_board_package() {
        let c = cluster(1);
        assert_eq!(c.s5_control(), BoardConfig::host().sleep.s5_pkg.control_values());
        c.set_s5_control(0x3C01, 0x2000);
        assert_eq!(c.s5_control(), (0x3C01, 0x2000));
    }

    #[test]
    fn core_id_display() {
        assert_eq!(CoreId::new(7).to_string(), "pCPU7");
        assert_eq!(CoreId::new(7).bit(), 0x80);
        assert_eq!(CoreId::new(63).bit(), 1 << 63);
        assert_eq!(CoreId::new(64).bit(), 0);
    }
}
