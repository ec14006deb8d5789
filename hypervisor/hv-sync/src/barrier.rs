use core::{
    hint::spin_loop,
    sync::atomic::{AtomicU64, Ordering},
};

/// How a core passes time while a [`SyncFlag`] has not reached its target.
///
/// Implementations may return spuriously; callers always re-check the word.
pub trait WaitStrategy {
    /// Waits until `word` may no longer hold `seen`.
    fn wait_for_change(&self, word: &AtomicU64, seen: u64);
}

/// Plain re-read loop with a `pause` hint between iterations.
#[derive(Debug, Default, Copy, Clone)]
pub struct PauseSpin;

impl WaitStrategy for PauseSpin {
    #[inline]
    fn wait_for_change(&self, _word: &AtomicU64, _seen: u64) {
        spin_loop();
    }
}

/// Arms `MONITOR` on the flag's cache line and sleeps in `MWAIT` until it is
/// written.
///
/// Only valid when CPUID advertises MONITOR/MWAIT and the part has no known
/// erratum for it; the capability detector decides that. Both instructions
/// fault outside ring 0, so hosted builds fall back to [`PauseSpin`].
#[cfg(all(feature = "asm", target_arch = "x86_64", target_os = "none"))]
#[derive(Debug, Default, Copy, Clone)]
pub struct MonitorMwait;

#[cfg(all(feature = "asm", target_arch = "x86_64", target_os = "none"))]
impl WaitStrategy for MonitorMwait {
    #[inline]
    fn wait_for_change(&self, word: &AtomicU64, seen: u64) {
        let addr = word.as_ptr();
        unsafe {
            core::arch::asm!(
                "monitor",
                in("rax") addr,
                in("ecx") 0u32,
                in("edx") 0u32,
                options(nostack, preserves_flags)
            );
        }
        // A write between the caller's load and MONITOR would otherwise be missed.
        if word.load(Ordering::Acquire) != seen {
            return;
        }
        unsafe {
            core::arch::asm!(
                "mwait",
                in("eax") 0u32,
                in("ecx") 0u32,
                options(nostack, preserves_flags)
            );
        }
    }
}

/// The strategy picked once at boot from the detected capabilities.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AdaptiveWait {
    /// Hardware-assisted wait-for-write.
    MonitorMwait,
    /// Pipeline relax hint only.
    Pause,
}

impl AdaptiveWait {
    #[must_use]
    pub const fn select(monitor_usable: bool) -> Self {
        if monitor_usable {
            Self::MonitorMwait
        } else {
            Self::Pause
        }
    }
}

impl WaitStrategy for AdaptiveWait {
    #[inline]
    fn wait_for_change(&self, word: &AtomicU64, seen: u64) {
        match self {
            #[cfg(all(feature = "asm", target_arch = "x86_64", target_os = "none"))]
            Self::MonitorMwait => MonitorMwait.wait_for_change(word, seen),
            #[cfg(not(all(feature = "asm", target_arch = "x86_64", target_os = "none")))]
            Self::MonitorMwait => PauseSpin.wait_for_change(word, seen),
            Self::Pause => PauseSpin.wait_for_change(word, seen),
        }
    }
}

/// A shared 64-bit rendezvous word.
///
/// The leader [`release`](Self::release)s a value with a single store;
/// every follower spinning in [`wait_until`](Self::wait_until) observes it
/// without any further signal.
#[derive(Debug, Default)]
pub struct SyncFlag {
    word: AtomicU64,
}

impl SyncFlag {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self {
            word: AtomicU64::new(value),
        }
    }

    #[inline]
    #[must_use]
    pub fn load(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }

    /// Publishes `value` to every waiter.
    #[inline]
    pub fn release(&self, value: u64) {
        self.word.store(value, Ordering::Release);
    }

    /// Busy-waits until the flag equals `target`.
    pub fn wait_until(&self, target: u64, strategy: &impl WaitStrategy) {
        loop {
            let seen = self.word.load(Ordering::Acquire);
            if seen == target {
                return;
            }
            strategy.wait_for_change(&self.word, seen);
        }
    }

    /// Address of the underlying word.
    #[inline]
    #[must_use]
    pub const fn as_atomic(&self) -> &AtomicU64 {
        &self.word
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_immediately_when_already_at_target() {
        let flag = SyncFlag::new(7);
        flag.wait_until(7, &PauseSpin);
        assert_eq!(flag.load(), 7);
    }

    #[test]
    fn selection_follows_capability() {
        assert_eq!(AdaptiveWait::select(true), AdaptiveWait::MonitorMwait);
        assert_eq!(AdaptiveWait::select(false), AdaptiveWait::Pause);
    }

    #[test]
    fn custom_strategy_sees_every_spurious_wake() {
        use core::cell::Cell;

        // Stores the target on its third invocation.
        struct Countdown<'a> {
            calls: Cell<u32>,
            flag: &'a SyncFlag,
        }
        impl WaitStrategy for Countdown<'_> {
            fn wait_for_change(&self, _word: &AtomicU64, _seen: u64) {
                self.calls.set(self.calls.get() + 1);
                if self.calls.get() == 3 {
                    self.flag.release(1);
                }
            }
        }

        let flag = SyncFlag::new(0);
        let strategy = Countdown {
            calls: Cell::new(0),
            flag: &flag,
        };
        flag.wait_until(1, &strategy);
        assert_eq!(strategy.calls.get(), 3);
    }
}
