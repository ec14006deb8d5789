//! # Hypervisor debug console
//!
//! Byte-at-a-time output to the I/O debug port (`0x402`, QEMU/Bochs
//! `-debugcon`), usable from the first instruction of the boot core. The
//! [`ConsoleLogger`] routes the `log` facade there; [`hv_trace!`] bypasses
//! the facade entirely. Both hold the console spin lock for a whole
//! message, so lines from different cores do not interleave.
//!
//! The console is one of the subsystems quiesced around S3: while
//! [`suspend`]ed every message is dropped, and [`resume`] is called last on the
//! way back, after the TSC has been restored.
//!
//! Port I/O only happens on bare-metal targets with the `enabled` feature;
//! hosted builds compile the same code paths with a no-op sink.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{ConsoleLogger, write_record};

use core::sync::atomic::{AtomicBool, Ordering};

static SUSPENDED: AtomicBool = AtomicBool::new(false);

/// Drops all console output until [`resume`].
pub fn suspend() {
    SUSPENDED.store(true, Ordering::Release);
}

pub fn resume() {
    SUSPENDED.store(false, Ordering::Release);
}

#[must_use]
pub fn is_suspended() -> bool {
    SUSPENDED.load(Ordering::Acquire)
}

#[doc(hidden)]
pub mod sink {
    use core::fmt::{self, Write};
    use hv_sync::SpinLock;

    /// Debug console port.
    pub const DEBUG_PORT: u16 = 0x402;

    /// Held for a whole message so lines from different cores never interleave.
    static CONSOLE: SpinLock<ConsoleSink> = SpinLock::new(ConsoleSink);

    #[cfg(test)]
    static CAPTURED: std::sync::Mutex<Vec<u8>> = std::sync::Mutex::new(Vec::new());

    #[inline]
    fn putc(c: u8) {
        #[cfg(all(feature = "enabled", target_arch = "x86_64", target_os = "none"))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(test)]
        CAPTURED
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(c);
        #[cfg(not(any(
            test,
            all(feature = "enabled", target_arch = "x86_64", target_os = "none")
        )))]
        let _ = c;
    }

    pub struct ConsoleSink;

    impl Write for ConsoleSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(putc);
            Ok(())
        }
    }

    /// Runs `f` with exclusive use of the console. Nothing is written while
    /// the console is suspended.
    pub fn with_console(f: impl FnOnce(&mut ConsoleSink) -> fmt::Result) {
        if super::is_suspended() {
            return;
        }
        // Best effort; nothing to report a console failure to.
        let _ = CONSOLE.with_lock(f);
    }

    #[inline]
    pub fn write(args: fmt::Arguments) {
        with_console(|out| out.write_fmt(args));
    }

    #[cfg(test)]
    pub(crate) fn captured() -> Vec<u8> {
        CAPTURED
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// Formats straight onto the debug port, skipping the `log` facade.
#[macro_export]
macro_rules! hv_trace {
    ($($arg:tt)*) => {{
        $crate::sink::write(core::format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspend_and_resume_toggle_the_sink() {
        suspend();
        assert!(is_suspended());
        hv_trace!("dropped {}\n", 1);
        resume();
        assert!(!is_suspended());
        assert!(!String::from_utf8_lossy(&sink::captured()).contains("dropped"));
    }

    #[test]
    fn concurrent_writers_keep_their_lines_whole() {
        let tail = "x".repeat(40);
        std::thread::scope(|s| {
            for core in 0..8 {
                let tail = &tail;
                s.spawn(move || {
                    for i in 0..50 {
                        hv_trace!("pCPU{core} line {i} {tail}\n");
                    }
                });
            }
        });

        let text = String::from_utf8(sink::captured()).unwrap();
        for line in text.lines() {
            assert!(line.starts_with("pCPU"), "{line:?}");
            assert!(line.ends_with(tail.as_str()), "{line:?}");
            assert_eq!(line.matches("pCPU").count(), 1, "{line:?}");
        }
    }
}
