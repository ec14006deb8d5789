use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const PUBLISHED: u8 = 2;

/// Write-once slot for data the boot core computes before any follower
/// starts and everybody reads afterwards.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns the published value, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == PUBLISHED {
            // SAFETY: PUBLISHED is stored only after the write completed.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Publishes `value` unless something was published (or is being
    /// published) already, in which case `value` is handed back.
    ///
    /// # Errors
    /// Returns `Err(value)` if the cell was not empty.
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        Ok(self.publish(value))
    }

    /// Initializes at most once and returns the published value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }

        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return self.publish(init());
        }

        while self.state.load(Ordering::Acquire) != PUBLISHED {
            spin_loop();
        }
        // SAFETY: PUBLISHED
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// Caller must have moved the state to WRITING.
    fn publish(&self, value: T) -> &T {
        // SAFETY: the WRITING state makes us the only writer.
        let v: &T = unsafe { (*self.value.get()).write(value) };
        self.state.store(PUBLISHED, Ordering::Release);
        v
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == PUBLISHED {
            // SAFETY: published values are initialized and dropped once.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

// Safety: shared after PUBLISHED; initialization is single-writer.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_set_is_rejected() {
        let cell = SyncOnceCell::new();
        assert!(cell.get().is_none());
        assert_eq!(cell.set(1u32), Ok(&1));
        assert_eq!(cell.set(2u32), Err(2));
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn get_or_init_runs_once() {
        let cell = SyncOnceCell::new();
        let mut calls = 0;
        let a = *cell.get_or_init(|| {
            calls += 1;
            5u8
        });
        let b = *cell.get_or_init(|| 6u8);
        assert_eq!((a, b, calls), (5, 5, 1));
    }

    #[test]
    fn published_value_is_dropped() {
        use std::rc::Rc;
        let token = Rc::new(());
        {
            let cell = SyncOnceCell::new();
            let _ = cell.set(Rc::clone(&token));
            assert_eq!(Rc::strong_count(&token), 2);
        }
        assert_eq!(Rc::strong_count(&token), 1);
    }
}
