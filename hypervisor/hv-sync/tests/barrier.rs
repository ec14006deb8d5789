use hv_sync::{AdaptiveWait, PauseSpin, SyncFlag};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const HOLD: u64 = 1;
const GO: u64 = 0;

#[test]
fn every_follower_observes_the_release() {
    let followers = 3;
    let flag = Arc::new(SyncFlag::new(HOLD));
    let parked = Arc::new(Barrier::new(followers + 1));
    let passed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..followers)
        .map(|_| {
            let flag = Arc::clone(&flag);
            let parked = Arc::clone(&parked);
            let passed = Arc::clone(&passed);
            thread::spawn(move || {
                parked.wait();
                flag.wait_until(GO, &PauseSpin);
                passed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    parked.wait();
    // Nobody passes while the flag is held.
    thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(passed.load(Ordering::SeqCst), 0);

    flag.release(GO);
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(passed.load(Ordering::SeqCst), followers);
}

#[test]
fn adaptive_strategy_is_interchangeable() {
    for strategy in [AdaptiveWait::select(true), AdaptiveWait::select(false)] {
        let flag = Arc::new(SyncFlag::new(HOLD));
        let waiter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || flag.wait_until(0xDEAD, &strategy))
        };
        flag.release(0xDEAD);
        waiter.join().unwrap();
        assert_eq!(flag.load(), 0xDEAD);
    }
}

#[test]
fn data_written_before_release_is_visible_after() {
    let flag = Arc::new(SyncFlag::new(HOLD));
    let payload = Arc::new(AtomicUsize::new(0));

    let reader = {
        let flag = Arc::clone(&flag);
        let payload = Arc::clone(&payload);
        thread::spawn(move || {
            flag.wait_until(GO, &PauseSpin);
            payload.load(Ordering::Relaxed)
        })
    };

    payload.store(42, Ordering::Relaxed);
    flag.release(GO);
    assert_eq!(reader.join().unwrap(), 42);
}
