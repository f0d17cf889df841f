// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the latest-image slot under contention

use filtercam::pipelines::preview::FrameSlot;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[test]
fn test_readers_never_observe_partial_writes() {
    let slot = Arc::new(FrameSlot::new(vec![0u64; 4096]));
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (1..=2u64)
        .map(|id| {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for round in 0..500u64 {
                    let value = id * 1_000_000 + round;
                    let mut guard = slot.acquire();
                    for element in guard.iter_mut() {
                        *element = value;
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let slot = Arc::clone(&slot);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut checks = 0u64;
                while !done.load(Ordering::Acquire) {
                    let guard = slot.acquire();
                    let first = guard[0];
                    assert!(guard.iter().all(|v| *v == first), "torn read");
                    checks += 1;
                }
                checks
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    let last = slot.acquire()[0];
    assert!(last == 1_000_499 || last == 2_000_499);
}

#[test]
fn test_publish_replaces_previous_value() {
    let slot: FrameSlot<Option<u32>> = FrameSlot::default();

    assert_eq!(slot.publish(1), None);
    assert_eq!(slot.publish(2), Some(1));
    assert_eq!(*slot.acquire(), Some(2));
}

#[test]
fn test_try_acquire_fails_while_held() {
    let slot = FrameSlot::new(0u8);
    let guard = slot.acquire();
    assert!(slot.try_acquire().is_none());
    drop(guard);
    assert!(slot.try_acquire().is_some());
}
