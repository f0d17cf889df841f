// SPDX-License-Identifier: GPL-3.0-only

//! Capacity-one slot guarding the latest processed image

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Binary semaphore around a single value
///
/// The frame path holds the slot while it replaces the value; the render path
/// holds it while reading and submitting. Neither side ever observes the value
/// mid-update.
#[derive(Debug, Default)]
pub struct FrameSlot<T> {
    value: Mutex<T>,
}

/// Exclusive access to the slot, released on drop
pub struct SlotGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> FrameSlot<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Wait until the slot is free and take it
    pub fn acquire(&self) -> SlotGuard<'_, T> {
        // A panicking holder never leaves the value half-written through this
        // API, so a poisoned lock is still usable
        SlotGuard {
            guard: self.value.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Take the slot only if nobody holds it
    pub fn try_acquire(&self) -> Option<SlotGuard<'_, T>> {
        match self.value.try_lock() {
            Ok(guard) => Some(SlotGuard { guard }),
            Err(TryLockError::Poisoned(e)) => Some(SlotGuard {
                guard: e.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl<T> FrameSlot<Option<T>> {
    /// Store `value`, returning whatever it replaced
    pub fn publish(&self, value: T) -> Option<T> {
        self.acquire().replace(value)
    }
}

impl<T> Deref for SlotGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SlotGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_replaces_previous() {
        let slot = FrameSlot::new(None);
        assert_eq!(slot.publish(1), None);
        assert_eq!(slot.publish(2), Some(1));
        assert_eq!(*slot.acquire(), Some(2));
    }

    #[test]
    fn test_try_acquire_fails_while_held() {
        let slot = FrameSlot::new(0u32);
        let held = slot.acquire();
        assert!(slot.try_acquire().is_none());
        drop(held);
        assert!(slot.try_acquire().is_some());
    }
}
