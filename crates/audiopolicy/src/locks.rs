//! Ordered mutexes.
//!
//! Every shared component sits behind an `OrderedMutex` tagged with a
//! `LockLevel`. A thread may only acquire a lock whose level is strictly
//! greater than every level it already holds, so the outer-to-inner order
//! (registries, mode owners, ringer settings, stream table) can never be
//! reversed. Violations panic in debug builds.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    /// SCO requesters, safe volume guard, connected devices.
    Registry = 1,
    ModeOwners = 2,
    Ringer = 3,
    Streams = 4,
}

impl LockLevel {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

thread_local! {
    static HELD: Cell<u8> = const { Cell::new(0) };
}

fn held_mask() -> u8 {
    HELD.with(|held| held.get())
}

pub struct OrderedMutex<T> {
    level: LockLevel,
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    pub fn new(level: LockLevel, name: &'static str, value: T) -> Self {
        Self {
            level,
            name,
            inner: Mutex::new(value),
        }
    }

    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Acquire the lock. A poisoned lock is recovered; the state inside is
    /// always left consistent between statements.
    pub fn lock(&self) -> OrderedGuard<'_, T> {
        let held = held_mask();
        debug_assert!(
            held < self.level.bit(),
            "lock order violation: acquiring {} ({:?}) while holding mask {:#b}",
            self.name,
            self.level,
            held
        );
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        HELD.with(|h| h.set(held | self.level.bit()));
        OrderedGuard {
            guard,
            bit: self.level.bit(),
        }
    }
}

pub struct OrderedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    bit: u8,
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        let bit = self.bit;
        HELD.with(|h| h.set(h.get() & !bit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_in_order() {
        let outer = OrderedMutex::new(LockLevel::Ringer, "ringer", 1);
        let inner = OrderedMutex::new(LockLevel::Streams, "streams", 2);
        let a = outer.lock();
        let b = inner.lock();
        assert_eq!(*a + *b, 3);
    }

    #[test]
    fn test_release_allows_reacquire() {
        let streams = OrderedMutex::new(LockLevel::Streams, "streams", 0);
        let ringer = OrderedMutex::new(LockLevel::Ringer, "ringer", 0);
        {
            let mut s = streams.lock();
            *s += 1;
        }
        let _r = ringer.lock();
        let s = streams.lock();
        assert_eq!(*s, 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock order violation")]
    fn test_reversed_order_panics() {
        let outer = OrderedMutex::new(LockLevel::ModeOwners, "modes", ());
        let inner = OrderedMutex::new(LockLevel::Streams, "streams", ());
        let _s = inner.lock();
        let _m = outer.lock();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock order violation")]
    fn test_same_level_twice_panics() {
        let a = OrderedMutex::new(LockLevel::Registry, "sco", ());
        let b = OrderedMutex::new(LockLevel::Registry, "safe", ());
        let _a = a.lock();
        let _b = b.lock();
    }
}
