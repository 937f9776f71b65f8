//! Test-and-set spinlock backing the cuckoo table's two-lock inserts.
//!
//! Follows the exchange-then-relaxed-spin scheme from
//! <https://rigtorp.se/spinlock/>: the fast path is a single exchange, and
//! the contended wait loop issues relaxed loads with a CPU relax hint so it
//! spins on a shared cache line instead of bouncing it.

use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

pub(crate) struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub(crate) const fn new() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) -> SpinGuard<'_> {
        loop {
            // Optimistically assume the lock is free on the first try.
            if !self.locked.swap(true, Ordering::Acquire) {
                return SpinGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }
}

pub(crate) struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn lock_serializes_writers() {
        let lock = SpinLock::new();
        let counter = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10_000 {
                        let _guard = lock.lock();
                        // Relaxed is fine: the guard orders the accesses.
                        let old = counter.load(Ordering::Relaxed);
                        counter.store(old + 1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(counter.load(Ordering::Relaxed), 40_000);
    }
}
