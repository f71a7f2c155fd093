//! A small reusable, reopenable latch used to park/unpark threads that are
//! waiting for "something changed" signals: the orchestrator waiting for
//! window capacity to free up, and workers waiting for their kind's ready
//! queue to become non-empty.
//!
//! Modeled on `scheduler::sync::simple_latch::Latch`, but built on
//! [`std::thread::park`]/[`std::thread::Thread::unpark`] plus a generation
//! counter instead of a raw Linux `futex(2)` syscall. The teacher reaches
//! for `libc`/`nix` here because its scheduler must avoid any allocation or
//! libc dependency surprises on a simulation hot path shared with C code;
//! this runtime has no such constraint, and park/unpark gives the same
//! "block until woken, no missed wakeup" guarantee without the extra
//! platform-specific dependency.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::Thread;

/// The open side of a latch. Opening wakes every registered waiter.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<Inner>,
}

struct Inner {
    generation: AtomicU32,
    waiters: std::sync::Mutex<Vec<Thread>>,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                generation: AtomicU32::new(0),
                waiters: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a new waiter bound to the latch's current generation: the next
    /// [`LatchWaiter::wait`] call blocks until the next [`Latch::open`].
    pub fn waiter(&self) -> LatchWaiter {
        LatchWaiter {
            gen: self.inner.generation.load(Ordering::Acquire),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Open the latch, waking every thread currently parked in `wait()`.
    pub fn open(&self) {
        self.inner.generation.fetch_add(1, Ordering::Release);
        let waiters = self.inner.waiters.lock().unwrap();
        for t in waiters.iter() {
            t.unpark();
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// A waiter for a [`Latch`]. Each waiter tracks its own generation so it can
/// tell an already-open latch from one it still needs to wait on.
pub struct LatchWaiter {
    gen: u32,
    inner: Arc<Inner>,
}

impl LatchWaiter {
    /// Block until the latch is opened at least once past this waiter's
    /// current generation, or until `timeout` elapses. Returns `true` if the
    /// latch opened, `false` on timeout.
    pub fn wait_timeout(&mut self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        {
            let mut waiters = self.inner.waiters.lock().unwrap();
            waiters.push(std::thread::current());
        }
        let opened = loop {
            let current_gen = self.inner.generation.load(Ordering::Acquire);
            if current_gen != self.gen {
                break true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                break false;
            }
            std::thread::park_timeout(deadline - now);
        };
        self.unregister();
        if opened {
            self.gen = self.inner.generation.load(Ordering::Acquire);
        }
        opened
    }

    fn unregister(&self) {
        let mut waiters = self.inner.waiters.lock().unwrap();
        if let Some(pos) = waiters.iter().position(|t| t.id() == std::thread::current().id()) {
            waiters.swap_remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn open_before_wait_is_observed() {
        let latch = Latch::new();
        let mut waiter = latch.waiter();
        latch.open();
        assert!(waiter.wait_timeout(Duration::from_millis(50)));
    }

    #[test]
    fn timeout_without_open() {
        let latch = Latch::new();
        let mut waiter = latch.waiter();
        assert!(!waiter.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn cross_thread_wakeup() {
        let latch = Latch::new();
        let mut waiter = latch.waiter();
        let latch_clone = latch.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            latch_clone.open();
        });
        let start = std::time::Instant::now();
        assert!(waiter.wait_timeout(Duration::from_secs(2)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }
}
