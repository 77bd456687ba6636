//! Blocking primitives shared by the bridge and its worker threads.

use log::warn;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Semaphore holding at most one permit.
///
/// `release` on an already released semaphore is absorbed, so the permit
/// count never exceeds one.
pub struct BinarySemaphore {
    permit: Mutex<bool>,
    cvar: Condvar,
}

impl BinarySemaphore {
    pub const fn new() -> Self {
        Self {
            permit: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Make the permit available and wake one waiter.
    pub fn release(&self) {
        let mut permit = lock(&self.permit);
        *permit = true;
        self.cvar.notify_one();
    }

    /// Block until the permit is available, then take it.
    pub fn acquire(&self) {
        let permit = lock(&self.permit);
        let mut permit = self
            .cvar
            .wait_while(permit, |available| !*available)
            .unwrap_or_else(PoisonError::into_inner);
        *permit = false;
    }

    /// Block for at most `timeout`. Returns `true` if the permit was taken.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let permit = lock(&self.permit);
        let (mut permit, _) = self
            .cvar
            .wait_timeout_while(permit, timeout, |available| !*available)
            .unwrap_or_else(PoisonError::into_inner);

        if !*permit {
            return false;
        }
        *permit = false;
        true
    }

    /// Take the permit if it is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        std::mem::replace(&mut *lock(&self.permit), false)
    }
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellable sleep used by the worker loops between polls.
pub struct WakeSignal {
    woken: Mutex<bool>,
    cvar: Condvar,
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            woken: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Wake every thread sleeping in `wait_timeout`.
    pub fn signal(&self) {
        *lock(&self.woken) = true;
        self.cvar.notify_all();
    }

    /// Sleep until signalled or until `timeout` elapses.
    /// Returns `true` when woken by a signal. The signal is consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let woken = lock(&self.woken);
        let (mut woken, _) = self
            .cvar
            .wait_timeout_while(woken, timeout, |flag| !*flag)
            .unwrap_or_else(PoisonError::into_inner);

        std::mem::replace(&mut *woken, false)
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot latch: once opened it stays open.
pub struct Latch {
    opened: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    pub const fn new() -> Self {
        Self {
            opened: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *lock(&self.opened) = true;
        self.cvar.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *lock(&self.opened)
    }

    /// Wait until the latch opens. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let opened = lock(&self.opened);
        match timeout {
            Some(timeout) => {
                let (opened, _) = self
                    .cvar
                    .wait_timeout_while(opened, timeout, |flag| !*flag)
                    .unwrap_or_else(PoisonError::into_inner);
                *opened
            }
            None => *self
                .cvar
                .wait_while(opened, |flag| !*flag)
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens the wrapped latch when dropped, including during a panic unwind.
pub(crate) struct OpenOnDrop<'a>(pub &'a Latch);

impl Drop for OpenOnDrop<'_> {
    fn drop(&mut self) {
        self.0.open();
    }
}

/// Wait up to `grace` for a worker to signal its exit, then join it.
/// A worker that does not stop in time is detached and `false` is returned.
pub(crate) fn join_with_grace(
    handle: JoinHandle<()>,
    exited: &Latch,
    grace: Duration,
    tag: &str,
) -> bool {
    if exited.wait(Some(grace)) || handle.is_finished() {
        if handle.join().is_err() {
            warn!("[{}] Worker thread panicked", tag);
        }
        true
    } else {
        warn!(
            "[{}] Worker did not stop within {:?} - detaching thread",
            tag, grace
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_semaphore_release_before_acquire() {
        let semaphore = BinarySemaphore::new();
        semaphore.release();
        semaphore.release();
        assert!(semaphore.acquire_timeout(Duration::from_millis(10)));
        // Second release was absorbed.
        assert!(!semaphore.try_acquire());
    }

    #[test]
    fn test_semaphore_timeout_without_permit() {
        let semaphore = BinarySemaphore::new();
        let start = Instant::now();
        assert!(!semaphore.acquire_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_semaphore_wakes_blocked_thread() {
        let semaphore = Arc::new(BinarySemaphore::new());
        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || semaphore.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        semaphore.release();
        waiter.join().unwrap();
        assert!(!semaphore.try_acquire());
    }

    #[test]
    fn test_wake_signal_cuts_sleep_short() {
        let signal = Arc::new(WakeSignal::new());
        let sleeper = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let woken = signal.wait_timeout(Duration::from_secs(5));
                (woken, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        signal.signal();
        let (woken, elapsed) = sleeper.join().unwrap();
        assert!(woken);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_signal_times_out() {
        let signal = WakeSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_latch_stays_open() {
        let latch = Latch::new();
        assert!(!latch.wait(Some(Duration::from_millis(5))));
        latch.open();
        assert!(latch.wait(Some(Duration::from_millis(5))));
        assert!(latch.wait(None));
        assert!(latch.is_open());
    }

    #[test]
    fn test_join_with_grace_detaches_stuck_worker() {
        let latch = Latch::new();
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(300)));
        assert!(!join_with_grace(
            handle,
            &latch,
            Duration::from_millis(10),
            "TEST"
        ));
    }

    #[test]
    fn test_join_with_grace_joins_finished_worker() {
        let latch = Arc::new(Latch::new());
        let handle = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || {
                let _exit = OpenOnDrop(&latch);
            })
        };
        assert!(join_with_grace(handle, &latch, Duration::from_secs(1), "TEST"));
    }
}
