//! Condition variables
//!
//! Mesa semantics: `wait` gives up the lock and sleeps, `signal` and
//! `broadcast` only make waiters runnable. A woken waiter reacquires the
//! lock before returning and must recheck its condition.

use super::error::{KResult, kstrdup};
use super::lock::{Lock, SleeplockGuard};
use super::thread::in_interrupt;
use super::wchan::{Spinlock, WaitChannel};

pub struct Cv {
    name: String,
    // Held from before the lock is released until the waiter is queued,
    // so a signal cannot slip in between.
    splock: Spinlock<()>,
    wchan: WaitChannel,
}

impl Cv {
    pub fn create(name: &str) -> KResult<Self> {
        Ok(Self {
            name: kstrdup(name)?,
            splock: Spinlock::new(()),
            wchan: WaitChannel::create(name)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release `lock`, sleep until signalled, then reacquire `lock`.
    pub fn wait(&self, lock: &Lock) {
        crate::kassert!(
            !in_interrupt(),
            "cv {}: wait called in interrupt context",
            self.name
        );
        crate::kassert!(
            lock.held_by_caller(),
            "cv {}: wait without holding lock {}",
            self.name,
            lock.name()
        );

        let queued = self.splock.lock();
        lock.release();
        self.wchan.sleep(queued);
        lock.acquire();
    }

    /// Wake one waiter
    pub fn signal(&self, lock: &Lock) {
        self.check_held(lock, "signal");
        let guard = self.splock.lock();
        self.wchan.wake_one(&guard);
    }

    /// Wake every waiter
    pub fn broadcast(&self, lock: &Lock) {
        self.check_held(lock, "broadcast");
        let guard = self.splock.lock();
        self.wchan.wake_all(&guard);
    }

    /// `wait` on the lock behind a `Sleeplock` guard. The guard's data must
    /// be re-read after this returns.
    pub fn wait_guard<T>(&self, guard: &mut SleeplockGuard<'_, T>) {
        self.wait(&guard.owner.lock);
    }

    pub fn signal_guard<T>(&self, guard: &SleeplockGuard<'_, T>) {
        self.signal(&guard.owner.lock);
    }

    pub fn broadcast_guard<T>(&self, guard: &SleeplockGuard<'_, T>) {
        self.broadcast(&guard.owner.lock);
    }

    fn check_held(&self, lock: &Lock, op: &str) {
        crate::kassert!(
            lock.held_by_caller(),
            "cv {}: {} without holding lock {}",
            self.name,
            op,
            lock.name()
        );
    }

    pub fn destroy(self) {
        crate::kassert!(
            self.wchan.is_empty(),
            "cv {}: destroyed with threads waiting",
            self.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::lock::Sleeplock;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    #[should_panic(expected = "wait without holding lock")]
    fn test_wait_without_lock_is_fatal() {
        let lock = Lock::create("cvlock").unwrap();
        let cv = Cv::create("cv").unwrap();
        cv.wait(&lock);
    }

    #[test]
    #[should_panic(expected = "signal without holding lock")]
    fn test_signal_without_lock_is_fatal() {
        let lock = Lock::create("cvlock").unwrap();
        let cv = Cv::create("cv").unwrap();
        cv.signal(&lock);
    }

    #[test]
    #[should_panic(expected = "broadcast without holding lock")]
    fn test_broadcast_without_lock_is_fatal() {
        let lock = Lock::create("cvlock").unwrap();
        let cv = Cv::create("cv").unwrap();
        cv.broadcast(&lock);
    }

    #[test]
    fn test_signal_with_no_waiters_is_lost() {
        let lock = Lock::create("lost").unwrap();
        let cv = Cv::create("lost").unwrap();
        lock.acquire();
        cv.signal(&lock);
        cv.broadcast(&lock);
        lock.release();
        cv.destroy();
        lock.destroy();
    }

    #[test]
    fn test_wait_reacquires_lock() {
        let shared = Arc::new((Sleeplock::create("flag", false).unwrap(), Cv::create("flag").unwrap()));

        let waiter = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let (flag, cv) = &*shared;
                let mut ready = flag.lock();
                while !*ready {
                    cv.wait_guard(&mut ready);
                }
                flag.held_by_caller()
            })
        };

        std::thread::sleep(Duration::from_millis(10));
        {
            let (flag, cv) = &*shared;
            let mut ready = flag.lock();
            *ready = true;
            cv.signal_guard(&ready);
        }
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_broadcast_wakes_all() {
        const THREADS: usize = 6;
        let shared = Arc::new((
            Sleeplock::create("gate", (false, 0usize)).unwrap(),
            Cv::create("gate").unwrap(),
        ));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    let (gate, cv) = &*shared;
                    let mut state = gate.lock();
                    while !state.0 {
                        cv.wait_guard(&mut state);
                    }
                    state.1 += 1;
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(10));
        {
            let (gate, cv) = &*shared;
            let mut state = gate.lock();
            state.0 = true;
            cv.broadcast_guard(&state);
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.0.lock().1, THREADS);
    }
}
