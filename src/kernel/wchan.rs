//! Wait channels
//!
//! A wait channel is the queue a thread parks on while it waits for some
//! condition guarded by a spinlock. Going to sleep releases the spinlock;
//! nothing can wake the sleeper between the release and the sleep.

use super::error::{KResult, kstrdup};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// The spinlock that guards the condition a wait channel waits for
pub type Spinlock<T> = spin::Mutex<T>;
pub type SpinlockGuard<'a, T> = spin::MutexGuard<'a, T>;

struct WaitState {
    next_ticket: u64,
    sleepers: VecDeque<u64>,
}

pub struct WaitChannel {
    name: String,
    state: Mutex<WaitState>,
    wakeup: Condvar,
}

impl WaitChannel {
    pub fn create(name: &str) -> KResult<Self> {
        Ok(Self {
            name: kstrdup(name)?,
            state: Mutex::new(WaitState {
                next_ticket: 0,
                sleepers: VecDeque::new(),
            }),
            wakeup: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release `held` and sleep until woken.
    ///
    /// The caller re-takes the spinlock itself and rechecks its condition.
    pub fn sleep<T>(&self, held: SpinlockGuard<'_, T>) {
        let mut state = self.state();
        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.sleepers.push_back(ticket);
        drop(held);

        while state.sleepers.contains(&ticket) {
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wake one sleeper, if any. The spinlock guarding the condition must
    /// be held.
    pub fn wake_one<T>(&self, _held: &SpinlockGuard<'_, T>) {
        let mut state = self.state();
        if state.sleepers.pop_front().is_some() {
            self.wakeup.notify_all();
        }
    }

    /// Wake every sleeper
    pub fn wake_all<T>(&self, _held: &SpinlockGuard<'_, T>) {
        let mut state = self.state();
        if !state.sleepers.is_empty() {
            state.sleepers.clear();
            self.wakeup.notify_all();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state().sleepers.is_empty()
    }

    /// Number of threads currently asleep on this channel
    pub fn waiters(&self) -> usize {
        self.state().sleepers.len()
    }
}

impl std::fmt::Debug for WaitChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitChannel")
            .field("name", &self.name)
            .field("waiters", &self.waiters())
            .finish()
    }
}
