//! Counting semaphores
//!
//! Classic P/V semaphores. `down` blocks while the count is zero; `up`
//! wakes at most one waiter. Waiters are not served in any particular
//! order.

use super::error::{KResult, kstrdup};
use super::thread::in_interrupt;
use super::wchan::{Spinlock, WaitChannel};

pub struct Semaphore {
    name: String,
    count: Spinlock<u32>,
    wchan: WaitChannel,
}

impl Semaphore {
    pub fn create(name: &str, initial: u32) -> KResult<Self> {
        Ok(Self {
            name: kstrdup(name)?,
            count: Spinlock::new(initial),
            wchan: WaitChannel::create(name)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// P: wait until the count is positive, then decrement it
    pub fn down(&self) {
        crate::kassert!(
            !in_interrupt(),
            "sem {}: down called in interrupt context",
            self.name
        );

        let mut count = self.count.lock();
        while *count == 0 {
            self.wchan.sleep(count);
            count = self.count.lock();
        }
        *count -= 1;
    }

    /// V: increment the count and wake one waiter
    pub fn up(&self) {
        let mut count = self.count.lock();
        let next = count.checked_add(1);
        crate::kassert!(next.is_some(), "sem {}: count overflow", self.name);
        *count = next.unwrap_or(u32::MAX);
        self.wchan.wake_one(&count);
    }

    /// Current count (a snapshot)
    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    pub fn destroy(self) {
        crate::kassert!(
            self.wchan.is_empty(),
            "sem {}: destroyed with threads waiting",
            self.name
        );
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("name", &self.name)
            .field("count", &self.count())
            .finish()
    }
}
