//! Sleeping locks
//!
//! `Lock` is a mutual-exclusion lock that puts contending threads to sleep
//! and remembers which thread holds it. It is not reentrant and only the
//! holder may release it.
//!
//! `Sleeplock<T>` pairs a `Lock` with the data it protects and releases
//! it when the guard goes out of scope.

use super::error::{KResult, kstrdup};
use super::thread::{curthread, in_interrupt};
use super::wchan::{Spinlock, WaitChannel};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::thread::ThreadId;

pub struct Lock {
    name: String,
    holder: Spinlock<Option<ThreadId>>,
    wchan: WaitChannel,
}

impl Lock {
    pub fn create(name: &str) -> KResult<Self> {
        Ok(Self {
            name: kstrdup(name)?,
            holder: Spinlock::new(None),
            wchan: WaitChannel::create(name)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn acquire(&self) {
        crate::kassert!(
            !in_interrupt(),
            "lock {}: acquire called in interrupt context",
            self.name
        );

        let me = curthread();
        let mut holder = self.holder.lock();
        crate::kassert!(
            *holder != Some(me),
            "lock {}: reentrant acquire by {:?}",
            self.name,
            me
        );
        while holder.is_some() {
            self.wchan.sleep(holder);
            holder = self.holder.lock();
        }
        *holder = Some(me);
    }

    pub fn release(&self) {
        let mut holder = self.holder.lock();
        crate::kassert!(
            *holder == Some(curthread()),
            "lock {}: released by a thread that does not hold it",
            self.name
        );
        *holder = None;
        self.wchan.wake_one(&holder);
    }

    pub fn held_by_caller(&self) -> bool {
        *self.holder.lock() == Some(curthread())
    }

    pub fn destroy(self) {
        crate::kassert!(
            self.holder.lock().is_none(),
            "lock {}: destroyed while held",
            self.name
        );
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("holder", &*self.holder.lock())
            .finish()
    }
}

/// A `Lock` that owns the data it protects
pub struct Sleeplock<T> {
    pub(super) lock: Lock,
    data: UnsafeCell<T>,
}

// Access to `data` only happens through a guard, and a guard exists only
// while `lock` is held.
unsafe impl<T: Send> Send for Sleeplock<T> {}
unsafe impl<T: Send> Sync for Sleeplock<T> {}

impl<T> Sleeplock<T> {
    pub fn create(name: &str, data: T) -> KResult<Self> {
        Ok(Self {
            lock: Lock::create(name)?,
            data: UnsafeCell::new(data),
        })
    }

    pub fn name(&self) -> &str {
        self.lock.name()
    }

    /// Acquire the lock, sleeping while another thread holds it
    pub fn lock(&self) -> SleeplockGuard<'_, T> {
        self.lock.acquire();
        SleeplockGuard {
            owner: self,
            _not_send: PhantomData,
        }
    }

    pub fn held_by_caller(&self) -> bool {
        self.lock.held_by_caller()
    }

    /// Tear down the lock and hand back the data
    pub fn destroy(self) -> T {
        let Sleeplock { lock, data } = self;
        lock.destroy();
        data.into_inner()
    }
}

pub struct SleeplockGuard<'a, T> {
    pub(super) owner: &'a Sleeplock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for SleeplockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held by this thread.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T> DerefMut for SleeplockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` makes the borrow unique.
        unsafe { &mut *self.owner.data.get() }
    }
}

impl<T> Drop for SleeplockGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.lock.release();
    }
}
