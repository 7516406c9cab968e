//! Reader-writer locks
//!
//! Any number of readers or a single writer. Once a writer is waiting, new
//! readers queue behind it so writers are not starved.

use super::cv::Cv;
use super::error::KResult;
use super::lock::Sleeplock;
use super::thread::curthread;
use std::thread::ThreadId;

#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    writer: Option<ThreadId>,
    waiting_writers: usize,
}

pub struct RwLock {
    state: Sleeplock<RwState>,
    can_read: Cv,
    can_write: Cv,
}

impl RwLock {
    pub fn create(name: &str) -> KResult<Self> {
        Ok(Self {
            state: Sleeplock::create(name, RwState::default())?,
            can_read: Cv::create(name)?,
            can_write: Cv::create(name)?,
        })
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn acquire_read(&self) {
        let mut state = self.state.lock();
        while state.writer.is_some() || state.waiting_writers > 0 {
            self.can_read.wait_guard(&mut state);
        }
        state.readers += 1;
    }

    pub fn release_read(&self) {
        let mut state = self.state.lock();
        crate::kassert!(
            state.readers > 0,
            "rwlock {}: release_read without readers",
            self.name()
        );
        state.readers -= 1;
        if state.readers == 0 {
            self.can_write.signal_guard(&state);
        }
    }

    pub fn acquire_write(&self) {
        let me = curthread();
        let mut state = self.state.lock();
        crate::kassert!(
            state.writer != Some(me),
            "rwlock {}: reentrant acquire_write",
            self.name()
        );
        state.waiting_writers += 1;
        while state.writer.is_some() || state.readers > 0 {
            self.can_write.wait_guard(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = Some(me);
    }

    pub fn release_write(&self) {
        let mut state = self.state.lock();
        crate::kassert!(
            state.writer == Some(curthread()),
            "rwlock {}: release_write by a thread that is not the writer",
            self.name()
        );
        state.writer = None;
        if state.waiting_writers > 0 {
            self.can_write.signal_guard(&state);
        } else {
            self.can_read.broadcast_guard(&state);
        }
    }

    /// Number of readers inside right now
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    pub fn destroy(self) {
        let name = self.name().to_string();
        let RwLock {
            state,
            can_read,
            can_write,
        } = self;
        let state = state.destroy();
        crate::kassert!(
            state.readers == 0 && state.writer.is_none() && state.waiting_writers == 0,
            "rwlock {}: destroyed while in use",
            name
        );
        can_read.destroy();
        can_write.destroy();
    }
}
