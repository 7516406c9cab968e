//! The process table
//!
//! Maps pids to processes. Slot 0 is never used and slot 1 always holds the
//! kernel process. Freed pids go back into the pool and the next `add`
//! picks the lowest one.

use super::error::{KResult, KernelError};
use super::lock::Sleeplock;
use super::process::{Pid, Process};
use super::slots::SlotVec;
use std::sync::Arc;

/// First pid `add` considers
const FIRST_PID: usize = 1;

pub struct ProcessTable {
    slots: Sleeplock<SlotVec<Arc<Process>>>,
    limit: usize,
}

impl ProcessTable {
    /// Create the table with `kproc` installed as pid 1
    pub fn new(kproc: Arc<Process>, capacity: usize, limit: usize) -> KResult<Self> {
        let mut slots = SlotVec::with_capacity(capacity)?;
        slots.set(Pid::KERNEL.index(), Arc::clone(&kproc))?;
        kproc.set_pid(Pid::KERNEL);
        Ok(Self {
            slots: Sleeplock::create("proctable", slots)?,
            limit,
        })
    }

    /// Give `proc` the lowest free pid
    pub fn add(&self, proc: &Arc<Process>) -> KResult<Pid> {
        let mut slots = self.slots.lock();
        let index = slots.first_free_from(FIRST_PID);
        if index >= self.limit {
            return Err(KernelError::TooManyProcesses);
        }
        let previous_capacity = slots.capacity();
        match slots.set(index, Arc::clone(proc)) {
            Ok(_) => {}
            Err(KernelError::OutOfMemory) => return Err(KernelError::TooManyProcesses),
            Err(e) => return Err(e),
        }
        if slots.capacity() != previous_capacity {
            log::debug!(
                "process table grew {} -> {}",
                previous_capacity,
                slots.capacity()
            );
        }

        let pid = Pid(index as u32);
        proc.set_pid(pid);
        log::trace!("{} assigned to {}", pid, proc.name());
        Ok(pid)
    }

    /// Free the pid of `proc`. The slot is only cleared while it still
    /// holds `proc`; a pid that has been handed to another process is left
    /// alone. The kernel process is never removed.
    pub fn remove(&self, proc: &Arc<Process>) -> Option<Arc<Process>> {
        let pid = proc.pid();
        crate::kassert!(pid != Pid::KERNEL, "attempt to remove the kernel process");
        let mut slots = self.slots.lock();
        match slots.get(pid.index()) {
            Some(current) if Arc::ptr_eq(current, proc) => slots.take(pid.index()),
            _ => None,
        }
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.slots.lock().get(pid.index()).cloned()
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().capacity()
    }

    /// Number of live processes, the kernel process included
    pub fn len(&self) -> usize {
        self.slots.lock().occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.slots
            .lock()
            .iter_occupied()
            .map(|(index, _)| Pid(index as u32))
            .collect()
    }
}
