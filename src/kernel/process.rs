//! Process abstraction
//!
//! A process owns a descriptor table, an address space and a working
//! directory, and has some number of threads running on its behalf. The
//! descriptor table is guarded by the process lock; everything else has
//! its own small lock.

use super::addrspace::AddressSpace;
use super::error::{KResult, kstrdup};
use super::fdtable::FdTable;
use super::lock::{Sleeplock, SleeplockGuard};
use super::wchan::Spinlock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    /// Never assigned
    pub const INVALID: Pid = Pid(0);
    /// The kernel process
    pub const KERNEL: Pid = Pid(1);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// A process in the system
pub struct Process {
    pid: AtomicU32,
    name: String,
    files: Sleeplock<FdTable>,
    addrspace: Spinlock<Option<Box<dyn AddressSpace>>>,
    cwd: Spinlock<PathBuf>,
    threads: AtomicUsize,
    destroyed: AtomicBool,
}

impl Process {
    /// A process with an empty descriptor table of the given capacity.
    /// It has no pid until the process table assigns one.
    pub fn new(name: &str, fd_capacity: usize, fd_limit: usize) -> KResult<Self> {
        Self::with_table(name, FdTable::with_capacity(fd_capacity, fd_limit)?)
    }

    pub(super) fn with_table(name: &str, table: FdTable) -> KResult<Self> {
        let name = kstrdup(name)?;
        let files = Sleeplock::create(&name, table)?;
        Ok(Self {
            pid: AtomicU32::new(Pid::INVALID.0),
            name,
            files,
            addrspace: Spinlock::new(None),
            cwd: Spinlock::new(PathBuf::from("/")),
            threads: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> Pid {
        Pid(self.pid.load(Ordering::Acquire))
    }

    pub(super) fn set_pid(&self, pid: Pid) {
        self.pid.store(pid.0, Ordering::Release);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock the process and get at its descriptor table
    pub fn files(&self) -> SleeplockGuard<'_, FdTable> {
        self.files.lock()
    }

    /// Install an address space, returning the one it replaces
    pub fn set_addrspace(
        &self,
        space: Option<Box<dyn AddressSpace>>,
    ) -> Option<Box<dyn AddressSpace>> {
        std::mem::replace(&mut *self.addrspace.lock(), space)
    }

    pub fn has_addrspace(&self) -> bool {
        self.addrspace.lock().is_some()
    }

    /// Run `f` against the address space, if there is one
    pub fn with_addrspace<R>(&self, f: impl FnOnce(&mut dyn AddressSpace) -> R) -> Option<R> {
        let mut guard = self.addrspace.lock();
        match guard.as_deref_mut() {
            Some(space) => Some(f(space)),
            None => None,
        }
    }

    /// Make this process's address space current
    pub fn activate(&self) {
        if let Some(space) = self.addrspace.lock().as_deref() {
            space.activate();
        }
    }

    pub fn cwd(&self) -> PathBuf {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, path: &Path) {
        *self.cwd.lock() = path.to_path_buf();
    }

    pub fn attach_thread(&self) {
        self.threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true for the thread that took the count to zero
    pub fn detach_thread(&self) -> bool {
        let detached = self
            .threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        crate::kassert!(
            detached.is_ok(),
            "{}: detach with no attached threads",
            self.name
        );
        detached == Ok(1)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.load(Ordering::Acquire)
    }

    /// Claim the right to destroy this process. Only the first caller
    /// gets true.
    pub(super) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Release everything the process owns. No thread may still run on its
    /// behalf.
    pub(super) fn teardown(&self) {
        crate::kassert!(
            self.thread_count() == 0,
            "{} ({}): destroyed with {} attached threads",
            self.name,
            self.pid(),
            self.thread_count()
        );
        // Vnodes are closed after the process lock is released
        let files = self.files().take_all();
        drop(files);
        if let Some(space) = self.set_addrspace(None) {
            space.destroy();
        }
        *self.cwd.lock() = PathBuf::new();
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid())
            .field("name", &self.name)
            .field("threads", &self.thread_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::addrspace::MemoryAddressSpace;

    #[test]
    fn test_new_process_has_no_pid() {
        let proc = Process::new("fresh", 4, 16).unwrap();
        assert_eq!(proc.pid(), Pid::INVALID);
        assert_eq!(proc.name(), "fresh");
        assert_eq!(proc.files().capacity(), 4);
        assert_eq!(proc.cwd(), PathBuf::from("/"));
        assert!(!proc.has_addrspace());
    }

    #[test]
    fn test_thread_accounting() {
        let proc = Process::new("threads", 4, 16).unwrap();
        proc.attach_thread();
        proc.attach_thread();
        assert_eq!(proc.thread_count(), 2);
        assert!(!proc.detach_thread());
        assert!(proc.detach_thread());
        assert_eq!(proc.thread_count(), 0);
    }

    #[test]
    fn test_mark_destroyed_once() {
        let proc = Process::new("once", 4, 16).unwrap();
        assert!(!proc.is_destroyed());
        assert!(proc.mark_destroyed());
        assert!(!proc.mark_destroyed());
        assert!(proc.is_destroyed());
    }

    #[test]
    fn test_with_addrspace_without_space() {
        let proc = Process::new("bare", 4, 16).unwrap();
        assert!(proc.with_addrspace(|space| space.activate()).is_none());
    }

    #[test]
    #[should_panic(expected = "destroyed with 1 attached threads")]
    fn test_teardown_with_threads_is_fatal() {
        let proc = Process::new("busy", 4, 16).unwrap();
        proc.attach_thread();
        proc.teardown();
    }

    #[test]
    fn test_addrspace_swap_and_access() {
        let proc = Process::new("vm", 4, 16).unwrap();
        let mut space = MemoryAddressSpace::new();
        space.define_region(0x1000, 16).unwrap();
        assert!(proc.set_addrspace(Some(Box::new(space))).is_none());

        proc.with_addrspace(|space| space.write(0x1000, b"abc")).unwrap().unwrap();
        let mut buf = [0u8; 3];
        proc.with_addrspace(|space| space.read(0x1000, &mut buf)).unwrap().unwrap();
        assert_eq!(&buf, b"abc");

        proc.teardown();
        assert!(!proc.has_addrspace());
    }

    #[test]
    fn test_pid_display() {
        assert_eq!(Pid(7).to_string(), "pid:7");
        assert_eq!(Pid::KERNEL.index(), 1);
    }
}
