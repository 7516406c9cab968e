//! Per-process file descriptor tables
//!
//! Maps small integers to open file handles. Descriptors 0, 1 and 2 are
//! stdin, stdout and stderr and are never handed out by `assign`. The table
//! belongs to one process and every operation runs under that process's
//! lock.

use super::error::{KResult, KernelError};
use super::file::FileRef;
use super::slots::SlotVec;

/// File descriptor - an index into a process's file table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
    pub const STDERR: Fd = Fd(2);

    /// Validate a descriptor number coming from a user program
    pub fn from_raw(raw: i32) -> KResult<Fd> {
        u32::try_from(raw)
            .map(Fd)
            .map_err(|_| KernelError::BadFileDescriptor)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// First descriptor `assign` considers
const FIRST_UNRESERVED: usize = 3;

#[derive(Debug)]
pub struct FdTable {
    slots: SlotVec<FileRef>,
    limit: usize,
}

impl FdTable {
    /// The table of the kernel process: no slots at all
    pub fn empty(limit: usize) -> Self {
        Self {
            slots: SlotVec::new(),
            limit,
        }
    }

    pub fn with_capacity(capacity: usize, limit: usize) -> KResult<Self> {
        Ok(Self {
            slots: SlotVec::with_capacity(capacity)?,
            limit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Descriptors at or past this are rejected
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn open_count(&self) -> usize {
        self.slots.occupied()
    }

    pub fn get(&self, fd: Fd) -> Option<&FileRef> {
        self.slots.get(fd.index())
    }

    /// Install `file` in the lowest free descriptor at or above 3.
    ///
    /// On failure `file` is dropped, so the caller's reference goes away.
    pub fn assign(&mut self, file: FileRef) -> KResult<Fd> {
        let index = self.slots.first_free_from(FIRST_UNRESERVED);
        if index >= self.limit {
            return Err(KernelError::TooManyOpenFiles);
        }
        let previous_capacity = self.capacity();
        match self.slots.set(index, file) {
            Ok(_) => {}
            Err(KernelError::OutOfMemory) => return Err(KernelError::TooManyOpenFiles),
            Err(e) => return Err(e),
        }
        if self.capacity() != previous_capacity {
            log::debug!(
                "fd table grew {} -> {}",
                previous_capacity,
                self.capacity()
            );
        }
        Ok(Fd(index as u32))
    }

    /// Install `file` at exactly `fd`, growing the table if needed. The
    /// previous occupant is handed back for the caller to release.
    pub fn set(&mut self, fd: Fd, file: FileRef) -> KResult<Option<FileRef>> {
        if fd.index() >= self.limit {
            return Err(KernelError::BadFileDescriptor);
        }
        self.slots.set(fd.index(), file)
    }

    /// Clear an occupied descriptor and return its reference.
    ///
    /// Removing an empty descriptor is a caller bug.
    pub fn remove(&mut self, fd: Fd) -> FileRef {
        match self.slots.take(fd.index()) {
            Some(file) => file,
            None => crate::kpanic!("remove of empty descriptor {}", fd),
        }
    }

    /// Close a descriptor; `BadFileDescriptor` if it is not open.
    ///
    /// The handle is released in place, which may close its vnode. Inside
    /// the process lock use `remove` and drop the reference after
    /// unlocking.
    pub fn close(&mut self, fd: Fd) -> KResult<()> {
        let file = self
            .slots
            .take(fd.index())
            .ok_or(KernelError::BadFileDescriptor)?;
        file.destroy();
        Ok(())
    }

    /// Copy for a forked child: same capacity, every occupied descriptor
    /// shares its handle with the parent
    pub fn duplicate(&self) -> KResult<FdTable> {
        Ok(FdTable {
            slots: self.slots.try_clone()?,
            limit: self.limit,
        })
    }

    /// Close every open descriptor
    pub fn close_all(&mut self) {
        for file in self.take_all() {
            file.destroy();
        }
    }

    /// Empty the table and hand back every open reference, lowest
    /// descriptor first
    pub fn take_all(&mut self) -> Vec<FileRef> {
        self.slots.drain()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Fd, &FileRef)> {
        self.slots
            .iter_occupied()
            .map(|(index, file)| (Fd(index as u32), file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::file::OpenFlags;
    use crate::vfs::{FileSystem, MemoryFs};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryFs>, Arc<dyn FileSystem>) {
        let mem = Arc::new(MemoryFs::new());
        let fs: Arc<dyn FileSystem> = mem.clone();
        (mem, fs)
    }

    fn console(fs: &Arc<dyn FileSystem>) -> FileRef {
        FileRef::create(fs, "con:", OpenFlags::RDWR, 0o664).unwrap()
    }

    fn with_stdio(fs: &Arc<dyn FileSystem>) -> FdTable {
        let mut table = FdTable::with_capacity(4, 128).unwrap();
        for fd in [Fd::STDIN, Fd::STDOUT, Fd::STDERR] {
            assert!(table.set(fd, console(fs)).unwrap().is_none());
        }
        table
    }

    #[test]
    fn test_fd_from_raw() {
        assert_eq!(Fd::from_raw(5), Ok(Fd(5)));
        assert_eq!(Fd::from_raw(-1), Err(KernelError::BadFileDescriptor));
        assert_eq!(Fd(7).to_string(), "fd:7");
    }

    #[test]
    fn test_assign_skips_stdio_and_grows() {
        let (_mem, fs) = setup();
        let mut table = with_stdio(&fs);

        assert_eq!(table.assign(console(&fs)).unwrap(), Fd(3));
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.assign(console(&fs)).unwrap(), Fd(4));
        assert_eq!(table.capacity(), 8);
        for fd in [Fd::STDIN, Fd::STDOUT, Fd::STDERR] {
            assert!(table.get(fd).is_some());
        }
    }

    #[test]
    fn test_assign_never_uses_free_stdio_slot() {
        let (_mem, fs) = setup();
        let mut table = with_stdio(&fs);
        table.close(Fd::STDIN).unwrap();
        assert_eq!(table.assign(console(&fs)).unwrap(), Fd(3));
        assert!(table.get(Fd::STDIN).is_none());
    }

    #[test]
    fn test_assign_reuses_lowest_free() {
        let (_mem, fs) = setup();
        let mut table = with_stdio(&fs);
        for _ in 0..3 {
            table.assign(console(&fs)).unwrap();
        }
        table.close(Fd(4)).unwrap();
        assert_eq!(table.assign(console(&fs)).unwrap(), Fd(4));
    }

    #[test]
    fn test_assign_past_limit() {
        let (mem, fs) = setup();
        let mut table = FdTable::with_capacity(4, 4).unwrap();
        table.assign(console(&fs)).unwrap();
        assert_eq!(
            table.assign(console(&fs)),
            Err(KernelError::TooManyOpenFiles)
        );
        assert_eq!(table.capacity(), 4);
        assert_eq!(mem.open_count(), 1);
    }

    #[test]
    fn test_set_returns_displaced() {
        let (mem, fs) = setup();
        let mut table = with_stdio(&fs);
        let displaced = table.set(Fd::STDOUT, console(&fs)).unwrap().unwrap();
        assert_eq!(mem.open_count(), 4);
        drop(displaced);
        assert_eq!(mem.open_count(), 3);
    }

    #[test]
    fn test_set_far_index_grows_by_doubling() {
        let (_mem, fs) = setup();
        let mut table = with_stdio(&fs);
        table.set(Fd(100), console(&fs)).unwrap();
        assert_eq!(table.capacity(), 128);
        assert_eq!(table.set(Fd(128), console(&fs)).unwrap_err(), KernelError::BadFileDescriptor);
    }

    #[test]
    fn test_close() {
        let (mem, fs) = setup();
        let mut table = with_stdio(&fs);
        table.close(Fd::STDERR).unwrap();
        assert_eq!(table.close(Fd::STDERR), Err(KernelError::BadFileDescriptor));
        assert_eq!(table.close(Fd(1000)), Err(KernelError::BadFileDescriptor));
        assert_eq!(mem.open_count(), 2);
    }

    #[test]
    fn test_remove_hands_back_reference() {
        let (mem, fs) = setup();
        let mut table = with_stdio(&fs);
        let file = table.remove(Fd::STDIN);
        assert!(table.get(Fd::STDIN).is_none());
        assert_eq!(mem.open_count(), 3);
        drop(file);
        assert_eq!(mem.open_count(), 2);
    }

    #[test]
    fn test_take_all_defers_close() {
        let (mem, fs) = setup();
        let mut table = with_stdio(&fs);
        let taken = table.take_all();
        assert_eq!(taken.len(), 3);
        assert_eq!(table.open_count(), 0);
        assert_eq!(mem.open_count(), 3);
        drop(taken);
        assert_eq!(mem.open_count(), 0);
    }

    #[test]
    #[should_panic(expected = "remove of empty descriptor")]
    fn test_remove_empty_is_fatal() {
        let mut table = FdTable::with_capacity(4, 8).unwrap();
        table.remove(Fd(3));
    }

    #[test]
    fn test_duplicate_shares_handles() {
        let (mem, fs) = setup();
        let mut parent = with_stdio(&fs);
        parent.set(Fd(6), console(&fs)).unwrap();

        let child = parent.duplicate().unwrap();
        assert_eq!(child.capacity(), parent.capacity());
        for (fd, file) in parent.iter() {
            assert!(child.get(fd).unwrap().same_handle(file));
            assert_eq!(file.refcount(), 2);
        }

        parent.close_all();
        assert_eq!(mem.open_count(), 4);
        drop(child);
        assert_eq!(mem.open_count(), 0);
    }

    #[test]
    fn test_empty_table_grows_on_set() {
        let (_mem, fs) = setup();
        let mut table = FdTable::empty(16);
        assert_eq!(table.capacity(), 0);
        table.set(Fd(0), console(&fs)).unwrap();
        assert_eq!(table.capacity(), 1);
        assert_eq!(table.assign(console(&fs)).unwrap(), Fd(3));
        assert_eq!(table.capacity(), 4);
    }
}
