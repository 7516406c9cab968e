//! Open file handles
//!
//! A `FileHandle` is one open of a file: the vnode, the access mode and the
//! current offset. Descriptor tables hold `FileRef`s, which are shared
//! references to a handle; dup2 and fork hand out more of them. When the
//! last `FileRef` goes away the vnode is closed.

use super::error::{KResult, KernelError, kstrdup};
use super::lock::Sleeplock;
use crate::vfs::{FileSystem, OpenOptions, Vnode};
use bitflags::bitflags;
use std::ops::Deref;
use std::sync::Arc;

bitflags! {
    /// Flags accepted by open. The low two bits are the access mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 1;
        const RDWR = 2;
        const CREAT = 4;
        const EXCL = 8;
        const TRUNC = 16;
        const APPEND = 32;
    }
}

const ACCMODE: u32 = 3;

/// Access mode of an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenFlags {
    /// The access mode, or `InvalidArgument` if both mode bits are set
    pub fn access_mode(self) -> KResult<AccessMode> {
        match self.bits() & ACCMODE {
            0 => Ok(AccessMode::ReadOnly),
            1 => Ok(AccessMode::WriteOnly),
            2 => Ok(AccessMode::ReadWrite),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    fn to_options(self, mode: AccessMode) -> OpenOptions {
        OpenOptions::new()
            .read(mode != AccessMode::WriteOnly)
            .write(mode != AccessMode::ReadOnly)
            .create(self.contains(OpenFlags::CREAT))
            .exclusive(self.contains(OpenFlags::EXCL))
            .truncate(self.contains(OpenFlags::TRUNC))
            .append(self.contains(OpenFlags::APPEND))
    }
}

/// Reference point of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = KernelError;

    fn try_from(raw: i32) -> KResult<Self> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

pub struct FileHandle {
    path: String,
    mode: AccessMode,
    offset: Sleeplock<i64>,
    vnode: Vnode,
}

impl FileHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    pub fn offset(&self) -> i64 {
        *self.offset.lock()
    }

    pub fn vnode(&self) -> &Vnode {
        &self.vnode
    }

    /// Read at the current offset and advance it by the bytes read
    pub fn read(&self, buf: &mut [u8]) -> KResult<usize> {
        if self.mode == AccessMode::WriteOnly {
            return Err(KernelError::PermissionDenied);
        }
        let mut offset = self.offset.lock();
        let n = self.vnode.read_at(start_of(*offset)?, buf)?;
        *offset = advance(*offset, n)?;
        Ok(n)
    }

    /// Write at the current offset and advance it by the bytes written
    pub fn write(&self, buf: &[u8]) -> KResult<usize> {
        if self.mode == AccessMode::ReadOnly {
            return Err(KernelError::PermissionDenied);
        }
        let mut offset = self.offset.lock();
        let n = self.vnode.write_at(start_of(*offset)?, buf)?;
        *offset = advance(*offset, n)?;
        Ok(n)
    }

    /// Move the offset. A negative or unrepresentable target leaves it
    /// where it was.
    pub fn seek(&self, pos: i64, whence: Whence) -> KResult<i64> {
        if !self.vnode.is_seekable()? {
            return Err(KernelError::NotSeekable);
        }
        let mut offset = self.offset.lock();
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => *offset,
            Whence::End => {
                i64::try_from(self.vnode.stat()?.size).map_err(|_| KernelError::InvalidArgument)?
            }
        };
        let target = base.checked_add(pos).ok_or(KernelError::InvalidArgument)?;
        if target < 0 {
            return Err(KernelError::InvalidArgument);
        }
        *offset = target;
        Ok(target)
    }
}

fn start_of(offset: i64) -> KResult<u64> {
    u64::try_from(offset).map_err(|_| KernelError::InvalidArgument)
}

fn advance(offset: i64, n: usize) -> KResult<i64> {
    i64::try_from(n)
        .ok()
        .and_then(|n| offset.checked_add(n))
        .ok_or(KernelError::InvalidArgument)
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        log::trace!("closing {} (vnode {})", self.path, self.vnode.id());
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("vnode", &self.vnode)
            .finish()
    }
}

/// An owning reference to a `FileHandle`
#[derive(Debug, Clone)]
pub struct FileRef(Arc<FileHandle>);

impl FileRef {
    /// Open `path` and wrap it in a fresh handle with one reference.
    ///
    /// With `APPEND` the offset starts at the current size of the file.
    pub fn create(
        fs: &Arc<dyn FileSystem>,
        path: &str,
        flags: OpenFlags,
        file_mode: u32,
    ) -> KResult<FileRef> {
        let mode = flags.access_mode()?;
        let vnode = Vnode::open(fs, path, flags.to_options(mode), file_mode)?;

        // The vnode is closed by its own drop if anything below fails
        let start = if flags.contains(OpenFlags::APPEND) {
            i64::try_from(vnode.stat()?.size).map_err(|_| KernelError::InvalidArgument)?
        } else {
            0
        };

        let handle = FileHandle {
            path: kstrdup(path)?,
            mode,
            offset: Sleeplock::create(path, start)?,
            vnode,
        };
        log::trace!("opened {} as vnode {}", path, handle.vnode.id());
        Ok(FileRef(Arc::new(handle)))
    }

    /// Another owning reference to the same handle
    pub fn share(&self) -> FileRef {
        FileRef(Arc::clone(&self.0))
    }

    /// Number of owning references, including any held by in-flight calls
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn same_handle(&self, other: &FileRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Give up this reference; the last one closes the file
    pub fn destroy(self) {
        drop(self);
    }
}

impl Deref for FileRef {
    type Target = FileHandle;

    fn deref(&self) -> &FileHandle {
        &self.0
    }
}
