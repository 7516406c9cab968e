//! Virtual File System
//!
//! The interface the kernel consumes to reach files and devices, and an
//! in-memory backend. The kernel never looks inside an open object; it only
//! holds a `Vnode` and calls through the `FileSystem` that produced it.

pub mod memory;

pub use memory::MemoryFs;

use std::io;
use std::sync::Arc;

/// Backend-assigned identifier of an open object
pub type VnodeId = usize;

/// How a file is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub exclusive: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

/// File metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_device: bool,
    /// Unix permission bits
    pub mode: u32,
}

/// A file-system backend. All methods take `&self`; backends do their own
/// locking.
pub trait FileSystem: Send + Sync {
    /// Open `path`, creating it with permission bits `mode` if asked to
    fn open(&self, path: &str, options: OpenOptions, mode: u32) -> io::Result<VnodeId>;

    /// Release an open object. Each id is closed exactly once.
    fn close(&self, id: VnodeId) -> io::Result<()>;

    /// Read at `offset`; a short count is not an error
    fn read_at(&self, id: VnodeId, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write at `offset`, extending the object if needed
    fn write_at(&self, id: VnodeId, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Metadata of an open object (fstat)
    fn fstat(&self, id: VnodeId) -> io::Result<Metadata>;

    /// Whether the offset of an open object means anything
    fn is_seekable(&self, id: VnodeId) -> io::Result<bool>;

    /// Metadata by path
    fn metadata(&self, path: &str) -> io::Result<Metadata>;
}

/// An open object together with the file system it belongs to. Dropping
/// it closes the object.
pub struct Vnode {
    fs: Arc<dyn FileSystem>,
    id: VnodeId,
}

impl Vnode {
    pub fn open(
        fs: &Arc<dyn FileSystem>,
        path: &str,
        options: OpenOptions,
        mode: u32,
    ) -> io::Result<Self> {
        let id = fs.open(path, options, mode)?;
        Ok(Self {
            fs: Arc::clone(fs),
            id,
        })
    }

    pub fn id(&self) -> VnodeId {
        self.id
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.fs.read_at(self.id, offset, buf)
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.fs.write_at(self.id, offset, buf)
    }

    pub fn stat(&self) -> io::Result<Metadata> {
        self.fs.fstat(self.id)
    }

    pub fn is_seekable(&self) -> io::Result<bool> {
        self.fs.is_seekable(self.id)
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        if let Err(e) = self.fs.close(self.id) {
            log::warn!("vnode {}: close failed: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for Vnode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vnode").field("id", &self.id).finish()
    }
}
