//! In-memory filesystem implementation
//!
//! Simple and ephemeral. Holds regular files, directories and a console
//! device. Counts opens and closes so tests can check that nothing leaks.

use super::{FileSystem, Metadata, OpenOptions, VnodeId};
use slab::Slab;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Path of the console device
pub const CONSOLE: &str = "con:";

/// An open object
struct OpenNode {
    path: String,
    readable: bool,
    writable: bool,
}

/// A character device backed by two byte queues
#[derive(Default)]
struct ConsoleDevice {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// A stored file, directory or device
enum Node {
    File { data: Vec<u8>, mode: u32 },
    Directory,
    Console(ConsoleDevice),
}

struct Inner {
    /// All nodes, keyed by path
    nodes: HashMap<String, Node>,
    /// Open objects
    handles: Slab<OpenNode>,
}

/// In-memory filesystem
pub struct MemoryFs {
    inner: spin::Mutex<Inner>,
    closes: AtomicUsize,
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("not found: {}", path))
}

fn bad_handle(id: VnodeId) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid vnode {}", id))
}

impl MemoryFs {
    /// A file system with a root directory and the console device
    pub fn new() -> Self {
        let fs = Self::empty();
        fs.inner
            .lock()
            .nodes
            .insert(CONSOLE.to_string(), Node::Console(ConsoleDevice::default()));
        fs
    }

    /// A file system with only a root directory
    pub fn empty() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::Directory);
        Self {
            inner: spin::Mutex::new(Inner {
                nodes,
                handles: Slab::new(),
            }),
            closes: AtomicUsize::new(0),
        }
    }

    /// Normalize a path (leading slash, no trailing slash except root).
    /// Device names such as `con:` are left alone.
    fn normalize_path(path: &str) -> String {
        if path.contains(':') {
            return path.to_string();
        }

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        if path.len() > 1 && path.ends_with('/') {
            path[..path.len() - 1].to_string()
        } else {
            path
        }
    }

    fn parent_path(path: &str) -> Option<&str> {
        if path == "/" || path.contains(':') {
            return None;
        }
        match path.rfind('/')? {
            0 => Some("/"),
            idx => Some(&path[..idx]),
        }
    }

    fn ensure_parent(nodes: &HashMap<String, Node>, path: &str) -> io::Result<()> {
        if let Some(parent) = Self::parent_path(path) {
            match nodes.get(parent) {
                Some(Node::Directory) => {}
                Some(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("not a directory: {}", parent),
                    ));
                }
                None => return Err(not_found(parent)),
            }
        }
        Ok(())
    }

    pub fn create_dir(&self, path: &str) -> io::Result<()> {
        let path = Self::normalize_path(path);
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {}", path),
            ));
        }
        Self::ensure_parent(&inner.nodes, &path)?;
        inner.nodes.insert(path, Node::Directory);
        Ok(())
    }

    /// Create or replace a regular file
    pub fn write_file(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        let path = Self::normalize_path(path);
        let mut inner = self.inner.lock();
        Self::ensure_parent(&inner.nodes, &path)?;
        if let Some(Node::Directory) = inner.nodes.get(&path) {
            return Err(io::Error::from(io::ErrorKind::IsADirectory));
        }
        inner.nodes.insert(
            path,
            Node::File {
                data: contents.to_vec(),
                mode: 0o644,
            },
        );
        Ok(())
    }

    /// Contents of a regular file
    pub fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        match self.inner.lock().nodes.get(&path) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path),
            )),
            None => Err(not_found(&path)),
        }
    }

    /// Queue bytes for the console to hand out on read
    pub fn push_console_input(&self, bytes: &[u8]) {
        if let Some(Node::Console(console)) = self.inner.lock().nodes.get_mut(CONSOLE) {
            console.input.extend(bytes);
        }
    }

    /// Everything written to the console so far, clearing it
    pub fn take_console_output(&self) -> Vec<u8> {
        match self.inner.lock().nodes.get_mut(CONSOLE) {
            Some(Node::Console(console)) => std::mem::take(&mut console.output),
            _ => Vec::new(),
        }
    }

    /// Objects currently open
    pub fn open_count(&self) -> usize {
        self.inner.lock().handles.len()
    }

    /// Objects closed since creation
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn grow_for_write(data: &mut Vec<u8>, end: usize) -> io::Result<()> {
    if end > data.len() {
        data.try_reserve(end - data.len())
            .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
        data.resize(end, 0);
    }
    Ok(())
}

impl FileSystem for MemoryFs {
    fn open(&self, path: &str, options: OpenOptions, mode: u32) -> io::Result<VnodeId> {
        let path = Self::normalize_path(path);
        let mut inner = self.inner.lock();

        match inner.nodes.get_mut(&path) {
            Some(Node::Directory) => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    format!("cannot open directory: {}", path),
                ));
            }
            Some(Node::File { data, .. }) => {
                if options.create && options.exclusive {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("already exists: {}", path),
                    ));
                }
                if options.truncate && options.write {
                    data.clear();
                }
            }
            Some(Node::Console(_)) => {}
            None => {
                if !options.create {
                    return Err(not_found(&path));
                }
                Self::ensure_parent(&inner.nodes, &path)?;
                inner.nodes.insert(
                    path.clone(),
                    Node::File {
                        data: Vec::new(),
                        mode,
                    },
                );
            }
        }

        let id = inner.handles.insert(OpenNode {
            path,
            readable: options.read,
            writable: options.write,
        });
        Ok(id)
    }

    fn close(&self, id: VnodeId) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.handles.try_remove(id).is_none() {
            return Err(bad_handle(id));
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_at(&self, id: VnodeId, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let open = inner.handles.get(id).ok_or_else(|| bad_handle(id))?;
        if !open.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "not opened for reading",
            ));
        }

        match inner.nodes.get_mut(&open.path) {
            Some(Node::File { data, .. }) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
            Some(Node::Console(console)) => {
                let n = buf.len().min(console.input.len());
                for (dst, src) in buf.iter_mut().zip(console.input.drain(..n)) {
                    *dst = src;
                }
                Ok(n)
            }
            Some(Node::Directory) => Err(io::Error::from(io::ErrorKind::IsADirectory)),
            None => Err(not_found(&open.path)),
        }
    }

    fn write_at(&self, id: VnodeId, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let open = inner.handles.get(id).ok_or_else(|| bad_handle(id))?;
        if !open.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "not opened for writing",
            ));
        }

        match inner.nodes.get_mut(&open.path) {
            Some(Node::File { data, .. }) => {
                let start = usize::try_from(offset)
                    .map_err(|_| io::Error::from(io::ErrorKind::FileTooLarge))?;
                let end = start
                    .checked_add(buf.len())
                    .ok_or_else(|| io::Error::from(io::ErrorKind::FileTooLarge))?;
                grow_for_write(data, end)?;
                data[start..end].copy_from_slice(buf);
                Ok(buf.len())
            }
            Some(Node::Console(console)) => {
                console
                    .output
                    .try_reserve(buf.len())
                    .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
                console.output.extend_from_slice(buf);
                Ok(buf.len())
            }
            Some(Node::Directory) => Err(io::Error::from(io::ErrorKind::IsADirectory)),
            None => Err(not_found(&open.path)),
        }
    }

    fn fstat(&self, id: VnodeId) -> io::Result<Metadata> {
        let path = {
            let inner = self.inner.lock();
            inner.handles.get(id).ok_or_else(|| bad_handle(id))?.path.clone()
        };
        self.metadata(&path)
    }

    fn is_seekable(&self, id: VnodeId) -> io::Result<bool> {
        let inner = self.inner.lock();
        let open = inner.handles.get(id).ok_or_else(|| bad_handle(id))?;
        Ok(matches!(inner.nodes.get(&open.path), Some(Node::File { .. })))
    }

    fn metadata(&self, path: &str) -> io::Result<Metadata> {
        let path = Self::normalize_path(path);
        match self.inner.lock().nodes.get(&path) {
            Some(Node::File { data, mode }) => Ok(Metadata {
                size: data.len() as u64,
                is_file: true,
                mode: *mode,
                ..Default::default()
            }),
            Some(Node::Directory) => Ok(Metadata {
                is_dir: true,
                mode: 0o755,
                ..Default::default()
            }),
            Some(Node::Console(_)) => Ok(Metadata {
                is_device: true,
                mode: 0o666,
                ..Default::default()
            }),
            None => Err(not_found(&path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw() -> OpenOptions {
        OpenOptions::new().read(true).write(true)
    }

    #[test]
    fn test_basic_file_ops() {
        let fs = MemoryFs::new();

        let id = fs
            .open("/test.txt", OpenOptions::new().write(true).create(true), 0o664)
            .unwrap();
        assert_eq!(fs.write_at(id, 0, b"hello world").unwrap(), 11);
        fs.close(id).unwrap();

        let id = fs.open("/test.txt", OpenOptions::new().read(true), 0).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(fs.read_at(id, 0, &mut buf).unwrap(), 11);
        assert_eq!(&buf, b"hello world");
        assert_eq!(fs.read_at(id, 6, &mut buf).unwrap(), 5);
        assert_eq!(fs.read_at(id, 100, &mut buf).unwrap(), 0);
        fs.close(id).unwrap();

        assert_eq!(fs.metadata("/test.txt").unwrap().mode, 0o664);
        assert_eq!(fs.open_count(), 0);
        assert_eq!(fs.close_count(), 2);
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let fs = MemoryFs::new();
        let id = fs.open("gap", rw().create(true), 0o644).unwrap();
        fs.write_at(id, 4, b"x").unwrap();
        assert_eq!(fs.read_file("/gap").unwrap(), b"\0\0\0\0x");
        fs.close(id).unwrap();
    }

    #[test]
    fn test_open_missing_without_create() {
        let fs = MemoryFs::new();
        let err = fs.open("/nope", OpenOptions::new().read(true), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs.open_count(), 0);
    }

    #[test]
    fn test_exclusive_create() {
        let fs = MemoryFs::new();
        fs.write_file("/a", b"1").unwrap();
        let err = fs
            .open("/a", rw().create(true).exclusive(true), 0o644)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_truncate() {
        let fs = MemoryFs::new();
        fs.write_file("/t", b"old contents").unwrap();
        let id = fs.open("/t", rw().truncate(true), 0).unwrap();
        assert_eq!(fs.fstat(id).unwrap().size, 0);
        fs.close(id).unwrap();
    }

    #[test]
    fn test_directories() {
        let fs = MemoryFs::new();
        fs.create_dir("/d").unwrap();
        assert!(fs.metadata("/d/").unwrap().is_dir);
        let err = fs.open("/d", OpenOptions::new().read(true), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);
        let err = fs
            .open("/missing/f", rw().create(true), 0o644)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_console_device() {
        let fs = MemoryFs::new();
        let out = fs.open(CONSOLE, OpenOptions::new().write(true), 0).unwrap();
        let inp = fs.open(CONSOLE, OpenOptions::new().read(true), 0).unwrap();
        assert!(!fs.is_seekable(out).unwrap());
        assert!(fs.fstat(out).unwrap().is_device);

        fs.write_at(out, 99, b"hi ").unwrap();
        fs.write_at(out, 0, b"there").unwrap();
        assert_eq!(fs.take_console_output(), b"hi there");

        fs.push_console_input(b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(fs.read_at(inp, 0, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(fs.read_at(inp, 0, &mut buf).unwrap(), 1);
        assert_eq!(fs.read_at(inp, 0, &mut buf).unwrap(), 0);

        fs.close(out).unwrap();
        fs.close(inp).unwrap();
    }

    #[test]
    fn test_access_checked_per_open() {
        let fs = MemoryFs::new();
        fs.write_file("/r", b"data").unwrap();
        let id = fs.open("/r", OpenOptions::new().read(true), 0).unwrap();
        let err = fs.write_at(id, 0, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        fs.close(id).unwrap();
    }

    #[test]
    fn test_double_close_is_error() {
        let fs = MemoryFs::new();
        let id = fs.open(CONSOLE, OpenOptions::new().read(true), 0).unwrap();
        fs.close(id).unwrap();
        assert!(fs.close(id).is_err());
        assert_eq!(fs.close_count(), 1);
    }

    #[test]
    fn test_empty_has_no_console() {
        let fs = MemoryFs::empty();
        assert!(fs.open(CONSOLE, OpenOptions::new().read(true), 0).is_err());
        assert!(fs.metadata("/").unwrap().is_dir);
    }
}
