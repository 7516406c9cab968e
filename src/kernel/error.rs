//! Kernel error kinds
//!
//! Everything here is recoverable and is handed back to the immediate
//! caller. Contract violations do not appear here; they go through
//! `kassert!` instead.

use std::collections::TryReserveError;
use std::fmt;
use std::io;

/// Kernel result type
pub type KResult<T> = Result<T, KernelError>;

/// Recoverable kernel errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// An allocation failed; all partial state from the same call was undone
    OutOfMemory,
    /// Malformed open flags, negative seek target, unknown whence
    InvalidArgument,
    /// Read on a write-only handle or write on a read-only one
    PermissionDenied,
    /// Seek on an object that cannot seek
    NotSeekable,
    /// Descriptor out of range or not open
    BadFileDescriptor,
    /// No descriptor could be assigned
    TooManyOpenFiles,
    /// No pid could be assigned
    TooManyProcesses,
    /// Boundary call without a current process or a booted kernel
    NoProcess,
    /// Error reported by the file system, passed through unchanged
    Vfs(io::ErrorKind),
    /// Invalid kernel configuration
    Config(String),
}

impl KernelError {
    /// errno value reported to user programs (positive; the syscall
    /// boundary negates it)
    pub fn errno(&self) -> i32 {
        match self {
            KernelError::OutOfMemory => errno::ENOMEM,
            KernelError::InvalidArgument => errno::EINVAL,
            KernelError::PermissionDenied => errno::EPERM,
            KernelError::NotSeekable => errno::ESPIPE,
            KernelError::BadFileDescriptor => errno::EBADF,
            KernelError::TooManyOpenFiles => errno::EMFILE,
            KernelError::TooManyProcesses => errno::ENPROC,
            KernelError::NoProcess => errno::ESRCH,
            KernelError::Vfs(kind) => errno::from_io_kind(*kind),
            KernelError::Config(_) => errno::EINVAL,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::PermissionDenied => write!(f, "operation not permitted"),
            KernelError::NotSeekable => write!(f, "illegal seek"),
            KernelError::BadFileDescriptor => write!(f, "bad file descriptor"),
            KernelError::TooManyOpenFiles => write!(f, "too many open files"),
            KernelError::TooManyProcesses => write!(f, "too many processes"),
            KernelError::NoProcess => write!(f, "no such process"),
            KernelError::Vfs(kind) => write!(f, "file system error: {}", kind),
            KernelError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<io::Error> for KernelError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::OutOfMemory => KernelError::OutOfMemory,
            kind => KernelError::Vfs(kind),
        }
    }
}

impl From<TryReserveError> for KernelError {
    fn from(_: TryReserveError) -> Self {
        KernelError::OutOfMemory
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::Config(e.to_string())
    }
}

/// Copy a name into a freshly allocated string, reporting allocation
/// failure instead of aborting.
pub fn kstrdup(name: &str) -> KResult<String> {
    let mut copy = String::new();
    copy.try_reserve_exact(name.len())?;
    copy.push_str(name);
    Ok(copy)
}

/// errno numbers
pub mod errno {
    use std::io::ErrorKind;

    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const ESRCH: i32 = 3;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const EMFILE: i32 = 24;
    pub const ESPIPE: i32 = 29;
    pub const ENPROC: i32 = 36;

    /// Map a file-system error kind onto its errno
    pub fn from_io_kind(kind: ErrorKind) -> i32 {
        match kind {
            ErrorKind::NotFound => ENOENT,
            ErrorKind::PermissionDenied => EACCES,
            ErrorKind::AlreadyExists => EEXIST,
            ErrorKind::NotADirectory => ENOTDIR,
            ErrorKind::IsADirectory => EISDIR,
            ErrorKind::InvalidInput => EINVAL,
            ErrorKind::OutOfMemory => ENOMEM,
            _ => EIO,
        }
    }
}
