//! The kernel - resource tables and the primitives that guard them
//!
//! Bottom up:
//! - `wchan`, `semaphore`, `lock`, `cv`, `rwlock`: blocking synchronization
//! - `file`: reference-counted open file handles
//! - `fdtable`, `proctable`: growable tables of handles and processes
//! - `process`, `syscall`: process lifecycle and the syscall boundary
//!
//! One `Kernel` exists per boot. `boot` installs it; the free syscall
//! functions find it through `kernel()`.

pub mod addrspace;
pub mod config;
pub mod cv;
pub mod error;
pub mod fdtable;
pub mod file;
pub mod klog;
pub mod lock;
pub mod process;
pub mod proctable;
pub mod rwlock;
pub mod semaphore;
pub mod slots;
pub mod syscall;
pub mod thread;
pub mod wchan;


pub use addrspace::{AddressSpace, MemoryAddressSpace};
pub use config::KernelConfig;
pub use cv::Cv;
pub use error::{KResult, KernelError};
pub use fdtable::{Fd, FdTable};
pub use file::{AccessMode, FileHandle, FileRef, OpenFlags, Whence};
pub use lock::{Lock, Sleeplock, SleeplockGuard};
pub use process::{Pid, Process};
pub use proctable::ProcessTable;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use syscall::Kernel;
pub use thread::{ThreadEntry, Trapframe};

use crate::vfs::FileSystem;
use std::sync::{Arc, OnceLock};

/// The global kernel instance
static KERNEL: OnceLock<Kernel> = OnceLock::new();

/// Bring the kernel up: install the console logger at the configured
/// level, then build the process table. Booting twice is fatal.
pub fn boot(config: KernelConfig, fs: Arc<dyn FileSystem>) -> KResult<&'static Kernel> {
    klog::init(config.log_level());
    crate::kassert!(KERNEL.get().is_none(), "kernel booted twice");

    let kernel = Kernel::bootstrap(config, fs)?;
    if KERNEL.set(kernel).is_err() {
        crate::kpanic!("kernel booted twice");
    }
    KERNEL.get().ok_or(KernelError::NoProcess)
}

/// The booted kernel, if any
pub fn kernel() -> Option<&'static Kernel> {
    KERNEL.get()
}
