//! System call interface
//!
//! This is the boundary between user programs and the kernel's resource
//! tables. `Kernel` methods take the calling process explicitly; the free
//! functions at the bottom use the booted kernel and the calling thread's
//! current process, and are what a trap handler would dispatch to.
//!
//! Descriptor lookups happen under the process lock, which is released
//! before any file I/O starts.

use super::config::KernelConfig;
use super::error::{KResult, KernelError};
use super::fdtable::{Fd, FdTable};
use super::file::{FileRef, OpenFlags, Whence};
use super::process::{Pid, Process};
use super::proctable::ProcessTable;
use super::thread::{self, ThreadEntry, Trapframe};
use crate::vfs::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the kernel process
pub const KERNEL_PROC_NAME: &str = "[kernel]";

pub struct Kernel {
    config: KernelConfig,
    fs: Arc<dyn FileSystem>,
    procs: ProcessTable,
    kproc: Arc<Process>,
}

impl Kernel {
    /// Build the process table with the kernel process as pid 1
    pub fn bootstrap(config: KernelConfig, fs: Arc<dyn FileSystem>) -> KResult<Kernel> {
        config.validate()?;
        let kproc = Arc::new(Process::with_table(
            KERNEL_PROC_NAME,
            FdTable::empty(config.fd_limit),
        )?);
        let procs = ProcessTable::new(
            Arc::clone(&kproc),
            config.proc_table_capacity,
            config.pid_limit,
        )?;
        log::info!(
            "kernel up: console {}, {} fds/process, {} pids",
            config.console_path,
            config.fd_limit,
            config.pid_limit
        );
        Ok(Kernel {
            config,
            fs,
            procs,
            kproc,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn kernel_process(&self) -> &Arc<Process> {
        &self.kproc
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.get(pid)
    }

    /// Create an ordinary process with the console on descriptors 0, 1 and
    /// 2, and give it a pid. On failure nothing is left behind.
    pub fn create_process(&self, name: &str) -> KResult<Arc<Process>> {
        let proc = Arc::new(Process::new(
            name,
            self.config.fd_table_capacity,
            self.config.fd_limit,
        )?);
        // Dropping `proc` on any error below closes whatever was opened
        self.open_stdio(&proc)?;
        let pid = self.procs.add(&proc)?;
        log::debug!("created {} ({})", name, pid);
        Ok(proc)
    }

    fn open_stdio(&self, proc: &Process) -> KResult<()> {
        let mut files = proc.files();
        for (fd, flags) in [
            (Fd::STDIN, OpenFlags::RDONLY),
            (Fd::STDOUT, OpenFlags::WRONLY),
            (Fd::STDERR, OpenFlags::WRONLY),
        ] {
            let file = FileRef::create(
                &self.fs,
                &self.config.console_path,
                flags,
                self.config.default_file_mode,
            )?;
            files.set(fd, file)?;
        }
        Ok(())
    }

    /// Close everything `proc` owns and free its pid. Later calls for the
    /// same process do nothing.
    pub fn destroy_process(&self, proc: &Arc<Process>) {
        let pid = proc.pid();
        crate::kassert!(
            pid != Pid::KERNEL,
            "attempt to destroy the kernel process"
        );
        if !proc.mark_destroyed() {
            log::trace!("{} ({}) already destroyed", proc.name(), pid);
            return;
        }
        proc.teardown();
        if pid != Pid::INVALID {
            self.procs.remove(proc);
        }
        log::debug!("destroyed {} ({})", proc.name(), pid);
    }

    fn resolve(&self, cur: &Process, path: &str) -> KResult<String> {
        if path.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        if path.starts_with('/') || path.contains(':') {
            return Ok(path.to_string());
        }
        cur.cwd()
            .join(path)
            .into_os_string()
            .into_string()
            .map_err(|_| KernelError::InvalidArgument)
    }

    /// Another reference to the handle behind `fd`, taken under the
    /// process lock
    fn lookup(&self, cur: &Process, fd: i32) -> KResult<FileRef> {
        let fd = Fd::from_raw(fd)?;
        cur.files()
            .get(fd)
            .map(FileRef::share)
            .ok_or(KernelError::BadFileDescriptor)
    }

    pub fn sys_open(&self, cur: &Process, path: &str, flags: u32) -> KResult<Fd> {
        let path = self.resolve(cur, path)?;
        let file = FileRef::create(
            &self.fs,
            &path,
            OpenFlags::from_bits_retain(flags),
            self.config.default_file_mode,
        )?;
        let fd = cur.files().assign(file)?;
        log::trace!("{}: open {} -> {}", cur.pid(), path, fd);
        Ok(fd)
    }

    pub fn sys_read(&self, cur: &Process, fd: i32, buf: &mut [u8]) -> KResult<usize> {
        self.lookup(cur, fd)?.read(buf)
    }

    pub fn sys_write(&self, cur: &Process, fd: i32, buf: &[u8]) -> KResult<usize> {
        self.lookup(cur, fd)?.write(buf)
    }

    pub fn sys_lseek(&self, cur: &Process, fd: i32, pos: i64, whence: i32) -> KResult<i64> {
        let file = self.lookup(cur, fd)?;
        file.seek(pos, Whence::try_from(whence)?)
    }

    pub fn sys_close(&self, cur: &Process, fd: i32) -> KResult<()> {
        let fd = Fd::from_raw(fd)?;
        let file = {
            let mut files = cur.files();
            if files.get(fd).is_none() {
                return Err(KernelError::BadFileDescriptor);
            }
            files.remove(fd)
        };
        file.destroy();
        Ok(())
    }

    /// Make `newfd` refer to the same open file as `oldfd`, closing what
    /// `newfd` held before
    pub fn sys_dup2(&self, cur: &Process, oldfd: i32, newfd: i32) -> KResult<Fd> {
        let old = Fd::from_raw(oldfd)?;
        let new = Fd::from_raw(newfd)?;
        let displaced = {
            let mut files = cur.files();
            let file = files.get(old).ok_or(KernelError::BadFileDescriptor)?;
            if old == new {
                return Ok(new);
            }
            let file = file.share();
            files.set(new, file)?
        };
        drop(displaced);
        Ok(new)
    }

    /// Duplicate `cur` into a new process whose first thread runs `entry`
    /// with a copy of `tf` that returns 0.
    pub fn sys_fork(&self, cur: &Arc<Process>, tf: &Trapframe, entry: ThreadEntry) -> KResult<Pid> {
        let child = self.create_process(cur.name())?;
        match self.fork_into(cur, &child, tf, entry) {
            Ok(()) => {
                log::debug!("{} forked {}", cur.pid(), child.pid());
                Ok(child.pid())
            }
            Err(e) => {
                log::debug!("fork of {} failed: {}", cur.pid(), e);
                self.destroy_process(&child);
                Err(e)
            }
        }
    }

    fn fork_into(
        &self,
        parent: &Arc<Process>,
        child: &Arc<Process>,
        tf: &Trapframe,
        entry: ThreadEntry,
    ) -> KResult<()> {
        if let Some(space) = parent.with_addrspace(|space| space.copy()).transpose()? {
            child.set_addrspace(Some(space));
        }
        child.set_cwd(&parent.cwd());

        let table = parent.files().duplicate()?;
        // The child's stdio is closed once its lock is released
        let stdio = std::mem::replace(&mut *child.files(), table);
        drop(stdio);

        let handle = thread::fork_thread(child.name(), Arc::clone(child), tf.forked_child(), entry)?;
        drop(handle);
        Ok(())
    }

    pub fn sys_getpid(&self, cur: &Process) -> Pid {
        cur.pid()
    }

    /// Not implemented: returns pid 0 and status 0 without waiting
    pub fn sys_waitpid(&self, cur: &Process, pid: i32, options: i32) -> KResult<(Pid, i32)> {
        log::trace!("{}: waitpid({}, {}) is a stub", cur.pid(), pid, options);
        Ok((Pid::INVALID, 0))
    }

    /// Detach the calling thread from `proc`, which it must be attached
    /// to. The thread that detaches last destroys the process.
    pub fn sys_exit(&self, proc: &Arc<Process>, code: i32) {
        log::debug!("{} ({}) exited with {}", proc.name(), proc.pid(), code);
        if proc.detach_thread() {
            self.destroy_process(proc);
        }
    }

    pub fn sys_getcwd(&self, cur: &Process) -> PathBuf {
        cur.cwd()
    }

    pub fn sys_chdir(&self, cur: &Process, path: &str) -> KResult<()> {
        let resolved = self.resolve(cur, path)?;
        let meta = self.fs.metadata(&resolved)?;
        if !meta.is_dir {
            return Err(KernelError::Vfs(std::io::ErrorKind::NotADirectory));
        }
        cur.set_cwd(Path::new(&resolved));
        Ok(())
    }
}

// ========== CURRENT-PROCESS API ==========

fn with_current<R>(f: impl FnOnce(&Kernel, &Arc<Process>) -> KResult<R>) -> KResult<R> {
    let kernel = super::kernel().ok_or(KernelError::NoProcess)?;
    let cur = thread::current_process().ok_or(KernelError::NoProcess)?;
    f(kernel, &cur)
}

/// Open a file
pub fn open(path: &str, flags: u32) -> KResult<Fd> {
    with_current(|k, cur| k.sys_open(cur, path, flags))
}

/// Read from a file descriptor
pub fn read(fd: i32, buf: &mut [u8]) -> KResult<usize> {
    with_current(|k, cur| k.sys_read(cur, fd, buf))
}

/// Write to a file descriptor
pub fn write(fd: i32, buf: &[u8]) -> KResult<usize> {
    with_current(|k, cur| k.sys_write(cur, fd, buf))
}

/// Move a file offset
pub fn lseek(fd: i32, pos: i64, whence: i32) -> KResult<i64> {
    with_current(|k, cur| k.sys_lseek(cur, fd, pos, whence))
}

/// Close a file descriptor
pub fn close(fd: i32) -> KResult<()> {
    with_current(|k, cur| k.sys_close(cur, fd))
}

/// Duplicate a file descriptor onto a chosen number
pub fn dup2(oldfd: i32, newfd: i32) -> KResult<Fd> {
    with_current(|k, cur| k.sys_dup2(cur, oldfd, newfd))
}

/// Fork the current process
pub fn fork(tf: &Trapframe, entry: ThreadEntry) -> KResult<Pid> {
    with_current(|k, cur| k.sys_fork(cur, tf, entry))
}

/// Get current process ID
pub fn getpid() -> KResult<Pid> {
    with_current(|k, cur| Ok(k.sys_getpid(cur)))
}

/// Wait for a child (stub)
pub fn waitpid(pid: i32, options: i32) -> KResult<(Pid, i32)> {
    with_current(|k, cur| k.sys_waitpid(cur, pid, options))
}

/// Get current working directory
pub fn getcwd() -> KResult<PathBuf> {
    with_current(|k, cur| Ok(k.sys_getcwd(cur)))
}

/// Change working directory
pub fn chdir(path: &str) -> KResult<()> {
    with_current(|k, cur| k.sys_chdir(cur, path))
}

/// Detach the calling thread from its process and exit it
pub fn exit(code: i32) -> KResult<()> {
    let kernel = super::kernel().ok_or(KernelError::NoProcess)?;
    let proc = thread::unbind_process().ok_or(KernelError::NoProcess)?;
    kernel.sys_exit(&proc, code);
    Ok(())
}

/// Fold a result into the user return convention: the value on success,
/// minus the errno on failure
pub fn to_return(result: KResult<i64>) -> i64 {
    match result {
        Ok(value) => value,
        Err(e) => -i64::from(e.errno()),
    }
}

/// Store a result in a trapframe: `retval` and `errno` as a user program
/// sees them after the call
pub fn complete(tf: &mut Trapframe, result: KResult<i64>) {
    match result {
        Ok(value) => {
            tf.retval = value;
            tf.errno = 0;
        }
        Err(e) => {
            tf.retval = -1;
            tf.errno = e.errno();
        }
    }
}
