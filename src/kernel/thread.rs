//! Thread context
//!
//! Host threads stand in for kernel threads. Each thread carries two bits
//! of context: whether it is currently servicing an interrupt, and which
//! process (if any) it runs on behalf of.

use super::error::{KResult, kstrdup};
use super::process::Process;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

thread_local! {
    static IN_INTERRUPT: Cell<bool> = const { Cell::new(false) };
    static CURPROC: RefCell<Option<Arc<Process>>> = const { RefCell::new(None) };
}

/// Identity of the calling thread, used as the owner of a `Lock`
pub fn curthread() -> ThreadId {
    std::thread::current().id()
}

/// True while the calling thread is inside an `InterruptContext`
pub fn in_interrupt() -> bool {
    IN_INTERRUPT.with(|flag| flag.get())
}

/// Marks the calling thread as servicing an interrupt until dropped.
///
/// Blocking primitives refuse to sleep while this is alive.
pub struct InterruptContext {
    prev: bool,
    _not_send: PhantomData<*const ()>,
}

pub fn enter_interrupt() -> InterruptContext {
    let prev = IN_INTERRUPT.with(|flag| flag.replace(true));
    InterruptContext {
        prev,
        _not_send: PhantomData,
    }
}

impl Drop for InterruptContext {
    fn drop(&mut self) {
        IN_INTERRUPT.with(|flag| flag.set(self.prev));
    }
}

/// The process the calling thread runs on behalf of
pub fn current_process() -> Option<Arc<Process>> {
    CURPROC.with(|cur| cur.borrow().clone())
}

/// Binding between the calling thread and a process. Dropping it detaches
/// the thread, unless `leave_process` already did.
pub struct ProcessBinding {
    _not_send: PhantomData<*const ()>,
}

impl Drop for ProcessBinding {
    fn drop(&mut self) {
        let _ = leave_process();
    }
}

/// Attach the calling thread to `proc` and make it current.
pub fn enter_process(proc: Arc<Process>) -> ProcessBinding {
    proc.attach_thread();
    bind(proc)
}

/// Make an already attached process current on this thread
fn bind(proc: Arc<Process>) -> ProcessBinding {
    crate::kassert!(
        current_process().is_none(),
        "thread {:?} is already bound to a process",
        curthread()
    );
    proc.activate();
    CURPROC.with(|cur| *cur.borrow_mut() = Some(proc));
    ProcessBinding {
        _not_send: PhantomData,
    }
}

/// Detach the calling thread from its current process and return it.
/// The process stays alive even if no thread is left; only `exit`
/// destroys it.
pub fn leave_process() -> Option<Arc<Process>> {
    let proc = unbind_process()?;
    proc.detach_thread();
    Some(proc)
}

/// Clear the current process without detaching from it. The caller takes
/// over the attachment.
pub(super) fn unbind_process() -> Option<Arc<Process>> {
    CURPROC.with(|cur| cur.borrow_mut().take())
}

/// Saved user register state at the point of a system call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trapframe {
    pub retval: i64,
    pub errno: i32,
    pub pc: u64,
    pub sp: u64,
    pub args: [u64; 4],
}

/// Width of the syscall instruction
const SYSCALL_INSN_LEN: u64 = 4;

impl Trapframe {
    /// The frame a forked child resumes with: the call succeeded, returned
    /// 0, and execution continues after the syscall instruction.
    pub fn forked_child(&self) -> Trapframe {
        Trapframe {
            retval: 0,
            errno: 0,
            pc: self.pc.wrapping_add(SYSCALL_INSN_LEN),
            ..*self
        }
    }
}

/// Code a new thread runs once it is bound to its process
pub type ThreadEntry = Box<dyn FnOnce(Trapframe) + Send + 'static>;

/// Start a thread that runs `entry(tf)` on behalf of `proc`.
///
/// The thread is counted against `proc` before this returns, so the
/// process cannot be torn down underneath it.
pub fn fork_thread(
    name: &str,
    proc: Arc<Process>,
    tf: Trapframe,
    entry: ThreadEntry,
) -> KResult<JoinHandle<()>> {
    let name = kstrdup(name)?;
    proc.attach_thread();
    let child = Arc::clone(&proc);
    let spawned = std::thread::Builder::new().name(name).spawn(move || {
        let _binding = bind(child);
        entry(tf);
    });
    match spawned {
        Ok(handle) => Ok(handle),
        Err(e) => {
            proc.detach_thread();
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_context_nests() {
        assert!(!in_interrupt());
        {
            let _outer = enter_interrupt();
            assert!(in_interrupt());
            {
                let _inner = enter_interrupt();
                assert!(in_interrupt());
            }
            assert!(in_interrupt());
        }
        assert!(!in_interrupt());
    }

    #[test]
    fn test_forked_child_frame() {
        let tf = Trapframe {
            retval: 17,
            errno: 9,
            pc: 0x400100,
            sp: 0x7fff_0000,
            args: [1, 2, 3, 4],
        };
        let child = tf.forked_child();
        assert_eq!(child.retval, 0);
        assert_eq!(child.errno, 0);
        assert_eq!(child.pc, 0x400104);
        assert_eq!(child.sp, tf.sp);
        assert_eq!(child.args, tf.args);
    }

    #[test]
    fn test_curthread_differs_across_threads() {
        let here = curthread();
        let there = std::thread::spawn(curthread).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_bind_and_leave() {
        let proc = Arc::new(Process::new("binder", 4, 8).unwrap());
        assert!(current_process().is_none());
        {
            let _binding = enter_process(Arc::clone(&proc));
            assert_eq!(proc.thread_count(), 1);
            assert!(Arc::ptr_eq(&current_process().unwrap(), &proc));
        }
        assert!(current_process().is_none());
        assert_eq!(proc.thread_count(), 0);
    }

    #[test]
    fn test_unbind_keeps_attachment() {
        let proc = Arc::new(Process::new("handoff", 4, 8).unwrap());
        let binding = enter_process(Arc::clone(&proc));
        let taken = unbind_process().unwrap();
        assert!(Arc::ptr_eq(&taken, &proc));
        assert_eq!(proc.thread_count(), 1);
        drop(binding);
        assert_eq!(proc.thread_count(), 1);
        assert!(taken.detach_thread());
    }

    #[test]
    fn test_fork_thread_runs_bound() {
        let proc = Arc::new(Process::new("child", 4, 8).unwrap());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let tf = Trapframe {
            pc: 8,
            ..Default::default()
        };
        let handle = fork_thread(
            "child",
            Arc::clone(&proc),
            tf,
            Box::new(move |tf| {
                let cur = current_process().map(|p| p.name().to_string());
                *seen2.lock().unwrap() = Some((cur, tf.pc));
            }),
        )
        .unwrap();
        handle.join().unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            Some((Some("child".to_string()), 8))
        );
        assert_eq!(proc.thread_count(), 0);
    }
}
