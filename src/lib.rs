//! tkern - the resource-management core of a teaching kernel
//!
//! Design principles:
//! - Tractable: every shared structure has exactly one lock domain
//! - Ownership is explicit: file handles are shared through reference
//!   counts, descriptor and process tables own their slots
//! - Contract violations stop the offending path, runtime failures are
//!   returned as errors
//!
//! Layout:
//! - `kernel`: synchronization primitives, file handles, descriptor and
//!   process tables, process lifecycle and the syscall boundary
//! - `vfs`: the file-system interface the kernel consumes, plus an
//!   in-memory backend with a console device

pub mod kernel;
pub mod vfs;

#[doc(hidden)]
pub use log as __log;

/// Check a caller contract. On violation the message is logged at error
/// level and the current thread panics; these are programmer errors, not
/// runtime conditions.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::kpanic!($($arg)+);
        }
    };
}

/// Log at error level and panic
#[macro_export]
macro_rules! kpanic {
    ($($arg:tt)+) => {{
        $crate::__log::error!($($arg)+);
        panic!($($arg)+)
    }};
}
