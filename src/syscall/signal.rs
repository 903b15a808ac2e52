//! Signal-related syscalls. SPEC_FULL.md §5 explicitly excludes asynchronous
//! signal delivery from this emulator's concurrency model — these handlers
//! accept the registrations a libc startup path makes (so it does not
//! observe a new, unexpected failure) without ever actually delivering
//! anything.

use crate::error::Errno;

pub fn rt_sigaction() -> i64 {
    0
}

pub fn rt_sigprocmask() -> i64 {
    0
}

pub fn rt_sigreturn() -> i64 {
    Errno::ENOSYS.as_guest_result()
}

pub fn tgkill() -> i64 {
    Errno::EPERM.as_guest_result()
}

/// `sigaltstack(2)`: accept registration of an alternate signal stack without
/// ever switching onto it, for the same reason as `rt_sigaction` above.
pub fn sigaltstack() -> i64 {
    0
}
