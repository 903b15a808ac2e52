//! Error taxonomy: guest-visible errno, host-fatal faults, and transient JIT
//! errors. See SPEC_FULL.md §7.

use thiserror::Error;

/// A POSIX errno value returned to the guest as `-errno` in `a0`.
///
/// Kept as a thin newtype over the raw Linux-ABI value (not `nix::errno::Errno`,
/// whose discriminants are host-OS-dependent) so syscall handlers can always
/// produce guest-correct numbers regardless of what platform `rvsim` itself
/// runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl Errno {
    pub const EPERM: Errno = Errno(1);
    pub const ENOENT: Errno = Errno(2);
    pub const ESRCH: Errno = Errno(3);
    pub const EINTR: Errno = Errno(4);
    pub const EIO: Errno = Errno(5);
    pub const ENXIO: Errno = Errno(6);
    pub const EBADF: Errno = Errno(9);
    pub const EAGAIN: Errno = Errno(11);
    pub const ENOMEM: Errno = Errno(12);
    pub const EACCES: Errno = Errno(13);
    pub const EFAULT: Errno = Errno(14);
    pub const EEXIST: Errno = Errno(17);
    pub const ENOTDIR: Errno = Errno(20);
    pub const EISDIR: Errno = Errno(21);
    pub const EINVAL: Errno = Errno(22);
    pub const ENFILE: Errno = Errno(23);
    pub const EMFILE: Errno = Errno(24);
    pub const ENOTTY: Errno = Errno(25);
    pub const EPIPE: Errno = Errno(32);
    pub const ENAMETOOLONG: Errno = Errno(36);
    pub const ENOSYS: Errno = Errno(38);
    pub const ELOOP: Errno = Errno(40);
    pub const ENOTSOCK: Errno = Errno(88);
    pub const ECONNREFUSED: Errno = Errno(111);
    pub const EROFS: Errno = Errno(30);

    /// Encode as the `-errno` value written to `a0`.
    pub fn as_guest_result(self) -> i64 {
        -(self.0 as i64)
    }
}

/// The kind of host-level out-of-bounds access that produced a `SegmentationFault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Load,
    Store,
    Fetch,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::Load => "load",
            FaultKind::Store => "store",
            FaultKind::Fetch => "fetch",
        };
        write!(f, "{s}")
    }
}

/// An error that is always converted into a negative errno for the guest and
/// never propagates past the syscall handler that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest fault: errno {}", .0.0)]
pub struct GuestFault(pub Errno);

impl From<Errno> for GuestFault {
    fn from(e: Errno) -> Self {
        GuestFault(e)
    }
}

/// An unrecoverable host-side condition. Logged once and the process exits.
#[derive(Debug, Error)]
pub enum HostFatal {
    #[error("segmentation fault ({kind}) at addr={addr:#x}")]
    SegmentationFault { addr: u64, kind: FaultKind },
    #[error("decoder cache corruption at pc={pc:#x}")]
    DecoderCorruption { pc: u64 },
    #[error("jit module instantiation failed for region at {region:#x}")]
    JitInstantiation { region: u64 },
}

impl HostFatal {
    /// The PC to report in the `FATAL: <kind> at pc=<hex>` diagnostic line.
    pub fn pc(&self) -> u64 {
        match self {
            HostFatal::SegmentationFault { addr, .. } => *addr,
            HostFatal::DecoderCorruption { pc } => *pc,
            HostFatal::JitInstantiation { region } => *region,
        }
    }

    /// `128 + signal` exit code used when this fault terminates the process.
    pub fn exit_code(&self) -> i32 {
        let sig = match self {
            HostFatal::SegmentationFault { .. } => 11, // SIGSEGV
            HostFatal::DecoderCorruption { .. } => 4,  // SIGILL
            HostFatal::JitInstantiation { .. } => 6,   // SIGABRT
        };
        128 + sig
    }
}

/// A translation/compile failure for one JIT region. Never guest-visible;
/// caught by `JitManager::compile_region` and turned into a cooldown.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("translation failed: {0}")]
    Translate(String),
    #[error("code emission failed: {0}")]
    Emit(String),
}

/// Outcome of one dispatch-loop invocation.
pub type DispatchResult<T> = Result<T, HostFatal>;
