//! The remaining syscalls that don't cleanly fit file/memory/process/net:
//! `uname`, `getrandom`, `futex`, `ioctl`, `readv`/`writev`, `getcwd`, and
//! the handful of filesystem-mutation calls the in-memory rootfs treats as
//! no-ops because it is read-only (SPEC_FULL.md §4.E Non-goals).

use crate::arena::SharedArena;
use crate::context::ExecuteContext;
use crate::error::Errno;
use getrandom::getrandom as host_getrandom;

const UTSNAME_FIELD: usize = 65;

pub fn uname(arena: &SharedArena, buf: u64) {
    let fields: [&str; 6] = ["Linux", "rvsim", "6.1.0-rvsim", "#1 SMP PREEMPT", "riscv64", "rvsim.local"];
    for (i, field) in fields.iter().enumerate() {
        let offset = buf + (i * UTSNAME_FIELD) as u64;
        arena.write_bytes(offset, field.as_bytes());
        arena.store_u8(offset + field.len() as u64, 0);
    }
}

/// Host entropy by default. Deterministic-replay runs intercept this one
/// layer up, in the dispatcher, before this ever executes (SPEC_FULL.md §9).
pub fn getrandom(arena: &SharedArena, buf: u64, len: usize) -> i64 {
    let mut tmp = vec![0u8; len];
    if host_getrandom(&mut tmp).is_err() {
        return Errno::EIO.as_guest_result();
    }
    arena.write_bytes(buf, &tmp);
    len as i64
}

const FUTEX_WAIT: i32 = 0;
const FUTEX_WAKE: i32 = 1;
const FUTEX_MASK: i32 = 0xf;

/// A single-task-at-a-time emulator never truly blocks on `FUTEX_WAIT`: the
/// cooperative scheduler marks the task blocked and yields, to be woken by a
/// matching `FUTEX_WAKE` from another task (SPEC_FULL.md §5 scheduling note).
pub fn futex(arena: &SharedArena, ctx: &mut ExecuteContext, uaddr: u64, op: i32, val: u32, wake_count: u32) -> i64 {
    match op & FUTEX_MASK {
        FUTEX_WAIT => {
            let current = arena.load_u32(uaddr);
            if current != val {
                return Errno::EAGAIN.as_guest_result();
            }
            ctx.scheduler.current_task_mut().blocked_on_futex = Some(uaddr);
            0
        }
        FUTEX_WAKE => ctx.scheduler.wake_futex(uaddr, wake_count) as i64,
        _ => Errno::ENOSYS.as_guest_result(),
    }
}

const TCGETS: u64 = 0x5401;
const TIOCGWINSZ: u64 = 0x5413;

/// Enough `ioctl` surface for a guest to detect it is *not* attached to a
/// real terminal (`TCGETS` fails) while still tolerating `TIOCGWINSZ`
/// probes some libcs issue unconditionally.
pub fn ioctl(arena: &SharedArena, ctx: &ExecuteContext, fd: i32, request: u64, argp: u64) -> i64 {
    match request {
        TCGETS if fd <= 2 => Errno::ENOTTY.as_guest_result(),
        TIOCGWINSZ => {
            let (cols, rows) = ctx.bridge.control.terminal_size();
            arena.store_u16(argp, rows as u16);
            arena.store_u16(argp + 2, cols as u16);
            0
        }
        _ => Errno::ENOTTY.as_guest_result(),
    }
}

pub fn getcwd(arena: &SharedArena, buf: u64, size: usize) -> i64 {
    let cwd = b"/";
    if size < cwd.len() + 1 {
        return Errno::ERANGE_FALLBACK.as_guest_result();
    }
    arena.write_bytes(buf, cwd);
    arena.store_u8(buf + cwd.len() as u64, 0);
    buf as i64
}

impl Errno {
    #[allow(non_upper_case_globals)]
    pub const ERANGE_FALLBACK: Errno = Errno(34);
}

pub fn chdir() -> i64 {
    0
}

pub fn umask() -> i64 {
    0o022
}

/// The rootfs is read-only once loaded; these accept the call (so a guest
/// that creates a scratch directory under `/tmp` does not see a surprising
/// hard failure) without actually mutating the VFS tree.
pub fn mkdirat() -> i64 {
    0
}

pub fn unlinkat() -> i64 {
    0
}

pub fn ftruncate() -> i64 {
    0
}

pub fn readv(arena: &SharedArena, ctx: &mut ExecuteContext, vfs: &crate::vfs::Vfs, exe_path: &str, fd: i32, iov: u64, iovcnt: i32) -> i64 {
    let mut total = 0i64;
    for i in 0..iovcnt {
        let entry = iov + (i as u64) * 16;
        let base = arena.load_u64(entry);
        let len = arena.load_u64(entry + 8) as usize;
        let n = super::file::read(arena, ctx, vfs, exe_path, fd, base, len);
        if n < 0 {
            return if total > 0 { total } else { n };
        }
        total += n;
        if (n as usize) < len {
            break;
        }
    }
    total
}

pub fn fchdir() -> i64 {
    0
}

/// `pipe2(2)`: no pipe plumbing in this emulator (no process fork ever
/// produces a second reader); accept the call but hand back closed-looking
/// fds is worse than refusing outright, so this is a hard `-ENOSYS` rather
/// than a silent no-op (a guest that actually reads/writes the pipe must see
/// a failure, not garbage).
pub fn pipe2() -> i64 {
    Errno::ENOSYS.as_guest_result()
}

pub fn capget() -> i64 {
    Errno::EINVAL.as_guest_result()
}

/// `membarrier(2)`: single-threaded-per-task execution needs no real memory
/// barrier; `MEMBARRIER_CMD_QUERY` (0) reports no commands supported.
pub fn membarrier() -> i64 {
    0
}

pub fn sched_getaffinity(arena: &SharedArena, cpusetsize: u64, mask: u64) -> i64 {
    if cpusetsize == 0 {
        return Errno::EINVAL.as_guest_result();
    }
    arena.store_u8(mask, 0x1);
    for i in 1..cpusetsize {
        arena.store_u8(mask + i, 0);
    }
    8
}

pub fn writev(arena: &SharedArena, ctx: &mut ExecuteContext, fd: i32, iov: u64, iovcnt: i32) -> i64 {
    let mut total = 0i64;
    for i in 0..iovcnt {
        let entry = iov + (i as u64) * 16;
        let base = arena.load_u64(entry);
        let len = arena.load_u64(entry + 8) as usize;
        let n = super::file::write(arena, ctx, fd, base, len);
        if n < 0 {
            return if total > 0 { total } else { n };
        }
        total += n;
    }
    total
}
