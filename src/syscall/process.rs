//! Process-lifecycle syscalls: `exit`/`exit_group`, `clone` (task-only, no
//! `CLONE_THREAD`), `execve`, identity getters, `wait4`/`kill` stubs.

use crate::arena::{SharedArena, STACK_TOP};
use crate::context::ExecuteContext;
use crate::elf;
use crate::error::Errno;
use crate::regs::RegFile;
use crate::vfs::Vfs;

pub fn exit(ctx: &mut ExecuteContext, code: i32) -> i64 {
    let task = ctx.scheduler.current_task_mut();
    task.exited = true;
    task.exit_code = code;
    0
}

pub fn exit_group(ctx: &mut ExecuteContext, code: i32) -> i64 {
    for t in ctx.scheduler.tasks.iter_mut() {
        t.exited = true;
        t.exit_code = code;
    }
    0
}

const CLONE_THREAD: u64 = 0x0001_0000;

/// `clone` without `CLONE_THREAD` spawns a cooperative task sharing the same
/// arena and FD table (SPEC_FULL.md §5). `CLONE_THREAD` itself is refused:
/// this emulator never runs more than one task truly concurrently.
/// `child_pc` is supplied by the dispatch loop as the calling task's own
/// `pc` (the point clone(2) returns to in both parent and child); the new
/// task is scheduled to resume there with a zero return value, while the
/// caller keeps running with the child's tid in `a0`.
pub fn clone(ctx: &mut ExecuteContext, flags: u64, child_pc: u64) -> i64 {
    if flags & CLONE_THREAD != 0 {
        return Errno::ENOSYS.as_guest_result();
    }
    ctx.scheduler.spawn(child_pc) as i64
}

pub fn getpid() -> i64 {
    1
}

/// This emulator never models a process tree, so the parent of the single
/// guest process is reported as pid 0 (the conventional "no parent"/init
/// sentinel), same as `getpid` always reporting the fixed pid 1.
pub fn getppid() -> i64 {
    0
}

pub fn gettid(ctx: &ExecuteContext) -> i64 {
    ctx.scheduler.current_task().tid as i64
}

pub fn set_tid_address(ctx: &ExecuteContext) -> i64 {
    ctx.scheduler.current_task().tid as i64
}

pub fn sched_yield(ctx: &mut ExecuteContext) -> i64 {
    ctx.scheduler.advance();
    0
}

pub fn getuid() -> i64 {
    0
}

pub fn wait4() -> i64 {
    Errno::ECHILD_FALLBACK.as_guest_result()
}

pub fn kill() -> i64 {
    Errno::EPERM.as_guest_result()
}

pub fn prlimit64() -> i64 {
    0
}

/// No guest-visible process attribute (`PR_SET_NAME`, `PR_SET_DUMPABLE`, ...)
/// is actually modeled; reporting unconditional success is safe here since no
/// caller-observable state depends on `prctl`'s effect, per stub policy (a).
pub fn prctl() -> i64 {
    0
}

impl Errno {
    #[allow(non_upper_case_globals)]
    pub const ECHILD_FALLBACK: Errno = Errno(10);
}

/// `execve`: load a new image over the existing arena, build its initial
/// stack, reset the execute context, and return the new entry point the
/// dispatch loop should jump to. The decoder cache must be fully evicted by
/// the caller (SPEC_FULL.md §9 — stale decodes must never straddle old and
/// new address spaces).
pub fn execve(
    arena: &SharedArena,
    regs: &RegFile,
    ctx: &mut ExecuteContext,
    vfs: &Vfs,
    path_addr: u64,
    argv: Vec<String>,
    envp: Vec<String>,
) -> Result<u64, Errno> {
    let path = String::from_utf8_lossy(&arena.memstring(path_addr)).into_owned();
    let resolved = vfs.resolve_checked(&path)?;
    let data = vfs.read_file(&resolved)?;
    let image = elf::load_elf(arena, data, elf::PIE_LOAD_BIAS).map_err(|_| Errno::ENOEXEC_FALLBACK)?;

    // `start_pc` is where the dispatch loop begins executing (the dynamic
    // linker's entry, if present); AT_ENTRY/AT_PHDR/AT_PHNUM always describe
    // the *main* executable, per the Linux ABI, so ld.so can find it.
    let mut start_pc = image.entry;
    let mut stack_image = image.clone();
    if let Some(interp_path) = &image.interp {
        let interp_resolved = vfs.resolve_checked(interp_path)?;
        let interp_data = vfs.read_file(&interp_resolved)?;
        let interp_image = elf::load_interp(arena, interp_data).map_err(|_| Errno::ENOEXEC_FALLBACK)?;
        start_pc = interp_image.entry;
        stack_image.load_bias = interp_image.load_bias; // AT_BASE
    }

    let mut random_bytes = [0u8; 16];
    let _ = getrandom::getrandom(&mut random_bytes);
    let sp = elf::setup_stack(arena, STACK_TOP, &argv, &envp, &stack_image, &resolved, random_bytes, image.entry);
    regs.set_x(2, sp);

    let brk_base = (image.highest_addr + 0xfff) & !0xfff;
    ctx.reset_for_execve(start_pc, brk_base, argv, envp, resolved);
    Ok(start_pc)
}
