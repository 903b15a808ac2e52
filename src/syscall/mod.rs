//! The POSIX syscall dispatch layer (component F). Every handler receives
//! its arguments already marshalled from `a0..a5`/`a7` and returns the raw
//! value to place back into `a0` — success value or `-errno`, never an
//! exception that unwinds past this boundary (SPEC_FULL.md §7).

pub mod epoll;
pub mod file;
pub mod memory;
pub mod misc;
pub mod network;
pub mod numbers;
pub mod process;
pub mod signal;
pub mod time;

use crate::arena::SharedArena;
use crate::context::ExecuteContext;
use crate::decode::DecoderCache;
use crate::error::Errno;
use crate::jit::JitManager;
use crate::regs::RegFile;
use crate::vfs::Vfs;

/// Outcome that the dispatch loop needs to act on beyond "write a0 and keep
/// going": a successful `execve` changes `pc` out of band, and any task
/// reaching `exit`/`exit_group` may end the whole run.
pub enum SyscallEffect {
    Continue,
    Execve { new_pc: u64 },
}

/// Read a NULL-terminated array of guest pointers to NUL-terminated strings
/// (the `argv`/`envp` convention shared by `execve(2)`).
fn read_cstr_array(arena: &SharedArena, array_addr: u64) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = array_addr;
    loop {
        let ptr = arena.load_u64(cursor);
        if ptr == 0 {
            break;
        }
        out.push(String::from_utf8_lossy(&arena.memstring(ptr)).into_owned());
        cursor += 8;
    }
    out
}

pub fn handle(
    arena: &SharedArena,
    regs: &RegFile,
    ctx: &mut ExecuteContext,
    vfs: &Vfs,
    decoder: &mut DecoderCache,
    jit: &mut JitManager,
) -> SyscallEffect {
    let num = regs.syscall_number();
    let a = |i: usize| regs.syscall_arg(i);
    let exe_path = ctx.exec_path.clone();

    let result: i64 = match num {
        numbers::OPENAT => file::openat(arena, ctx, vfs, a(0) as i32, a(1), a(2) as i32),
        numbers::CLOSE => file::close(ctx, a(0) as i32),
        numbers::READ => file::read(arena, ctx, vfs, &exe_path, a(0) as i32, a(1), a(2) as usize),
        numbers::WRITE => file::write(arena, ctx, a(0) as i32, a(1), a(2) as usize),
        numbers::LSEEK => file::lseek(ctx, a(0) as i32, a(1) as i64, a(2) as i32),
        numbers::FSTAT => file::fstat(arena, ctx, vfs, &exe_path, a(0) as i32, a(1)),
        numbers::NEWFSTATAT => file::newfstatat(arena, ctx, vfs, &exe_path, a(0) as i32, a(1), a(2)),
        numbers::GETDENTS64 => file::getdents64(ctx, vfs, a(0) as i32),
        numbers::READLINKAT => file::readlinkat(arena, vfs, a(1), a(2), a(3) as usize),
        numbers::FCNTL => file::fcntl(ctx, a(0) as i32, a(1) as i32, a(2)),
        numbers::DUP | numbers::DUP3 => file::dup(ctx, a(0) as i32),
        numbers::FACCESSAT => file::faccessat(arena, ctx, vfs, &exe_path, a(1)),
        numbers::READV => misc::readv(arena, ctx, vfs, &exe_path, a(0) as i32, a(1), a(2) as i32),
        numbers::WRITEV => misc::writev(arena, ctx, a(0) as i32, a(1), a(2) as i32),
        numbers::PREAD64 => file::read(arena, ctx, vfs, &exe_path, a(0) as i32, a(1), a(2) as usize),
        numbers::PWRITE64 => file::write(arena, ctx, a(0) as i32, a(1), a(2) as usize),
        numbers::MKDIRAT => misc::mkdirat(),
        numbers::UNLINKAT => misc::unlinkat(),
        numbers::FTRUNCATE => misc::ftruncate(),
        numbers::GETCWD => misc::getcwd(arena, a(0), a(1) as usize),
        numbers::CHDIR => misc::chdir(),
        numbers::UMASK => misc::umask(),
        numbers::IOCTL => misc::ioctl(arena, ctx, a(0) as i32, a(1), a(2)),
        numbers::FCHDIR => misc::fchdir(),
        numbers::PIPE2 => misc::pipe2(),
        numbers::CAPGET => misc::capget(),
        numbers::MEMBARRIER => misc::membarrier(),
        numbers::SCHED_GETAFFINITY => misc::sched_getaffinity(arena, a(1), a(2)),
        numbers::RENAMEAT2 => file::renameat2(),
        numbers::STATX => file::statx(arena, ctx, vfs, &exe_path, a(1), a(4)),

        numbers::BRK => memory::brk(arena, ctx, a(0)),
        numbers::MMAP => memory::mmap(arena, ctx, a(0), a(1), a(2) as i32, a(3) as i32, decoder, jit),
        numbers::MUNMAP => memory::munmap(arena, a(0), a(1), decoder, jit),
        numbers::MPROTECT => memory::mprotect(arena, a(0), a(1), a(2) as i32, decoder, jit),
        numbers::MREMAP => memory::mremap(),
        numbers::MADVISE => memory::madvise(),

        numbers::EXIT => process::exit(ctx, a(0) as i32),
        numbers::EXIT_GROUP => process::exit_group(ctx, a(0) as i32),
        numbers::CLONE => process::clone(ctx, a(0), regs.pc()),
        numbers::GETPID => process::getpid(),
        numbers::GETPPID => process::getppid(),
        numbers::GETTID => process::gettid(ctx),
        numbers::SET_TID_ADDRESS => process::set_tid_address(ctx),
        numbers::SCHED_YIELD => process::sched_yield(ctx),
        numbers::GETUID | numbers::GETEUID | numbers::GETGID | numbers::GETEGID => process::getuid(),
        numbers::WAIT4 => process::wait4(),
        numbers::KILL | numbers::TGKILL => process::kill(),
        numbers::PRLIMIT64 => process::prlimit64(),
        numbers::PRCTL => process::prctl(),
        numbers::EXECVE => {
            let argv = read_cstr_array(arena, a(1));
            let envp = read_cstr_array(arena, a(2));
            match process::execve(arena, regs, ctx, vfs, a(0), argv, envp) {
                Ok(new_pc) => {
                    decoder.evict_all();
                    return SyscallEffect::Execve { new_pc };
                }
                Err(e) => e.as_guest_result(),
            }
        }

        numbers::RT_SIGACTION => signal::rt_sigaction(),
        numbers::RT_SIGPROCMASK => signal::rt_sigprocmask(),
        numbers::RT_SIGRETURN => signal::rt_sigreturn(),
        numbers::SIGALTSTACK => signal::sigaltstack(),

        numbers::CLOCK_GETTIME => {
            time::clock_gettime(arena, a(0) as i32, a(1));
            0
        }
        numbers::GETTIMEOFDAY => {
            time::gettimeofday(arena, a(0));
            0
        }
        numbers::NANOSLEEP | numbers::CLOCK_NANOSLEEP => time::nanosleep(),
        numbers::CLOCK_GETRES => time::clock_getres(arena, a(1)),

        numbers::SOCKET => network::socket(ctx, a(0) as i32, a(1) as i32),
        numbers::BIND => network::bind(arena, ctx, a(0) as i32, a(1), a(2) as usize),
        numbers::LISTEN => network::listen(ctx, a(0) as i32),
        numbers::ACCEPT4 => network::accept4(),
        numbers::CONNECT => network::connect(arena, ctx, a(0) as i32, a(1), a(2) as usize),
        numbers::SENDTO => network::sendto(arena, ctx, a(0) as i32, a(1), a(2) as usize),
        numbers::RECVFROM => network::recvfrom(arena, ctx, a(0) as i32, a(1), a(2) as usize),
        numbers::SETSOCKOPT => network::setsockopt(),
        numbers::GETSOCKOPT => network::getsockopt(),
        numbers::SHUTDOWN => network::shutdown(ctx, a(0) as i32),

        numbers::EPOLL_CREATE1 => epoll::epoll_create1(ctx),
        numbers::EPOLL_CTL => epoll::epoll_ctl(arena, ctx, a(0) as i32, a(1) as i32, a(2) as i32, a(3)),
        numbers::EPOLL_PWAIT => epoll::epoll_pwait(arena, ctx, a(0) as i32, a(1), a(2) as i32),
        numbers::EVENTFD2 => epoll::eventfd2(ctx, a(0)),

        numbers::UNAME => {
            misc::uname(arena, a(0));
            0
        }
        numbers::GETRANDOM => misc::getrandom(arena, a(0), a(1) as usize),
        numbers::FUTEX => misc::futex(arena, ctx, a(0), a(1) as i32, a(2) as u32, a(3) as u32),

        _ => Errno::ENOSYS.as_guest_result(),
    };

    tracing::debug!(event = "syscall", num, a0 = a(0), a1 = a(1), result);
    regs.set_result(result);
    SyscallEffect::Continue
}
