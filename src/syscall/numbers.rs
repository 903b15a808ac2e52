//! RV64 Linux syscall numbers (the generic `asm-generic/unistd.h` table that
//! every non-x86 Linux syscall ABI, including riscv64, shares).

pub const IOCTL: u64 = 29;
pub const FACCESSAT: u64 = 48;
pub const MKDIRAT: u64 = 34;
pub const UNLINKAT: u64 = 35;
pub const FTRUNCATE: u64 = 46;
pub const GETCWD: u64 = 17;
pub const CHDIR: u64 = 49;
pub const UMASK: u64 = 166;
pub const PRCTL: u64 = 167;
pub const DUP: u64 = 23;
pub const DUP3: u64 = 24;
pub const FCNTL: u64 = 25;
pub const EVENTFD2: u64 = 19;
pub const EPOLL_CREATE1: u64 = 20;
pub const EPOLL_CTL: u64 = 21;
pub const EPOLL_PWAIT: u64 = 22;
pub const GETDENTS64: u64 = 61;
pub const LSEEK: u64 = 62;
pub const READ: u64 = 63;
pub const WRITE: u64 = 64;
pub const READV: u64 = 65;
pub const WRITEV: u64 = 66;
pub const PREAD64: u64 = 67;
pub const PWRITE64: u64 = 68;
pub const READLINKAT: u64 = 78;
pub const NEWFSTATAT: u64 = 79;
pub const FSTAT: u64 = 80;
pub const EXIT: u64 = 93;
pub const EXIT_GROUP: u64 = 94;
pub const SET_TID_ADDRESS: u64 = 96;
pub const FUTEX: u64 = 98;
pub const NANOSLEEP: u64 = 101;
pub const CLOCK_NANOSLEEP: u64 = 115;
pub const SCHED_YIELD: u64 = 124;
pub const KILL: u64 = 129;
pub const TGKILL: u64 = 131;
pub const RT_SIGACTION: u64 = 134;
pub const RT_SIGPROCMASK: u64 = 135;
pub const RT_SIGRETURN: u64 = 139;
pub const UNAME: u64 = 160;
pub const GETTIMEOFDAY: u64 = 169;
pub const GETUID: u64 = 174;
pub const GETEUID: u64 = 175;
pub const GETGID: u64 = 176;
pub const GETEGID: u64 = 177;
pub const GETTID: u64 = 178;
pub const GETPID: u64 = 172;
pub const GETPPID: u64 = 173;
pub const SOCKET: u64 = 198;
pub const BIND: u64 = 200;
pub const LISTEN: u64 = 201;
pub const CONNECT: u64 = 203;
pub const SENDTO: u64 = 206;
pub const RECVFROM: u64 = 207;
pub const SETSOCKOPT: u64 = 208;
pub const GETSOCKOPT: u64 = 209;
pub const SHUTDOWN: u64 = 210;
pub const CLOCK_GETTIME: u64 = 113;
pub const BRK: u64 = 214;
pub const MUNMAP: u64 = 215;
pub const MREMAP: u64 = 216;
pub const CLONE: u64 = 220;
pub const EXECVE: u64 = 221;
pub const MMAP: u64 = 222;
pub const MPROTECT: u64 = 226;
pub const ACCEPT4: u64 = 242;
pub const WAIT4: u64 = 260;
pub const PRLIMIT64: u64 = 261;
pub const GETRANDOM: u64 = 278;
pub const OPENAT: u64 = 56;
pub const CLOSE: u64 = 57;
pub const MADVISE: u64 = 233;
pub const PIPE2: u64 = 59;
pub const FCHDIR: u64 = 50;
pub const SIGALTSTACK: u64 = 132;
pub const CAPGET: u64 = 90;
pub const MEMBARRIER: u64 = 283;
pub const SCHED_GETAFFINITY: u64 = 123;
pub const CLOCK_GETRES: u64 = 114;
pub const RENAMEAT2: u64 = 276;
pub const STATX: u64 = 291;
// No standalone `fork` number: the generic riscv64 ABI only exposes `clone`;
// glibc's `fork()` is a thin `clone(SIGCHLD, ...)` wrapper handled by CLONE.
