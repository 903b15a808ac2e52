//! `ExecuteContext`: the mutable state that accompanies one guest process
//! image through its lifetime — mmap/brk cursors, the FD table, the
//! cooperative task scheduler, and futex wait queues. Threaded explicitly
//! through syscall handlers rather than hung off thread-locals, so it can be
//! cleared wholesale on `execve` and serialized wholesale at checkpoint.

use crate::bridge::Bridge;
use std::collections::HashMap;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;

/// A single open-file-description-like entry. Real file content lives in the
/// VFS; this table only tracks the FD -> VFS-path/offset/flags binding plus
/// the numeric-range tagging described in SPEC_FULL.md §4.D.
#[derive(Debug, Clone)]
pub enum FdKind {
    Stdio,
    VfsFile { path: String, offset: u64 },
    Pipe { read_end: bool, buffer_id: u64 },
    EventFd { counter: u64 },
    Socket { socket_id: u64 },
    Epoll { interests: HashMap<i32, EpollInterest> },
}

/// One `epoll_ctl(ADD/MOD, ...)` registration: the subset of guest
/// `struct epoll_event` an `epoll_pwait` readiness check and reply need —
/// the interest mask and the opaque `data` word the guest expects echoed
/// back verbatim for whichever fd becomes ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpollInterest {
    pub events: u32,
    pub data: u64,
}

#[derive(Debug, Clone)]
pub struct FdEntry {
    pub kind: FdKind,
    pub flags: i32,
    pub close_on_exec: bool,
}

/// Disjoint numeric ranges so a bare FD number alone tells the dispatcher
/// which subsystem owns it, per SPEC_FULL.md §4.D.
pub mod fd_ranges {
    pub const STDIO_END: i32 = 3;
    pub const VFS_BASE: i32 = 3;
    pub const VFS_END: i32 = 1 << 16;
    pub const SOCKET_BASE: i32 = 1 << 16;
    pub const SOCKET_END: i32 = 1 << 17;
    pub const EPOLL_BASE: i32 = 1 << 17;
}

pub struct FdTable {
    entries: HashMap<i32, FdEntry>,
    next_vfs_fd: i32,
    next_socket_fd: i32,
    next_epoll_fd: i32,
}

impl FdTable {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        for fd in 0..3 {
            entries.insert(fd, FdEntry { kind: FdKind::Stdio, flags: 0, close_on_exec: false });
        }
        FdTable {
            entries,
            next_vfs_fd: fd_ranges::VFS_BASE,
            next_socket_fd: fd_ranges::SOCKET_BASE,
            next_epoll_fd: fd_ranges::EPOLL_BASE,
        }
    }

    pub fn get(&self, fd: i32) -> Option<&FdEntry> {
        self.entries.get(&fd)
    }

    pub fn get_mut(&mut self, fd: i32) -> Option<&mut FdEntry> {
        self.entries.get_mut(&fd)
    }

    /// Restore a descriptor at its original number (`checkpoint.rs`), bumping
    /// the relevant allocator past it so future `insert_vfs` calls never
    /// collide with a restored fd.
    pub fn insert_at(&mut self, fd: i32, kind: FdKind, flags: i32) {
        self.entries.insert(fd, FdEntry { kind, flags, close_on_exec: false });
        if fd >= self.next_vfs_fd && fd < fd_ranges::SOCKET_BASE {
            self.next_vfs_fd = fd + 1;
        }
    }

    pub fn insert_vfs(&mut self, kind: FdKind, flags: i32) -> i32 {
        let fd = self.next_vfs_fd;
        self.next_vfs_fd += 1;
        self.entries.insert(fd, FdEntry { kind, flags, close_on_exec: false });
        fd
    }

    pub fn insert_socket(&mut self, kind: FdKind, flags: i32) -> i32 {
        let fd = self.next_socket_fd;
        self.next_socket_fd += 1;
        self.entries.insert(fd, FdEntry { kind, flags, close_on_exec: false });
        fd
    }

    pub fn insert_epoll(&mut self, kind: FdKind) -> i32 {
        let fd = self.next_epoll_fd;
        self.next_epoll_fd += 1;
        self.entries.insert(fd, FdEntry { kind, flags: 0, close_on_exec: false });
        fd
    }

    pub fn close(&mut self, fd: i32) -> bool {
        self.entries.remove(&fd).is_some()
    }

    /// Drop every close-on-exec descriptor, called on a successful `execve`.
    pub fn exec_close(&mut self) {
        self.entries.retain(|_, e| !e.close_on_exec);
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &FdEntry)> {
        self.entries.iter().map(|(fd, entry)| (*fd, entry))
    }
}

/// One cooperative guest task (created by `clone` without `CLONE_THREAD`;
/// see SPEC_FULL.md §5 — there is no true OS-level guest multithreading).
#[derive(Debug, Clone)]
pub struct Task {
    pub tid: u32,
    pub pc: u64,
    pub blocked_on_futex: Option<u64>,
    pub exited: bool,
    pub exit_code: i32,
}

pub struct Scheduler {
    pub tasks: Vec<Task>,
    pub current: usize,
    next_tid: u32,
}

impl Scheduler {
    pub fn new(main_pc: u64) -> Self {
        Scheduler {
            tasks: vec![Task { tid: 1, pc: main_pc, blocked_on_futex: None, exited: false, exit_code: 0 }],
            current: 0,
            next_tid: 2,
        }
    }

    /// Rebuild scheduler state from a checkpoint's task list (`checkpoint.rs`).
    pub fn from_restored(tasks: Vec<Task>, current: usize) -> Self {
        let next_tid = tasks.iter().map(|t| t.tid).max().unwrap_or(0) + 1;
        Scheduler { tasks, current, next_tid }
    }

    pub fn spawn(&mut self, pc: u64) -> u32 {
        let tid = self.next_tid;
        self.next_tid += 1;
        self.tasks.push(Task { tid, pc, blocked_on_futex: None, exited: false, exit_code: 0 });
        tid
    }

    pub fn current_task(&self) -> &Task {
        &self.tasks[self.current]
    }

    pub fn current_task_mut(&mut self) -> &mut Task {
        &mut self.tasks[self.current]
    }

    /// Round-robin to the next runnable (not exited, not futex-blocked) task.
    /// Returns `false` if nothing is runnable.
    pub fn advance(&mut self) -> bool {
        let n = self.tasks.len();
        for step in 1..=n {
            let candidate = (self.current + step) % n;
            let t = &self.tasks[candidate];
            if !t.exited && t.blocked_on_futex.is_none() {
                self.current = candidate;
                return true;
            }
        }
        false
    }

    pub fn wake_futex(&mut self, addr: u64, max_wake: u32) -> u32 {
        let mut woken = 0;
        for t in self.tasks.iter_mut() {
            if woken >= max_wake {
                break;
            }
            if t.blocked_on_futex == Some(addr) {
                t.blocked_on_futex = None;
                woken += 1;
            }
        }
        woken
    }
}

/// Host-side handle backing a guest socket FD. Real byte transfer for
/// connected sockets is bridged through `bridge::netrpc` on the I/O thread;
/// the handles kept here exist so `bind`/`listen`/`getsockopt` have
/// something concrete to act on synchronously.
pub enum SocketHandle {
    TcpListener(TcpListener),
    TcpStream(TcpStream),
    Udp(UdpSocket),
    /// Allocated by `socket(2)` but not yet bound/connected.
    Unbound,
}

/// Mutable process-image state threaded through syscall handlers.
pub struct ExecuteContext {
    pub brk_current: u64,
    pub brk_base: u64,
    pub mmap_cursor: u64,
    pub fds: FdTable,
    pub scheduler: Scheduler,
    pub stdin_wait: bool,
    pub argv: Vec<String>,
    pub envp: Vec<String>,
    pub exec_path: String,
    pub sockets: HashMap<u64, SocketHandle>,
    next_socket_id: u64,
    pub bridge: Arc<Bridge>,
}

/// Start of the guest mmap arena, chosen well above any static executable's
/// load address and below the stack, matching the auxv layout in `elf.rs`.
pub const MMAP_BASE: u64 = 0x2000_0000;

impl ExecuteContext {
    pub fn new(entry_pc: u64, brk_base: u64, argv: Vec<String>, envp: Vec<String>, exec_path: String) -> Self {
        Self::with_bridge(entry_pc, brk_base, argv, envp, exec_path, Arc::new(Bridge::new()))
    }

    pub fn with_bridge(
        entry_pc: u64,
        brk_base: u64,
        argv: Vec<String>,
        envp: Vec<String>,
        exec_path: String,
        bridge: Arc<Bridge>,
    ) -> Self {
        ExecuteContext {
            brk_current: brk_base,
            brk_base,
            mmap_cursor: MMAP_BASE,
            fds: FdTable::new(),
            scheduler: Scheduler::new(entry_pc),
            stdin_wait: false,
            argv,
            envp,
            exec_path,
            sockets: HashMap::new(),
            next_socket_id: 1,
            bridge,
        }
    }

    pub fn fds_iter(&self) -> impl Iterator<Item = (i32, &FdEntry)> {
        self.fds.iter()
    }

    pub fn alloc_socket(&mut self, handle: SocketHandle) -> u64 {
        let id = self.next_socket_id;
        self.next_socket_id += 1;
        self.sockets.insert(id, handle);
        id
    }

    /// Reset to a fresh image after a successful `execve`: FDs survive
    /// modulo close-on-exec, everything else is rebuilt from scratch.
    pub fn reset_for_execve(&mut self, entry_pc: u64, brk_base: u64, argv: Vec<String>, envp: Vec<String>, exec_path: String) {
        self.fds.exec_close();
        self.brk_base = brk_base;
        self.brk_current = brk_base;
        self.mmap_cursor = MMAP_BASE;
        self.scheduler = Scheduler::new(entry_pc);
        self.stdin_wait = false;
        self.argv = argv;
        self.envp = envp;
        self.exec_path = exec_path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_table_allocates_disjoint_ranges() {
        let mut fds = FdTable::new();
        let vfs_fd = fds.insert_vfs(FdKind::VfsFile { path: "/x".into(), offset: 0 }, 0);
        let sock_fd = fds.insert_socket(FdKind::Socket { socket_id: 1 }, 0);
        assert!(vfs_fd >= fd_ranges::VFS_BASE && vfs_fd < fd_ranges::SOCKET_BASE);
        assert!(sock_fd >= fd_ranges::SOCKET_BASE);
    }

    #[test]
    fn scheduler_round_robins_and_skips_blocked() {
        let mut sched = Scheduler::new(0x1000);
        sched.spawn(0x2000);
        sched.tasks[1].blocked_on_futex = Some(0x500);
        assert!(sched.advance());
        assert_eq!(sched.current, 0); // task 1 is blocked, stays on task 0
    }

    #[test]
    fn execve_closes_cloexec_fds_but_keeps_others() {
        let mut ctx = ExecuteContext::new(0x1000, 0x4000, vec![], vec![], "/bin/a".into());
        let fd = ctx.fds.insert_vfs(FdKind::VfsFile { path: "/x".into(), offset: 0 }, 0);
        ctx.fds.get_mut(fd).unwrap().close_on_exec = true;
        ctx.reset_for_execve(0x1000, 0x4000, vec![], vec![], "/bin/b".into());
        assert!(ctx.fds.get(fd).is_none());
        assert!(ctx.fds.get(0).is_some());
    }
}
