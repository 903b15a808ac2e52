//! `epoll_create1`/`epoll_ctl`/`epoll_pwait`, and `eventfd2`. Readiness
//! follows SPEC_FULL.md §4.D exactly: VFS fds are always ready, eventfds are
//! ready once their counter is nonzero, and socket fds are polled against the
//! real host socket (`network.rs`'s sockets are host TCP/UDP handles reached
//! synchronously from the execution thread, not routed through the bridge —
//! see DESIGN.md's `network.rs` bridge-routing decision; polling the same
//! handles directly here is the readiness-check analogue of that decision).

use crate::arena::SharedArena;
use crate::context::{EpollInterest, ExecuteContext, FdEntry, FdKind, SocketHandle};
use crate::error::Errno;
use std::os::unix::io::AsRawFd;

pub fn epoll_create1(ctx: &mut ExecuteContext) -> i64 {
    ctx.fds.insert_epoll(FdKind::Epoll { interests: Default::default() }) as i64
}

const EPOLL_CTL_ADD: i32 = 1;
const EPOLL_CTL_DEL: i32 = 2;
const EPOLL_CTL_MOD: i32 = 3;

/// `event_addr` points at a guest `struct epoll_event { events: u32; data:
/// u64; }` (packed to 12 bytes — glibc packs this struct on every arch for
/// 32-bit ABI compatibility, riscv64 included).
pub fn epoll_ctl(arena: &SharedArena, ctx: &mut ExecuteContext, epfd: i32, op: i32, target_fd: i32, event_addr: u64) -> i64 {
    if ctx.fds.get(target_fd).is_none() {
        return Errno::EBADF.as_guest_result();
    }
    let interest = EpollInterest { events: arena.load_u32(event_addr), data: arena.load_u64(event_addr + 4) };
    let interests = match ctx.fds.get_mut(epfd) {
        Some(FdEntry { kind: FdKind::Epoll { interests }, .. }) => interests,
        Some(_) => return Errno::EINVAL.as_guest_result(),
        None => return Errno::EBADF.as_guest_result(),
    };
    match op {
        EPOLL_CTL_ADD | EPOLL_CTL_MOD => {
            interests.insert(target_fd, interest);
            0
        }
        EPOLL_CTL_DEL => {
            if interests.remove(&target_fd).is_some() {
                0
            } else {
                Errno::ENOENT.as_guest_result()
            }
        }
        _ => Errno::EINVAL.as_guest_result(),
    }
}

/// Non-blocking host `poll(2)` for `POLLIN` on the socket's raw fd. Zero
/// timeout: the execution thread never blocks here, matching the "Socket FDs
/// polled through the bridge" contract's non-suspending intent (the real
/// suspension points are enumerated in SPEC_FULL.md §5 and `epoll_pwait` is
/// not one of them in this build).
fn socket_has_data(handle: &SocketHandle) -> bool {
    let raw_fd = match handle {
        SocketHandle::TcpListener(l) => l.as_raw_fd(),
        SocketHandle::TcpStream(s) => s.as_raw_fd(),
        SocketHandle::Udp(u) => u.as_raw_fd(),
        SocketHandle::Unbound => return false,
    };
    let mut pfd = libc::pollfd { fd: raw_fd, events: libc::POLLIN, revents: 0 };
    let n = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, 0) };
    n > 0 && (pfd.revents & libc::POLLIN) != 0
}

fn fd_is_ready(ctx: &ExecuteContext, fd: i32) -> bool {
    match ctx.fds.get(fd).map(|e| &e.kind) {
        Some(FdKind::VfsFile { .. }) => true,
        Some(FdKind::EventFd { counter }) => *counter > 0,
        Some(FdKind::Socket { socket_id }) => ctx.sockets.get(socket_id).map(socket_has_data).unwrap_or(false),
        Some(FdKind::Stdio) => true,
        // No pipe fd is ever actually allocated (`pipe2` is a hard `-ENOSYS`
        // in this emulator), so this arm never fires; kept exhaustive rather
        // than defaulting to the wildcard below.
        Some(FdKind::Pipe { .. }) => false,
        Some(FdKind::Epoll { .. }) | None => false,
    }
}

pub fn epoll_pwait(arena: &SharedArena, ctx: &ExecuteContext, epfd: i32, events_addr: u64, max_events: i32) -> i64 {
    let interests = match ctx.fds.get(epfd) {
        Some(FdEntry { kind: FdKind::Epoll { interests }, .. }) => interests,
        Some(_) => return Errno::EINVAL.as_guest_result(),
        None => return Errno::EBADF.as_guest_result(),
    };
    if max_events <= 0 {
        return Errno::EINVAL.as_guest_result();
    }

    let mut ready_count = 0i64;
    for (&fd, interest) in interests.iter() {
        if ready_count >= max_events as i64 {
            break;
        }
        if fd_is_ready(ctx, fd) {
            let base = events_addr + (ready_count as u64) * 12;
            arena.store_u32(base, interest.events);
            arena.store_u64(base + 4, interest.data);
            ready_count += 1;
        }
    }
    ready_count
}

pub fn eventfd2(ctx: &mut ExecuteContext, initval: u64) -> i64 {
    ctx.fds.insert_vfs(FdKind::EventFd { counter: initval }, 0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, GUEST_MEMORY_BASE};
    use crate::context::ExecuteContext;

    fn setup() -> (crate::arena::SharedArena, ExecuteContext) {
        let arena = Arena::new();
        let ctx = ExecuteContext::new(0x1000, 0x4000, vec![], vec![], "/bin/a".into());
        (arena, ctx)
    }

    #[test]
    fn vfs_fd_is_always_ready() {
        let (arena, mut ctx) = setup();
        let vfs_fd = ctx.fds.insert_vfs(FdKind::VfsFile { path: "/x".into(), offset: 0 }, 0);
        let epfd = epoll_create1(&mut ctx) as i32;

        arena.store_u32(GUEST_MEMORY_BASE, 0x1); // EPOLLIN
        arena.store_u64(GUEST_MEMORY_BASE + 4, 0xcafe);
        assert_eq!(epoll_ctl(&arena, &mut ctx, epfd, EPOLL_CTL_ADD, vfs_fd, GUEST_MEMORY_BASE), 0);

        let events_addr = GUEST_MEMORY_BASE + 64;
        let n = epoll_pwait(&arena, &ctx, epfd, events_addr, 8);
        assert_eq!(n, 1);
        assert_eq!(arena.load_u32(events_addr), 0x1);
        assert_eq!(arena.load_u64(events_addr + 4), 0xcafe);
    }

    #[test]
    fn eventfd_ready_only_once_counter_nonzero() {
        let (arena, mut ctx) = setup();
        let efd = ctx.fds.insert_vfs(FdKind::EventFd { counter: 0 }, 0);
        let epfd = epoll_create1(&mut ctx) as i32;
        arena.store_u32(GUEST_MEMORY_BASE, 0x1);
        arena.store_u64(GUEST_MEMORY_BASE + 4, 0);
        epoll_ctl(&arena, &mut ctx, epfd, EPOLL_CTL_ADD, efd, GUEST_MEMORY_BASE);

        assert_eq!(epoll_pwait(&arena, &ctx, epfd, GUEST_MEMORY_BASE + 64, 8), 0);

        if let Some(FdEntry { kind: FdKind::EventFd { counter }, .. }) = ctx.fds.get_mut(efd) {
            *counter = 1;
        }
        assert_eq!(epoll_pwait(&arena, &ctx, epfd, GUEST_MEMORY_BASE + 64, 8), 1);
    }

    #[test]
    fn epoll_ctl_del_removes_interest() {
        let (arena, mut ctx) = setup();
        let vfs_fd = ctx.fds.insert_vfs(FdKind::VfsFile { path: "/x".into(), offset: 0 }, 0);
        let epfd = epoll_create1(&mut ctx) as i32;
        arena.store_u32(GUEST_MEMORY_BASE, 0x1);
        arena.store_u64(GUEST_MEMORY_BASE + 4, 0);
        epoll_ctl(&arena, &mut ctx, epfd, EPOLL_CTL_ADD, vfs_fd, GUEST_MEMORY_BASE);
        assert_eq!(epoll_ctl(&arena, &mut ctx, epfd, EPOLL_CTL_DEL, vfs_fd, GUEST_MEMORY_BASE), 0);
        assert_eq!(epoll_pwait(&arena, &ctx, epfd, GUEST_MEMORY_BASE + 64, 8), 0);
    }
}
