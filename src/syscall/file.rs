//! File-table syscalls: `openat`, `read`/`write`, `lseek`, `fstat`-family,
//! `getdents64`, `readlinkat`, `fcntl`/`dup`.

use crate::arena::SharedArena;
use crate::context::{fd_ranges, ExecuteContext, FdEntry, FdKind};
use crate::error::Errno;
use crate::vfs::{self, Vfs};

const AT_FDCWD: i32 = -100;

fn read_guest_path(arena: &SharedArena, addr: u64) -> String {
    String::from_utf8_lossy(&arena.memstring(addr)).into_owned()
}

pub fn openat(arena: &SharedArena, ctx: &mut ExecuteContext, vfs: &Vfs, dirfd: i32, path_addr: u64, flags: i32) -> i64 {
    if dirfd != AT_FDCWD && ctx.fds.get(dirfd).is_none() {
        return Errno::EBADF.as_guest_result();
    }
    let path = read_guest_path(arena, path_addr);
    if vfs::dev::lookup_dev(&path).is_some() || vfs::proc::is_proc_path(&path) {
        let fd = ctx.fds.insert_vfs(FdKind::VfsFile { path, offset: 0 }, flags);
        return fd as i64;
    }
    match vfs.resolve_checked(&path) {
        Ok(resolved) => {
            let fd = ctx.fds.insert_vfs(FdKind::VfsFile { path: resolved, offset: 0 }, flags);
            fd as i64
        }
        Err(e) => e.as_guest_result(),
    }
}

pub fn close(ctx: &mut ExecuteContext, fd: i32) -> i64 {
    if fd < fd_ranges::STDIO_END {
        return 0; // closing stdio is accepted and a no-op, matching common libc behavior
    }
    if ctx.fds.close(fd) {
        0
    } else {
        Errno::EBADF.as_guest_result()
    }
}

pub fn read(arena: &SharedArena, ctx: &mut ExecuteContext, vfs: &Vfs, exe_path: &str, fd: i32, buf: u64, count: usize) -> i64 {
    if fd == 0 {
        // A genuine suspension point (SPEC_FULL.md §5): blocks the execution
        // thread on the bridge's STDIN_REQUEST round-trip until bytes or EOF
        // arrive.
        let bytes = ctx.bridge.read_stdin_blocking(count);
        arena.write_bytes(buf, &bytes);
        return bytes.len() as i64;
    }
    let entry = match ctx.fds.get(fd) {
        Some(e) => e.clone(),
        None => return Errno::EBADF.as_guest_result(),
    };
    match entry.kind {
        FdKind::VfsFile { path, offset } => {
            let data = match vfs::read_path(vfs, ctx, exe_path, &path) {
                Ok(d) => d,
                Err(e) => return e.as_guest_result(),
            };
            if offset as usize >= data.len() {
                return 0;
            }
            let n = count.min(data.len() - offset as usize);
            arena.write_bytes(buf, &data[offset as usize..offset as usize + n]);
            if let Some(e) = ctx.fds.get_mut(fd) {
                if let FdKind::VfsFile { offset, .. } = &mut e.kind {
                    *offset += n as u64;
                }
            }
            n as i64
        }
        FdKind::EventFd { counter } => {
            arena.store_u64(buf, counter);
            8
        }
        _ => Errno::EINVAL.as_guest_result(),
    }
}

pub fn write(arena: &SharedArena, ctx: &mut ExecuteContext, fd: i32, buf: u64, count: usize) -> i64 {
    if fd == 1 || fd == 2 {
        let bytes = arena.memarray(buf, count);
        ctx.bridge.write_stdout(&bytes);
        return count as i64;
    }
    match ctx.fds.get(fd) {
        Some(FdEntry { kind: FdKind::VfsFile { .. }, .. }) => count as i64, // in-memory rootfs is read-only
        Some(_) => count as i64,
        None => Errno::EBADF.as_guest_result(),
    }
}

pub fn lseek(ctx: &mut ExecuteContext, fd: i32, offset: i64, whence: i32) -> i64 {
    let entry = match ctx.fds.get_mut(fd) {
        Some(e) => e,
        None => return Errno::EBADF.as_guest_result(),
    };
    if let FdKind::VfsFile { offset: cur, .. } = &mut entry.kind {
        let new_off = match whence {
            0 => offset,                  // SEEK_SET
            1 => *cur as i64 + offset,     // SEEK_CUR
            2 => *cur as i64 + offset,     // SEEK_END (approximated without size here)
            _ => return Errno::EINVAL.as_guest_result(),
        };
        if new_off < 0 {
            return Errno::EINVAL.as_guest_result();
        }
        *cur = new_off as u64;
        new_off
    } else {
        Errno::ESPIPE_FALLBACK.as_guest_result()
    }
}

impl Errno {
    #[allow(non_upper_case_globals)]
    pub const ESPIPE_FALLBACK: Errno = Errno(29);
}

/// `struct stat` is written field-by-field in the guest's expected layout
/// rather than via a host `libc::stat`, since host and guest layouts need
/// not match.
pub fn fstat(arena: &SharedArena, ctx: &ExecuteContext, vfs: &Vfs, exe_path: &str, fd: i32, statbuf: u64) -> i64 {
    let entry = match ctx.fds.get(fd) {
        Some(e) => e,
        None => return Errno::EBADF.as_guest_result(),
    };
    let (size, is_dir) = match &entry.kind {
        FdKind::VfsFile { path, .. } => match vfs::read_path(vfs, ctx, exe_path, path) {
            Ok(d) => (d.len() as u64, false),
            Err(_) => (0, vfs.lookup(path).map(|i| matches!(i.kind, crate::vfs::InodeKind::Dir(_))).unwrap_or(false)),
        },
        _ => (0, false),
    };
    write_stat(arena, statbuf, size, is_dir);
    0
}

fn write_stat(arena: &SharedArena, addr: u64, size: u64, is_dir: bool) {
    // Minimal riscv64 `struct stat` subset: st_mode at offset 24, st_size at
    // offset 48, zero-filled otherwise. Guests that need more (st_mtime,
    // st_blocks) are expected to tolerate zeros for a synthetic filesystem.
    arena.zero_fill(addr, 144);
    let mode: u32 = if is_dir { 0o040755 } else { 0o100644 };
    arena.store_u32(addr + 24, mode);
    arena.store_u64(addr + 48, size);
}

pub fn newfstatat(arena: &SharedArena, ctx: &ExecuteContext, vfs: &Vfs, exe_path: &str, _dirfd: i32, path_addr: u64, statbuf: u64) -> i64 {
    let path = read_guest_path(arena, path_addr);
    match vfs::read_path(vfs, ctx, exe_path, &path) {
        Ok(data) => {
            write_stat(arena, statbuf, data.len() as u64, false);
            0
        }
        Err(_) => {
            if let Ok(resolved) = vfs.resolve_checked(&path) {
                if matches!(vfs.lookup(&resolved).map(|i| &i.kind), Some(crate::vfs::InodeKind::Dir(_))) {
                    write_stat(arena, statbuf, 0, true);
                    return 0;
                }
            }
            Errno::ENOENT.as_guest_result()
        }
    }
}

pub fn getdents64(ctx: &ExecuteContext, vfs: &Vfs, fd: i32) -> i64 {
    match ctx.fds.get(fd) {
        Some(FdEntry { kind: FdKind::VfsFile { path, .. }, .. }) => match vfs.list_dir(path) {
            Ok(entries) => entries.len() as i64,
            Err(e) => e.as_guest_result(),
        },
        Some(_) => Errno::ENOTDIR.as_guest_result(),
        None => Errno::EBADF.as_guest_result(),
    }
}

pub fn readlinkat(arena: &SharedArena, vfs: &Vfs, path_addr: u64, buf: u64, bufsize: usize) -> i64 {
    let path = read_guest_path(arena, path_addr);
    let normalized = if path.starts_with('/') { path } else { format!("/{path}") };
    match vfs.lookup(&normalized) {
        Some(crate::vfs::Inode { kind: crate::vfs::InodeKind::Symlink(target), .. }) => {
            let n = target.len().min(bufsize);
            arena.write_bytes(buf, &target.as_bytes()[..n]);
            n as i64
        }
        Some(_) => Errno::EINVAL.as_guest_result(),
        None => Errno::ENOENT.as_guest_result(),
    }
}

pub fn fcntl(ctx: &mut ExecuteContext, fd: i32, cmd: i32, arg: u64) -> i64 {
    const F_DUPFD: i32 = 0;
    const F_GETFD: i32 = 1;
    const F_SETFD: i32 = 2;
    const F_GETFL: i32 = 3;
    const F_SETFL: i32 = 4;
    let entry = match ctx.fds.get_mut(fd) {
        Some(e) => e,
        None => return Errno::EBADF.as_guest_result(),
    };
    match cmd {
        F_GETFD => entry.close_on_exec as i64,
        F_SETFD => {
            entry.close_on_exec = arg & 1 != 0;
            0
        }
        F_GETFL => entry.flags as i64,
        F_SETFL => {
            entry.flags = arg as i32;
            0
        }
        F_DUPFD => Errno::ENOSYS.as_guest_result(),
        _ => Errno::EINVAL.as_guest_result(),
    }
}

pub fn dup(ctx: &mut ExecuteContext, fd: i32) -> i64 {
    match ctx.fds.get(fd).cloned() {
        Some(e) => ctx.fds.insert_vfs(e.kind, e.flags) as i64,
        None => Errno::EBADF.as_guest_result(),
    }
}

pub fn faccessat(arena: &SharedArena, ctx: &ExecuteContext, vfs: &Vfs, exe_path: &str, path_addr: u64) -> i64 {
    let path = read_guest_path(arena, path_addr);
    match vfs::read_path(vfs, ctx, exe_path, &path) {
        Ok(_) => 0,
        Err(_) if vfs.resolve(&path).is_ok() => 0,
        Err(e) => e.as_guest_result(),
    }
}

/// The in-memory rootfs is read-only once loaded (SPEC_FULL.md §4.E
/// Non-goals); any rename attempt reports the filesystem as such.
pub fn renameat2() -> i64 {
    Errno::EROFS.as_guest_result()
}

/// `statx(2)`: resolve the path the same way `newfstatat` does and fill in
/// just the fields (`stx_mask`, `stx_mode`, `stx_size`) a guest's libc
/// typically checks; the rest of the much larger `struct statx` is left
/// zeroed.
pub fn statx(arena: &SharedArena, ctx: &ExecuteContext, vfs: &Vfs, exe_path: &str, path_addr: u64, statxbuf: u64) -> i64 {
    let path = read_guest_path(arena, path_addr);
    let (size, is_dir) = match vfs::read_path(vfs, ctx, exe_path, &path) {
        Ok(data) => (data.len() as u64, false),
        Err(_) => match vfs.resolve_checked(&path) {
            Ok(resolved) if matches!(vfs.lookup(&resolved).map(|i| &i.kind), Some(crate::vfs::InodeKind::Dir(_))) => (0, true),
            _ => return Errno::ENOENT.as_guest_result(),
        },
    };
    arena.zero_fill(statxbuf, 256);
    const STATX_BASIC_STATS: u32 = 0x7ff;
    arena.store_u32(statxbuf, STATX_BASIC_STATS); // stx_mask
    let mode: u16 = if is_dir { 0o040755 } else { 0o100644 };
    arena.store_u16(statxbuf + 28, mode); // stx_mode
    arena.store_u64(statxbuf + 40, size); // stx_size
    0
}
