//! Checkpoint save/restore (SPEC_FULL.md §6): CPU state, mm cursors, execute
//! context, scheduler state, the executable page list, and a sparse arena
//! encoding — enough to resume a guest exactly where it left off.

use crate::arena::{SharedArena, ARENA_SIZE, NUM_PAGES};
use crate::context::{ExecuteContext, FdKind, Scheduler, Task};
use crate::regs::RegFile;
use anyhow::{bail, Context, Result};
use std::io::{Read, Write};

const MAGIC: &[u8; 8] = b"RVSIMCKP";
const VERSION: u32 = 1;

/// 64 KiB scan granularity for the sparse arena encoding; an all-zero chunk
/// this size is skipped entirely rather than written out.
const SCAN_CHUNK: u64 = 64 * 1024;
const SPARSE_TERMINATOR: u64 = 0xFFFF_FFFF_FFFF_FFFF;

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u64(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

/// Serialize the full checkpoint to `writer`.
pub fn save(
    writer: &mut impl Write,
    arena: &SharedArena,
    regs: &RegFile,
    ctx: &ExecuteContext,
) -> Result<()> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    write_u32(&mut out, VERSION);

    // CPU state: PC, FCSR, 32 integer registers, 32 FP registers.
    write_u64(&mut out, regs.pc());
    write_u32(&mut out, regs.fcsr());
    for i in 0..32 {
        write_u64(&mut out, regs.x(i));
    }
    for i in 0..32 {
        write_u64(&mut out, regs.f64(i).to_bits());
    }

    // Memory-management cursors.
    write_u64(&mut out, ctx.mmap_cursor);
    write_u64(&mut out, ctx.brk_base);
    write_u64(&mut out, ctx.brk_current);

    // Execute-context struct.
    write_string(&mut out, &ctx.exec_path);
    write_u64(&mut out, ctx.argv.len() as u64);
    for a in &ctx.argv {
        write_string(&mut out, a);
    }
    write_u64(&mut out, ctx.envp.len() as u64);
    for e in &ctx.envp {
        write_string(&mut out, e);
    }

    // Thread scheduler state.
    save_scheduler(&mut out, &ctx.scheduler);

    // Open file descriptors, excluding stdio (recreated implicitly on load).
    let vfs_fds: Vec<(i32, String, u64)> = ctx
        .fds_iter()
        .filter_map(|(fd, entry)| match &entry.kind {
            FdKind::VfsFile { path, offset } => Some((fd, path.clone(), *offset)),
            _ => None,
        })
        .collect();
    write_u64(&mut out, vfs_fds.len() as u64);
    for (fd, path, offset) in vfs_fds {
        write_u32(&mut out, fd as u32);
        write_string(&mut out, &path);
        write_u64(&mut out, offset);
    }

    // Executable page numbers (for the JIT/decoder to re-seed attribute
    // state without re-running every mprotect/segment load).
    let exec_pages: Vec<u64> = (0..NUM_PAGES as u64).filter(|&p| arena.get_page_attr(p).x).collect();
    write_u64(&mut out, exec_pages.len() as u64);
    for p in exec_pages {
        write_u64(&mut out, p);
    }

    // Sparse arena encoding: {guest_addr:u64, len:u64, bytes...} chunks,
    // skipping all-zero 64 KiB scans, terminated by {u64::MAX, 0}.
    let mut addr = 0u64;
    while addr < ARENA_SIZE as u64 {
        let len = SCAN_CHUNK.min(ARENA_SIZE as u64 - addr);
        let bytes = arena.memarray(addr, len as usize);
        if bytes.iter().any(|&b| b != 0) {
            write_u64(&mut out, addr);
            write_u64(&mut out, len);
            out.extend_from_slice(&bytes);
        }
        addr += len;
    }
    write_u64(&mut out, SPARSE_TERMINATOR);
    write_u64(&mut out, 0);

    writer.write_all(&out).context("writing checkpoint")
}

fn save_scheduler(out: &mut Vec<u8>, scheduler: &Scheduler) {
    write_u64(out, scheduler.tasks.len() as u64);
    write_u64(out, scheduler.current as u64);
    for t in &scheduler.tasks {
        write_u32(out, t.tid);
        write_u64(out, t.pc);
        write_u64(out, t.blocked_on_futex.unwrap_or(SPARSE_TERMINATOR));
        out.push(t.exited as u8);
        write_u32(out, t.exit_code as u32);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u32(&mut self) -> Result<u32> {
        let v = u32::from_le_bytes(self.buf.get(self.pos..self.pos + 4).context("truncated checkpoint")?.try_into()?);
        self.pos += 4;
        Ok(v)
    }
    fn u64(&mut self) -> Result<u64> {
        let v = u64::from_le_bytes(self.buf.get(self.pos..self.pos + 8).context("truncated checkpoint")?.try_into()?);
        self.pos += 8;
        Ok(v)
    }
    fn u8(&mut self) -> Result<u8> {
        let v = *self.buf.get(self.pos).context("truncated checkpoint")?;
        self.pos += 1;
        Ok(v)
    }
    fn string(&mut self) -> Result<String> {
        let len = self.u64()? as usize;
        let bytes = self.buf.get(self.pos..self.pos + len).context("truncated checkpoint")?;
        self.pos += len;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let b = self.buf.get(self.pos..self.pos + len).context("truncated checkpoint")?;
        self.pos += len;
        Ok(b)
    }
}

/// The execute-context fields restored alongside CPU/arena state; the
/// scheduler and FD table are rebuilt fresh by the caller from this.
pub struct RestoredContext {
    pub exec_path: String,
    pub argv: Vec<String>,
    pub envp: Vec<String>,
    pub mmap_cursor: u64,
    pub brk_base: u64,
    pub brk_current: u64,
    pub vfs_fds: Vec<(i32, String, u64)>,
    pub tasks: Vec<Task>,
    pub current_task: usize,
}

/// Deserialize a checkpoint previously written by `save`, applying CPU state
/// and arena bytes directly and returning the rest for the caller to wire
/// into a fresh `ExecuteContext`.
pub fn load(data: &[u8], arena: &SharedArena, regs: &RegFile) -> Result<RestoredContext> {
    if data.len() < 12 || &data[0..8] != MAGIC {
        bail!("not an rvsim checkpoint (bad magic)");
    }
    let mut r = Reader { buf: data, pos: 8 };
    let version = r.u32()?;
    if version != VERSION {
        bail!("unsupported checkpoint version {version}");
    }

    let pc = r.u64()?;
    let fcsr = r.u32()?;
    let mut xregs = [0u64; 32];
    for slot in xregs.iter_mut() {
        *slot = r.u64()?;
    }
    let mut fregs = [0u64; 32];
    for slot in fregs.iter_mut() {
        *slot = r.u64()?;
    }
    regs.set_pc(pc);
    regs.set_fcsr(fcsr);
    for (i, v) in xregs.iter().enumerate() {
        regs.set_x(i, *v);
    }
    for (i, v) in fregs.iter().enumerate() {
        regs.set_f64(i, f64::from_bits(*v));
    }

    let mmap_cursor = r.u64()?;
    let brk_base = r.u64()?;
    let brk_current = r.u64()?;

    let exec_path = r.string()?;
    let argc = r.u64()?;
    let mut argv = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        argv.push(r.string()?);
    }
    let envc = r.u64()?;
    let mut envp = Vec::with_capacity(envc as usize);
    for _ in 0..envc {
        envp.push(r.string()?);
    }

    let task_count = r.u64()?;
    let current_task = r.u64()? as usize;
    let mut tasks = Vec::with_capacity(task_count as usize);
    for _ in 0..task_count {
        let tid = r.u32()?;
        let pc = r.u64()?;
        let futex_raw = r.u64()?;
        let blocked_on_futex = if futex_raw == SPARSE_TERMINATOR { None } else { Some(futex_raw) };
        let exited = r.u8()? != 0;
        let exit_code = r.u32()? as i32;
        tasks.push(Task { tid, pc, blocked_on_futex, exited, exit_code });
    }

    let fd_count = r.u64()?;
    let mut vfs_fds = Vec::with_capacity(fd_count as usize);
    for _ in 0..fd_count {
        let fd = r.u32()? as i32;
        let path = r.string()?;
        let offset = r.u64()?;
        vfs_fds.push((fd, path, offset));
    }

    let exec_page_count = r.u64()?;
    let mut exec_pages = Vec::with_capacity(exec_page_count as usize);
    for _ in 0..exec_page_count {
        exec_pages.push(r.u64()?);
    }
    for page in exec_pages {
        let mut attr = arena.get_page_attr(page);
        attr.r = true;
        attr.x = true;
        arena.set_page_attr(page, attr);
    }

    loop {
        let addr = r.u64()?;
        let len = r.u64()?;
        if addr == SPARSE_TERMINATOR && len == 0 {
            break;
        }
        let bytes = r.bytes(len as usize)?;
        arena.write_bytes(addr, bytes);
    }

    Ok(RestoredContext {
        exec_path,
        argv,
        envp,
        mmap_cursor,
        brk_base,
        brk_current,
        vfs_fds,
        tasks,
        current_task,
    })
}

pub fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    let mut f = std::fs::File::open(path).with_context(|| format!("opening checkpoint {}", path.display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, GUEST_MEMORY_BASE};

    #[test]
    fn roundtrips_registers_and_sparse_bytes() {
        let arena = Arena::new();
        let regs = RegFile::new(arena.clone());
        regs.set_pc(0x1_2000);
        regs.set_x(5, 0xdead_beef);
        arena.write_bytes(GUEST_MEMORY_BASE, b"hello checkpoint");

        let ctx = ExecuteContext::new(0x1_2000, 0x4_0000, vec!["/hello".into()], vec![], "/hello".into());

        let mut buf = Vec::new();
        save(&mut buf, &arena, &regs, &ctx).unwrap();

        let arena2 = Arena::new();
        let regs2 = RegFile::new(arena2.clone());
        let restored = load(&buf, &arena2, &regs2).unwrap();

        assert_eq!(regs2.pc(), 0x1_2000);
        assert_eq!(regs2.x(5), 0xdead_beef);
        assert_eq!(arena2.memarray(GUEST_MEMORY_BASE, 16), b"hello checkpoint");
        assert_eq!(restored.exec_path, "/hello");
    }
}
