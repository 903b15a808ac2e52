//! `brk`, `mmap`/`munmap`/`mprotect`. `mremap` is intentionally left as a
//! permanent `-ENOMEM` stub (SPEC_FULL.md §9 Open Question): relaxing it to
//! a real resize would require tracking mapping provenance this emulator
//! does not otherwise need.

use crate::arena::{SharedArena, ARENA_SIZE, PAGE_SIZE};
use crate::context::ExecuteContext;
use crate::decode::DecoderCache;
use crate::error::Errno;
use crate::jit::JitManager;

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
const PROT_EXEC: i32 = 0x4;
const MAP_ANONYMOUS: i32 = 0x20;
const MAP_FIXED: i32 = 0x10;

pub fn brk(arena: &SharedArena, ctx: &mut ExecuteContext, requested: u64) -> i64 {
    if requested == 0 {
        return ctx.brk_current as i64;
    }
    if requested < ctx.brk_base {
        return ctx.brk_current as i64;
    }
    if requested as usize >= ARENA_SIZE {
        return ctx.brk_current as i64;
    }
    if requested > ctx.brk_current {
        arena.zero_fill(ctx.brk_current, requested - ctx.brk_current);
        arena.set_range_attr(ctx.brk_current & !(PAGE_SIZE - 1), requested - (ctx.brk_current & !(PAGE_SIZE - 1)), true, true, false);
    }
    ctx.brk_current = requested;
    ctx.brk_current as i64
}

#[allow(clippy::too_many_arguments)]
pub fn mmap(
    arena: &SharedArena,
    ctx: &mut ExecuteContext,
    addr: u64,
    len: u64,
    prot: i32,
    flags: i32,
    decoder: &mut DecoderCache,
    jit: &mut JitManager,
) -> i64 {
    if len == 0 {
        return Errno::EINVAL.as_guest_result();
    }
    let aligned_len = (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    let base = if flags & MAP_FIXED != 0 {
        addr
    } else {
        let base = ctx.mmap_cursor;
        ctx.mmap_cursor += aligned_len;
        base
    };
    if flags & MAP_ANONYMOUS != 0 {
        arena.zero_fill(base, aligned_len);
    }
    let was_exec = prot & PROT_EXEC != 0;
    arena.set_range_attr(base, aligned_len, prot & PROT_READ != 0, prot & PROT_WRITE != 0, was_exec);
    if flags & MAP_FIXED != 0 {
        // A fixed mapping can overwrite previously JIT'd/decoded code; evict
        // any cached decode and compiled region in that range unconditionally.
        decoder.evict_range(base, base + aligned_len);
        jit.invalidate_range(base, aligned_len);
    }
    base as i64
}

pub fn munmap(arena: &SharedArena, addr: u64, len: u64, decoder: &mut DecoderCache, jit: &mut JitManager) -> i64 {
    let aligned_len = (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    arena.set_range_attr(addr, aligned_len, false, false, false);
    decoder.evict_range(addr, addr + aligned_len);
    jit.invalidate_range(addr, aligned_len);
    0
}

pub fn mprotect(
    arena: &SharedArena,
    addr: u64,
    len: u64,
    prot: i32,
    decoder: &mut DecoderCache,
    jit: &mut JitManager,
) -> i64 {
    let aligned_len = (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    arena.set_range_attr(
        addr,
        aligned_len,
        prot & PROT_READ != 0,
        prot & PROT_WRITE != 0,
        prot & PROT_EXEC != 0,
    );
    // Any protection change on a region that was or becomes executable must
    // invalidate cached decodes and compiled regions, since the bytes
    // underneath may differ from what was last decoded/compiled there.
    decoder.evict_range(addr, addr + aligned_len);
    jit.invalidate_range(addr, aligned_len);
    0
}

pub fn mremap() -> i64 {
    Errno::ENOMEM.as_guest_result()
}

/// `madvise(2)`: every hint is a legal no-op for this emulator (no page
/// reclaim, no THP, no eager/lazy fault policy to tune).
pub fn madvise() -> i64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::context::ExecuteContext;

    #[test]
    fn brk_grows_and_zero_fills() {
        let arena = Arena::new();
        let mut ctx = ExecuteContext::new(0x1000, 0x4000, vec![], vec![], "/bin/a".into());
        let new_brk = brk(&arena, &mut ctx, 0x5000);
        assert_eq!(new_brk, 0x5000);
        assert_eq!(ctx.brk_current, 0x5000);
    }

    #[test]
    fn mmap_anonymous_advances_cursor() {
        let arena = Arena::new();
        let mut ctx = ExecuteContext::new(0x1000, 0x4000, vec![], vec![], "/bin/a".into());
        let mut decoder = DecoderCache::new();
        let mut jit = JitManager::new();
        let first = mmap(&arena, &mut ctx, 0, PAGE_SIZE, PROT_READ | PROT_WRITE, MAP_ANONYMOUS, &mut decoder, &mut jit);
        let second = mmap(&arena, &mut ctx, 0, PAGE_SIZE, PROT_READ | PROT_WRITE, MAP_ANONYMOUS, &mut decoder, &mut jit);
        assert!(second > first);
    }
}
