//! The interpreter dispatch loop (component C's consumer). Runs decoded
//! instructions against the register file and arena until one of the four
//! exit conditions from SPEC_FULL.md §4.C is hit: a syscall trap, a
//! would-block read, an execute-side fault, or a JIT re-entry request.

use crate::arena::SharedArena;
use crate::context::ExecuteContext;
use crate::decode::{DecoderCache, Op};
use crate::error::{DispatchResult, FaultKind, HostFatal};
use crate::jit::manager::JitManager;
use crate::regs::RegFile;
use crate::syscall::{self, SyscallEffect};
use crate::vfs::Vfs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The guest exited (all tasks finished); carries the exit code.
    Exited(i32),
    /// `read(0, ...)` would need bridge-delivered input; the execution
    /// thread yields back to the caller rather than spinning.
    BlockOnInput,
}

/// How many decode-dispatch steps to run per call before returning control,
/// so the caller (main loop / bridge poll) gets a chance to service I/O and
/// the JIT manager gets a chance to process its compile queue.
pub const DISPATCH_CHUNK: u32 = 4096;

pub struct Dispatch {
    pub regs: RegFile,
    pub arena: SharedArena,
    pub decoder: DecoderCache,
    /// Global LR/SC reservation (SPEC_FULL.md §9 Open Question: scoped to
    /// the whole arena, not per-task, since cooperative tasks never truly
    /// run concurrently).
    lr_reservation: Option<u64>,
}

impl Dispatch {
    pub fn new(arena: SharedArena) -> Self {
        Dispatch {
            regs: RegFile::new(arena.clone()),
            arena,
            decoder: DecoderCache::new(),
            lr_reservation: None,
        }
    }

    /// Run up to `DISPATCH_CHUNK` instructions (or until an exit condition),
    /// consulting the JIT manager first for a compiled native region.
    pub fn run_chunk(
        &mut self,
        ctx: &mut ExecuteContext,
        vfs: &Vfs,
        jit: &mut JitManager,
    ) -> DispatchResult<Option<ExitReason>> {
        let _span = tracing::info_span!("dispatch_chunk", start_pc = ctx.scheduler.current_task().pc).entered();
        for _ in 0..DISPATCH_CHUNK {
            if ctx.scheduler.current_task().exited {
                if ctx.scheduler.advance() {
                    continue;
                }
                let code = ctx.scheduler.current_task().exit_code;
                return Ok(Some(ExitReason::Exited(code)));
            }

            let pc = ctx.scheduler.current_task().pc;
            self.regs.set_pc(pc);

            if let Some(native) = jit.get_compiled_region(pc, &self.arena) {
                match jit.run_region(native, &self.regs, &self.arena) {
                    crate::jit::manager::RegionExit::Continue(next_pc) => {
                        ctx.scheduler.current_task_mut().pc = next_pc;
                        continue;
                    }
                    crate::jit::manager::RegionExit::Syscall => {
                        if let Some(reason) = self.handle_syscall(ctx, vfs, jit)? {
                            return Ok(Some(reason));
                        }
                        continue;
                    }
                    crate::jit::manager::RegionExit::Halt => {
                        let code = ctx.scheduler.current_task().exit_code;
                        return Ok(Some(ExitReason::Exited(code)));
                    }
                }
            }

            jit.record_hit(pc);

            let insn = self.decoder.fetch(&self.arena, pc);
            let next_pc = pc.wrapping_add(insn.len as u64);

            if insn.op == Op::Illegal {
                return Err(HostFatal::DecoderCorruption { pc });
            }

            if insn.op == Op::Ecall {
                ctx.scheduler.current_task_mut().pc = next_pc;
                if let Some(reason) = self.handle_syscall(ctx, vfs, jit)? {
                    return Ok(Some(reason));
                }
                continue;
            }

            match crate::interp::execute(&self.regs, &self.arena, &insn, pc, next_pc, &mut self.lr_reservation) {
                Ok(branch_target) => {
                    ctx.scheduler.current_task_mut().pc = branch_target.unwrap_or(next_pc);
                }
                Err(kind) => return Err(self.arena_fault(pc, kind)),
            }
        }
        Ok(None)
    }

    fn handle_syscall(
        &mut self,
        ctx: &mut ExecuteContext,
        vfs: &Vfs,
        jit: &mut JitManager,
    ) -> DispatchResult<Option<ExitReason>> {
        let mut decoder = std::mem::replace(&mut self.decoder, DecoderCache::new());
        let effect = syscall::handle(&self.arena, &self.regs, ctx, vfs, &mut decoder, jit);
        self.decoder = decoder;
        match effect {
            SyscallEffect::Continue => {
                if ctx.stdin_wait {
                    ctx.stdin_wait = false;
                    return Ok(Some(ExitReason::BlockOnInput));
                }
                Ok(None)
            }
            SyscallEffect::Execve { new_pc } => {
                ctx.scheduler.current_task_mut().pc = new_pc;
                Ok(None)
            }
        }
    }

    fn arena_fault(&self, pc: u64, kind: FaultKind) -> HostFatal {
        HostFatal::SegmentationFault { addr: pc, kind }
    }
}
