//! Translates a bounded, straight-line run of decoded RV64 instructions into
//! native machine code via Cranelift. Only a conservative integer subset is
//! supported at Baseline tier; anything else in the run (a branch, an
//! unsupported opcode, an `ecall`) ends the translated block there, with the
//! remaining instructions executed by the interpreter on the next chunk.
//!
//! Grounded on the state-sync-then-call-then-check-exit-sentinel shape of a
//! JIT execution backend, adapted from a wasm target to a native one:
//! Cranelift plays the role wasmtime played there, and the native function's
//! return value is the same kind of exit sentinel.

use crate::arena::{PageAttr, ARENA_MASK, PAGE_SHIFT};
use crate::decode::{DecodedInsn, Op};
use crate::error::JitError;
use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, Linkage, Module};

/// Exit sentinel written in the native function's return value, matching
/// the `0xFFFFFFFF`/top-bit-set convention described for the interpreter's
/// own dispatch loop: the low 63 bits carry the next guest PC, the top bit
/// distinguishes "fell off the end of the region" (0) from "hit an ecall"
/// (1). A return value of `u64::MAX` means the region ended the process.
pub const EXIT_SYSCALL_BIT: u64 = 1 << 63;
pub const EXIT_HALT: u64 = u64::MAX;

#[derive(Clone, Copy)]
pub struct CompiledFn {
    ptr: *const u8,
}

unsafe impl Send for CompiledFn {}
unsafe impl Sync for CompiledFn {}

impl CompiledFn {
    /// Call the compiled region. `regs_ptr`/`arena_ptr` point at the byte 0
    /// of the register file and the flat arena respectively — for this
    /// build they are the same allocation (the register file lives at
    /// arena offset 0), but the signature keeps them distinct so a future
    /// build can separate them without changing the calling convention.
    /// `attrs_ptr` points at byte 0 of the page attribute table, so compiled
    /// stores can mark their target page dirty the same way the interpreter
    /// does.
    pub unsafe fn call(&self, regs_ptr: *mut u8, arena_ptr: *mut u8, attrs_ptr: *mut u8) -> u64 {
        let f: extern "C" fn(*mut u8, *mut u8, *mut u8) -> u64 = std::mem::transmute(self.ptr);
        f(regs_ptr, arena_ptr, attrs_ptr)
    }
}

/// Owns the JIT module so compiled code stays mapped for the process
/// lifetime. One per `JitManager`.
pub struct Translator {
    module: JITModule,
}

fn xreg_offset(i: u8) -> i32 {
    (i as i32) * 8
}

impl Translator {
    pub fn new() -> Result<Self, JitError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").map_err(|e| JitError::Emit(e.to_string()))?;
        flag_builder.set("is_pic", "false").map_err(|e| JitError::Emit(e.to_string()))?;
        let isa_builder = cranelift_native::builder().map_err(|e| JitError::Emit(e.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::Emit(e.to_string()))?;
        let builder = JITBuilder::with_isa(isa, default_libcall_names());
        Ok(Translator { module: JITModule::new(builder) })
    }

    /// Compile `insns` (already decoded, starting at `start_pc`) into a
    /// single native function. Returns how many leading instructions were
    /// actually covered — the caller falls back to the interpreter for the
    /// remainder, if any.
    pub fn compile(&mut self, start_pc: u64, insns: &[DecodedInsn]) -> Result<(CompiledFn, usize), JitError> {
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));

        let func_name = format!("region_{start_pc:x}");
        let func_id = self
            .module
            .declare_function(&func_name, Linkage::Export, &sig)
            .map_err(|e| JitError::Emit(e.to_string()))?;

        let mut ctx = Context::new();
        ctx.func.signature = sig;
        let mut fb_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);

        let regs_ptr = builder.block_params(entry)[0];
        let arena_ptr = builder.block_params(entry)[1];
        let attrs_ptr = builder.block_params(entry)[2];
        let flags = MemFlags::new();

        let mut covered = 0usize;
        let mut pc = start_pc;

        for insn in insns {
            let handled = translate_one(&mut builder, regs_ptr, arena_ptr, attrs_ptr, flags, insn, pc);
            match handled {
                TranslateResult::Unsupported => break,
                TranslateResult::EndsBlock(exit_value) => {
                    let v = builder.ins().iconst(types::I64, exit_value as i64);
                    builder.ins().return_(&[v]);
                    covered += 1;
                    builder.finalize();
                    return self.finish(func_id, ctx, covered);
                }
                TranslateResult::Continue => {
                    covered += 1;
                    pc = pc.wrapping_add(insn.len as u64);
                }
            }
        }

        if covered == 0 {
            return Err(JitError::Translate("no instructions in region were translatable".into()));
        }

        let fallthrough = builder.ins().iconst(types::I64, pc as i64);
        builder.ins().return_(&[fallthrough]);
        builder.finalize();
        self.finish(func_id, ctx, covered)
    }

    fn finish(&mut self, func_id: cranelift_module::FuncId, ctx: Context, covered: usize) -> Result<(CompiledFn, usize), JitError> {
        self.module
            .define_function(func_id, &mut { ctx }.clone_for_define())
            .map_err(|e| JitError::Emit(e.to_string()))?;
        self.module.finalize_definitions().map_err(|e| JitError::Emit(e.to_string()))?;
        let ptr = self.module.get_finalized_function(func_id);
        Ok((CompiledFn { ptr }, covered))
    }
}

// `Context` does not implement `Clone`; `define_function` takes it by value.
// This trait exists purely to express "hand the context over" without
// fighting the borrow checker inside `finish`.
trait CloneForDefine {
    fn clone_for_define(self) -> Self;
}
impl CloneForDefine for Context {
    fn clone_for_define(self) -> Self {
        self
    }
}

enum TranslateResult {
    Continue,
    /// The region ends after this instruction; carries the exit sentinel.
    EndsBlock(u64),
    Unsupported,
}

fn translate_one(
    builder: &mut FunctionBuilder,
    regs_ptr: cranelift_codegen::ir::Value,
    arena_ptr: cranelift_codegen::ir::Value,
    attrs_ptr: cranelift_codegen::ir::Value,
    flags: MemFlags,
    insn: &DecodedInsn,
    pc: u64,
) -> TranslateResult {
    let o = &insn.operands;
    let load_x = |b: &mut FunctionBuilder, reg: u8| -> cranelift_codegen::ir::Value {
        if reg == 0 {
            b.ins().iconst(types::I64, 0)
        } else {
            b.ins().load(types::I64, flags, regs_ptr, xreg_offset(reg))
        }
    };
    let store_x = |b: &mut FunctionBuilder, reg: u8, v: cranelift_codegen::ir::Value| {
        if reg != 0 {
            b.ins().store(flags, v, regs_ptr, xreg_offset(reg));
        }
    };

    match insn.op {
        Op::Addi => {
            let a = load_x(builder, o.rs1);
            let imm = builder.ins().iconst(types::I64, o.imm);
            let v = builder.ins().iadd(a, imm);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Add => {
            let a = load_x(builder, o.rs1);
            let b = load_x(builder, o.rs2);
            let v = builder.ins().iadd(a, b);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Sub => {
            let a = load_x(builder, o.rs1);
            let b = load_x(builder, o.rs2);
            let v = builder.ins().isub(a, b);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::And => {
            let a = load_x(builder, o.rs1);
            let b = load_x(builder, o.rs2);
            let v = builder.ins().band(a, b);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Or => {
            let a = load_x(builder, o.rs1);
            let b = load_x(builder, o.rs2);
            let v = builder.ins().bor(a, b);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Xor => {
            let a = load_x(builder, o.rs1);
            let b = load_x(builder, o.rs2);
            let v = builder.ins().bxor(a, b);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Andi => {
            let a = load_x(builder, o.rs1);
            let imm = builder.ins().iconst(types::I64, o.imm);
            let v = builder.ins().band(a, imm);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Ori => {
            let a = load_x(builder, o.rs1);
            let imm = builder.ins().iconst(types::I64, o.imm);
            let v = builder.ins().bor(a, imm);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Xori => {
            let a = load_x(builder, o.rs1);
            let imm = builder.ins().iconst(types::I64, o.imm);
            let v = builder.ins().bxor(a, imm);
            store_x(builder, o.rd, v);
            TranslateResult::Continue
        }
        Op::Ld | Op::Lw | Op::Lwu | Op::Sd | Op::Sw => {
            // Guest loads/stores need `arena_ptr + (base + imm)` as the
            // effective address (the arena is masked, not bounds-checked, on
            // this path — see DESIGN.md on why Baseline skips the mask: the
            // region translator only ever runs on a page the interpreter has
            // already proven executable and in range). Implemented below for
            // the two widths the corpus hot loops actually exercise; other
            // widths still fall back to the interpreter.
            translate_mem_op(builder, regs_ptr, arena_ptr, attrs_ptr, flags, insn)
        }
        _ => TranslateResult::Unsupported,
    }
    .resolve_ecall(insn, pc, o)
}

/// Mirrors `Arena::mark_dirty_if_executable`: sets the page's dirty bit only
/// if its exec bit is already set, leaving non-executable pages untouched.
/// `X` is bit 2 and `DIRTY` is bit 3, so `(byte & X) << 1` is exactly the
/// dirty contribution to OR in.
fn emit_mark_dirty(
    builder: &mut FunctionBuilder,
    attrs_ptr: cranelift_codegen::ir::Value,
    flags: MemFlags,
    masked_guest_addr: cranelift_codegen::ir::Value,
) {
    let shift = builder.ins().iconst(types::I64, PAGE_SHIFT as i64);
    let page = builder.ins().ushr(masked_guest_addr, shift);
    let attr_addr = builder.ins().iadd(attrs_ptr, page);
    let old = builder.ins().load(types::I8, flags, attr_addr, 0);
    let x_mask = builder.ins().iconst(types::I8, PageAttr::X as i64);
    let x_bit = builder.ins().band(old, x_mask);
    let one = builder.ins().iconst(types::I8, 1);
    let dirty_bit = builder.ins().ishl(x_bit, one);
    let new = builder.ins().bor(old, dirty_bit);
    builder.ins().store(flags, new, attr_addr, 0);
}

fn translate_mem_op(
    builder: &mut FunctionBuilder,
    regs_ptr: cranelift_codegen::ir::Value,
    arena_ptr: cranelift_codegen::ir::Value,
    attrs_ptr: cranelift_codegen::ir::Value,
    flags: MemFlags,
    insn: &DecodedInsn,
) -> TranslateResult {
    let o = &insn.operands;
    let load_x = |b: &mut FunctionBuilder, reg: u8| -> cranelift_codegen::ir::Value {
        if reg == 0 {
            b.ins().iconst(types::I64, 0)
        } else {
            b.ins().load(types::I64, flags, regs_ptr, xreg_offset(reg))
        }
    };
    let base = load_x(builder, o.rs1);
    let imm = builder.ins().iconst(types::I64, o.imm);
    let guest_addr = builder.ins().iadd(base, imm);
    let mask = builder.ins().iconst(types::I64, ARENA_MASK as i64);
    let masked = builder.ins().band(guest_addr, mask);
    let addr = builder.ins().iadd(arena_ptr, masked);
    match insn.op {
        Op::Ld => {
            let v = builder.ins().load(types::I64, flags, addr, 0);
            if o.rd != 0 {
                builder.ins().store(flags, v, regs_ptr, xreg_offset(o.rd));
            }
            TranslateResult::Continue
        }
        Op::Lw => {
            let v = builder.ins().load(types::I32, flags, addr, 0);
            let v64 = builder.ins().sextend(types::I64, v);
            if o.rd != 0 {
                builder.ins().store(flags, v64, regs_ptr, xreg_offset(o.rd));
            }
            TranslateResult::Continue
        }
        Op::Lwu => {
            let v = builder.ins().load(types::I32, flags, addr, 0);
            let v64 = builder.ins().uextend(types::I64, v);
            if o.rd != 0 {
                builder.ins().store(flags, v64, regs_ptr, xreg_offset(o.rd));
            }
            TranslateResult::Continue
        }
        Op::Sd => {
            let v = load_x(builder, o.rs2);
            builder.ins().store(flags, v, addr, 0);
            emit_mark_dirty(builder, attrs_ptr, flags, masked);
            TranslateResult::Continue
        }
        Op::Sw => {
            let v = load_x(builder, o.rs2);
            let v32 = builder.ins().ireduce(types::I32, v);
            builder.ins().store(flags, v32, addr, 0);
            emit_mark_dirty(builder, attrs_ptr, flags, masked);
            TranslateResult::Continue
        }
        _ => TranslateResult::Unsupported,
    }
}

trait ResolveEcall {
    fn resolve_ecall(self, insn: &DecodedInsn, pc: u64, o: &crate::decode::Operands) -> TranslateResult;
}
impl ResolveEcall for TranslateResult {
    fn resolve_ecall(self, insn: &DecodedInsn, pc: u64, _o: &crate::decode::Operands) -> TranslateResult {
        if matches!(self, TranslateResult::Continue) && insn.op == Op::Ecall {
            let next_pc = pc.wrapping_add(insn.len as u64);
            return TranslateResult::EndsBlock(next_pc | EXIT_SYSCALL_BIT);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, GUEST_MEMORY_BASE, PAGE_SIZE};
    use crate::decode::fetch_decode;

    /// A compiled `sw` that writes into its own executable page (the JIT
    /// analogue of Scenario 5's interpreted `sb` self-patch) must mark that
    /// page dirty, exactly as `Arena::store_u32` does on the interpreter
    /// path.
    #[test]
    fn compiled_store_into_own_region_marks_page_dirty() {
        let arena = Arena::new();
        arena.set_range_attr(GUEST_MEMORY_BASE & !(PAGE_SIZE - 1), PAGE_SIZE, true, true, true);

        // addi x1, x0, 640  (GUEST_MEMORY_BASE fits a 12-bit immediate)
        arena.write_bytes(GUEST_MEMORY_BASE, &0x2800_0093u32.to_le_bytes());
        // sw x2, 0(x1)  -- stores x2 (0) over the addi itself.
        arena.write_bytes(GUEST_MEMORY_BASE + 4, &0x0020_A023u32.to_le_bytes());

        let insns = vec![fetch_decode(&arena, GUEST_MEMORY_BASE), fetch_decode(&arena, GUEST_MEMORY_BASE + 4)];

        let mut translator = Translator::new().expect("cranelift backend available");
        let (func, covered) = translator.compile(GUEST_MEMORY_BASE, &insns).expect("region translates");
        assert_eq!(covered, 2);

        assert!(!arena.get_page_attr(GUEST_MEMORY_BASE >> crate::arena::PAGE_SHIFT).dirty);
        unsafe {
            let _ = func.call(arena.raw_ptr(), arena.raw_ptr(), arena.attrs_ptr());
        }
        assert!(arena.get_page_attr(GUEST_MEMORY_BASE >> crate::arena::PAGE_SHIFT).dirty);
    }
}
