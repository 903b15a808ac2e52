//! The instruction-execution switch: one case per `Op` tag, consulting and
//! mutating the register file and arena directly. Returns `Ok(Some(pc))` to
//! redirect control flow, `Ok(None)` to fall through to `next_pc`, or
//! `Err(FaultKind)` when a load/store targets a page without the required
//! permission bit set.

use crate::arena::SharedArena;
use crate::decode::{DecodedInsn, Op};
use crate::error::FaultKind;
use crate::regs::RegFile;

fn check_perm(arena: &SharedArena, addr: u64, need_read: bool, need_write: bool) -> Result<(), FaultKind> {
    let attr = arena.get_page_attr(addr >> crate::arena::PAGE_SHIFT);
    if need_read && !attr.r {
        return Err(FaultKind::Load);
    }
    if need_write && !attr.w {
        return Err(FaultKind::Store);
    }
    Ok(())
}

pub fn execute(
    regs: &RegFile,
    arena: &SharedArena,
    insn: &DecodedInsn,
    pc: u64,
    next_pc: u64,
    lr_reservation: &mut Option<u64>,
) -> Result<Option<u64>, FaultKind> {
    let o = &insn.operands;
    let rs1 = regs.x(o.rs1 as usize);
    let rs2 = regs.x(o.rs2 as usize);
    let imm = o.imm;

    macro_rules! set_rd {
        ($v:expr) => {
            regs.set_x(o.rd as usize, $v)
        };
    }

    match insn.op {
        Op::Lui => set_rd!(imm as u64),
        Op::Auipc => set_rd!(pc.wrapping_add(imm as u64)),
        Op::Jal => {
            set_rd!(next_pc);
            return Ok(Some(pc.wrapping_add(imm as u64)));
        }
        Op::Jalr => {
            let target = (rs1.wrapping_add(imm as u64)) & !1u64;
            set_rd!(next_pc);
            return Ok(Some(target));
        }
        Op::Beq | Op::Bne | Op::Blt | Op::Bge | Op::Bltu | Op::Bgeu => {
            let taken = match insn.op {
                Op::Beq => rs1 == rs2,
                Op::Bne => rs1 != rs2,
                Op::Blt => (rs1 as i64) < (rs2 as i64),
                Op::Bge => (rs1 as i64) >= (rs2 as i64),
                Op::Bltu => rs1 < rs2,
                Op::Bgeu => rs1 >= rs2,
                _ => unreachable!(),
            };
            if taken {
                return Ok(Some(pc.wrapping_add(imm as u64)));
            }
        }
        Op::Lb | Op::Lh | Op::Lw | Op::Ld | Op::Lbu | Op::Lhu | Op::Lwu => {
            let addr = rs1.wrapping_add(imm as u64);
            check_perm(arena, addr, true, false)?;
            let v: u64 = match insn.op {
                Op::Lb => arena.load_u8(addr) as i8 as i64 as u64,
                Op::Lh => arena.load_u16(addr) as i16 as i64 as u64,
                Op::Lw => arena.load_u32(addr) as i32 as i64 as u64,
                Op::Ld => arena.load_u64(addr),
                Op::Lbu => arena.load_u8(addr) as u64,
                Op::Lhu => arena.load_u16(addr) as u64,
                Op::Lwu => arena.load_u32(addr) as u64,
                _ => unreachable!(),
            };
            set_rd!(v);
        }
        Op::Sb | Op::Sh | Op::Sw | Op::Sd => {
            let addr = rs1.wrapping_add(imm as u64);
            check_perm(arena, addr, false, true)?;
            match insn.op {
                Op::Sb => arena.store_u8(addr, rs2 as u8),
                Op::Sh => arena.store_u16(addr, rs2 as u16),
                Op::Sw => arena.store_u32(addr, rs2 as u32),
                Op::Sd => arena.store_u64(addr, rs2),
                _ => unreachable!(),
            }
            if *lr_reservation == Some(addr) {
                *lr_reservation = None;
            }
        }
        Op::Addi => set_rd!((rs1 as i64).wrapping_add(imm) as u64),
        Op::Slti => set_rd!(((rs1 as i64) < imm) as u64),
        Op::Sltiu => set_rd!((rs1 < imm as u64) as u64),
        Op::Xori => set_rd!(rs1 ^ imm as u64),
        Op::Ori => set_rd!(rs1 | imm as u64),
        Op::Andi => set_rd!(rs1 & imm as u64),
        Op::Slli => set_rd!(rs1 << (imm & 0x3f)),
        Op::Srli => set_rd!(rs1 >> (imm & 0x3f)),
        Op::Srai => set_rd!(((rs1 as i64) >> (imm & 0x3f)) as u64),
        Op::Add => set_rd!(rs1.wrapping_add(rs2)),
        Op::Sub => set_rd!(rs1.wrapping_sub(rs2)),
        Op::Sll => set_rd!(rs1 << (rs2 & 0x3f)),
        Op::Slt => set_rd!(((rs1 as i64) < (rs2 as i64)) as u64),
        Op::Sltu => set_rd!((rs1 < rs2) as u64),
        Op::Xor => set_rd!(rs1 ^ rs2),
        Op::Srl => set_rd!(rs1 >> (rs2 & 0x3f)),
        Op::Sra => set_rd!(((rs1 as i64) >> (rs2 & 0x3f)) as u64),
        Op::Or => set_rd!(rs1 | rs2),
        Op::And => set_rd!(rs1 & rs2),
        Op::Addiw => set_rd!(((rs1 as i32).wrapping_add(imm as i32)) as i64 as u64),
        Op::Slliw => set_rd!(((rs1 as i32) << (imm & 0x1f)) as i64 as u64),
        Op::Srliw => set_rd!(((rs1 as u32) >> (imm & 0x1f)) as i32 as i64 as u64),
        Op::Sraiw => set_rd!(((rs1 as i32) >> (imm & 0x1f)) as i64 as u64),
        Op::Addw => set_rd!(((rs1 as i32).wrapping_add(rs2 as i32)) as i64 as u64),
        Op::Subw => set_rd!(((rs1 as i32).wrapping_sub(rs2 as i32)) as i64 as u64),
        Op::Sllw => set_rd!(((rs1 as i32) << (rs2 & 0x1f)) as i64 as u64),
        Op::Srlw => set_rd!(((rs1 as u32) >> (rs2 & 0x1f)) as i32 as i64 as u64),
        Op::Sraw => set_rd!(((rs1 as i32) >> (rs2 & 0x1f)) as i64 as u64),
        Op::Fence | Op::FenceI => {} // single-task interpreter: fences are no-ops
        Op::Ebreak => {}
        Op::Csrrw | Op::Csrrs | Op::Csrrc | Op::Csrrwi | Op::Csrrsi | Op::Csrrci => {
            // No CSR state is modeled beyond fcsr; reads return 0, writes are
            // discarded. Guests that probe misa/mhartid do not depend on the
            // result for correctness in the supported workload set.
            set_rd!(0);
        }
        Op::Mul => set_rd!((rs1 as i64).wrapping_mul(rs2 as i64) as u64),
        Op::Mulh => set_rd!(((rs1 as i64 as i128).wrapping_mul(rs2 as i64 as i128) >> 64) as u64),
        Op::Mulhsu => set_rd!(((rs1 as i64 as i128).wrapping_mul(rs2 as u128 as i128) >> 64) as u64),
        Op::Mulhu => set_rd!(((rs1 as u128).wrapping_mul(rs2 as u128) >> 64) as u64),
        Op::Div => {
            let (a, b) = (rs1 as i64, rs2 as i64);
            set_rd!(if b == 0 { -1i64 as u64 } else if a == i64::MIN && b == -1 { a as u64 } else { a.wrapping_div(b) as u64 });
        }
        Op::Divu => set_rd!(if rs2 == 0 { u64::MAX } else { rs1 / rs2 }),
        Op::Rem => {
            let (a, b) = (rs1 as i64, rs2 as i64);
            set_rd!(if b == 0 { a as u64 } else if a == i64::MIN && b == -1 { 0 } else { a.wrapping_rem(b) as u64 });
        }
        Op::Remu => set_rd!(if rs2 == 0 { rs1 } else { rs1 % rs2 }),
        Op::Mulw => set_rd!(((rs1 as i32).wrapping_mul(rs2 as i32)) as i64 as u64),
        Op::Divw => {
            let (a, b) = (rs1 as i32, rs2 as i32);
            set_rd!(if b == 0 { -1i64 as u64 } else if a == i32::MIN && b == -1 { a as i64 as u64 } else { (a.wrapping_div(b)) as i64 as u64 });
        }
        Op::Divuw => set_rd!(if (rs2 as u32) == 0 { u64::MAX } else { ((rs1 as u32) / (rs2 as u32)) as i32 as i64 as u64 }),
        Op::Remw => {
            let (a, b) = (rs1 as i32, rs2 as i32);
            set_rd!(if b == 0 { a as i64 as u64 } else if a == i32::MIN && b == -1 { 0 } else { (a.wrapping_rem(b)) as i64 as u64 });
        }
        Op::Remuw => set_rd!(if (rs2 as u32) == 0 { (rs1 as u32) as i64 as u64 } else { ((rs1 as u32) % (rs2 as u32)) as i32 as i64 as u64 }),

        Op::LrW => {
            check_perm(arena, rs1, true, false)?;
            *lr_reservation = Some(rs1);
            set_rd!(arena.load_u32(rs1) as i32 as i64 as u64);
        }
        Op::LrD => {
            check_perm(arena, rs1, true, false)?;
            *lr_reservation = Some(rs1);
            set_rd!(arena.load_u64(rs1));
        }
        Op::ScW => {
            if *lr_reservation == Some(rs1) {
                check_perm(arena, rs1, false, true)?;
                arena.store_u32(rs1, rs2 as u32);
                *lr_reservation = None;
                set_rd!(0);
            } else {
                set_rd!(1);
            }
        }
        Op::ScD => {
            if *lr_reservation == Some(rs1) {
                check_perm(arena, rs1, false, true)?;
                arena.store_u64(rs1, rs2);
                *lr_reservation = None;
                set_rd!(0);
            } else {
                set_rd!(1);
            }
        }
        Op::AmoswapW | Op::AmoaddW | Op::AmoxorW | Op::AmoandW | Op::AmoorW | Op::AmominW | Op::AmomaxW
        | Op::AmominuW | Op::AmomaxuW => {
            check_perm(arena, rs1, true, true)?;
            let old = arena.load_u32(rs1) as i32;
            let rhs = rs2 as i32;
            let new = amo_apply_w(insn.op, old, rhs);
            arena.store_u32(rs1, new as u32);
            set_rd!(old as i64 as u64);
        }
        Op::AmoswapD | Op::AmoaddD | Op::AmoxorD | Op::AmoandD | Op::AmoorD | Op::AmominD | Op::AmomaxD
        | Op::AmominuD | Op::AmomaxuD => {
            check_perm(arena, rs1, true, true)?;
            let old = arena.load_u64(rs1) as i64;
            let rhs = rs2 as i64;
            let new = amo_apply_d(insn.op, old, rhs);
            arena.store_u64(rs1, new as u64);
            set_rd!(old as u64);
        }

        Op::Flw => {
            let addr = rs1.wrapping_add(imm as u64);
            check_perm(arena, addr, true, false)?;
            regs.set_f32(o.rd as usize, f32::from_bits(arena.load_u32(addr)));
        }
        Op::Fld => {
            let addr = rs1.wrapping_add(imm as u64);
            check_perm(arena, addr, true, false)?;
            regs.set_f64(o.rd as usize, f64::from_bits(arena.load_u64(addr)));
        }
        Op::Fsw => {
            let addr = rs1.wrapping_add(imm as u64);
            check_perm(arena, addr, false, true)?;
            arena.store_u32(addr, regs.f32(o.rs2 as usize).to_bits());
        }
        Op::Fsd => {
            let addr = rs1.wrapping_add(imm as u64);
            check_perm(arena, addr, false, true)?;
            arena.store_u64(addr, regs.f64(o.rs2 as usize).to_bits());
        }
        Op::FaddS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize) + regs.f32(o.rs2 as usize)),
        Op::FsubS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize) - regs.f32(o.rs2 as usize)),
        Op::FmulS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize) * regs.f32(o.rs2 as usize)),
        Op::FdivS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize) / regs.f32(o.rs2 as usize)),
        Op::FsqrtS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize).sqrt()),
        Op::FminS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize).min(regs.f32(o.rs2 as usize))),
        Op::FmaxS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize).max(regs.f32(o.rs2 as usize))),
        Op::FeqS => set_rd!((regs.f32(o.rs1 as usize) == regs.f32(o.rs2 as usize)) as u64),
        Op::FltS => set_rd!((regs.f32(o.rs1 as usize) < regs.f32(o.rs2 as usize)) as u64),
        Op::FleS => set_rd!((regs.f32(o.rs1 as usize) <= regs.f32(o.rs2 as usize)) as u64),
        Op::FcvtWS => set_rd!((regs.f32(o.rs1 as usize) as i32) as i64 as u64),
        Op::FcvtWuS => set_rd!((regs.f32(o.rs1 as usize) as u32) as u64),
        Op::FcvtSW => regs.set_f32(o.rd as usize, (rs1 as i32) as f32),
        Op::FcvtSWu => regs.set_f32(o.rd as usize, (rs1 as u32) as f32),
        Op::FmvXW => set_rd!(regs.f32(o.rs1 as usize).to_bits() as i32 as i64 as u64),
        Op::FmvWX => regs.set_f32(o.rd as usize, f32::from_bits(rs1 as u32)),

        Op::FaddD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize) + regs.f64(o.rs2 as usize)),
        Op::FsubD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize) - regs.f64(o.rs2 as usize)),
        Op::FmulD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize) * regs.f64(o.rs2 as usize)),
        Op::FdivD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize) / regs.f64(o.rs2 as usize)),
        Op::FsqrtD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize).sqrt()),
        Op::FminD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize).min(regs.f64(o.rs2 as usize))),
        Op::FmaxD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize).max(regs.f64(o.rs2 as usize))),
        Op::FeqD => set_rd!((regs.f64(o.rs1 as usize) == regs.f64(o.rs2 as usize)) as u64),
        Op::FltD => set_rd!((regs.f64(o.rs1 as usize) < regs.f64(o.rs2 as usize)) as u64),
        Op::FleD => set_rd!((regs.f64(o.rs1 as usize) <= regs.f64(o.rs2 as usize)) as u64),
        Op::FcvtWD => set_rd!((regs.f64(o.rs1 as usize) as i32) as i64 as u64),
        Op::FcvtWuD => set_rd!((regs.f64(o.rs1 as usize) as u32) as u64),
        Op::FcvtDW => regs.set_f64(o.rd as usize, (rs1 as i32) as f64),
        Op::FcvtDWu => regs.set_f64(o.rd as usize, (rs1 as u32) as f64),
        Op::FcvtSD => regs.set_f32(o.rd as usize, regs.f64(o.rs1 as usize) as f32),
        Op::FcvtDS => regs.set_f64(o.rd as usize, regs.f32(o.rs1 as usize) as f64),
        Op::FcvtLS => set_rd!(regs.f32(o.rs1 as usize) as i64 as u64),
        Op::FcvtLuS => set_rd!(regs.f32(o.rs1 as usize) as u64),
        Op::FcvtSL => regs.set_f32(o.rd as usize, rs1 as i64 as f32),
        Op::FcvtSLu => regs.set_f32(o.rd as usize, rs1 as f32),
        Op::FcvtLD => set_rd!(regs.f64(o.rs1 as usize) as i64 as u64),
        Op::FcvtLuD => set_rd!(regs.f64(o.rs1 as usize) as u64),
        Op::FcvtDL => regs.set_f64(o.rd as usize, rs1 as i64 as f64),
        Op::FcvtDLu => regs.set_f64(o.rd as usize, rs1 as f64),
        Op::FmvXD => set_rd!(regs.f64(o.rs1 as usize).to_bits()),
        Op::FmvDX => regs.set_f64(o.rd as usize, f64::from_bits(rs1)),

        Op::FsgnjS | Op::FsgnjnS | Op::FsgnjxS => {
            let a = regs.f32(o.rs1 as usize).to_bits();
            let b = regs.f32(o.rs2 as usize).to_bits();
            let sign = match insn.op {
                Op::FsgnjS => b & 0x8000_0000,
                Op::FsgnjnS => !b & 0x8000_0000,
                _ => (a ^ b) & 0x8000_0000,
            };
            regs.set_f32(o.rd as usize, f32::from_bits((a & 0x7fff_ffff) | sign));
        }
        Op::FsgnjD | Op::FsgnjnD | Op::FsgnjxD => {
            let a = regs.f64(o.rs1 as usize).to_bits();
            let b = regs.f64(o.rs2 as usize).to_bits();
            let sign = match insn.op {
                Op::FsgnjD => b & 0x8000_0000_0000_0000,
                Op::FsgnjnD => !b & 0x8000_0000_0000_0000,
                _ => (a ^ b) & 0x8000_0000_0000_0000,
            };
            regs.set_f64(o.rd as usize, f64::from_bits((a & 0x7fff_ffff_ffff_ffff) | sign));
        }
        Op::FclassS | Op::FclassD => set_rd!(0), // not consulted by the supported workload set

        Op::FmaddS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize) * regs.f32(o.rs2 as usize) + regs.f32(o.rs3 as usize)),
        Op::FmsubS => regs.set_f32(o.rd as usize, regs.f32(o.rs1 as usize) * regs.f32(o.rs2 as usize) - regs.f32(o.rs3 as usize)),
        Op::FnmsubS => regs.set_f32(o.rd as usize, -(regs.f32(o.rs1 as usize) * regs.f32(o.rs2 as usize)) + regs.f32(o.rs3 as usize)),
        Op::FnmaddS => regs.set_f32(o.rd as usize, -(regs.f32(o.rs1 as usize) * regs.f32(o.rs2 as usize)) - regs.f32(o.rs3 as usize)),
        Op::FmaddD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize) * regs.f64(o.rs2 as usize) + regs.f64(o.rs3 as usize)),
        Op::FmsubD => regs.set_f64(o.rd as usize, regs.f64(o.rs1 as usize) * regs.f64(o.rs2 as usize) - regs.f64(o.rs3 as usize)),
        Op::FnmsubD => regs.set_f64(o.rd as usize, -(regs.f64(o.rs1 as usize) * regs.f64(o.rs2 as usize)) + regs.f64(o.rs3 as usize)),
        Op::FnmaddD => regs.set_f64(o.rd as usize, -(regs.f64(o.rs1 as usize) * regs.f64(o.rs2 as usize)) - regs.f64(o.rs3 as usize)),

        Op::Ecall | Op::Illegal => unreachable!("handled by the caller before dispatch reaches execute()"),
    }

    Ok(None)
}

fn amo_apply_w(op: Op, old: i32, rhs: i32) -> i32 {
    match op {
        Op::AmoswapW => rhs,
        Op::AmoaddW => old.wrapping_add(rhs),
        Op::AmoxorW => old ^ rhs,
        Op::AmoandW => old & rhs,
        Op::AmoorW => old | rhs,
        Op::AmominW => old.min(rhs),
        Op::AmomaxW => old.max(rhs),
        Op::AmominuW => (old as u32).min(rhs as u32) as i32,
        Op::AmomaxuW => (old as u32).max(rhs as u32) as i32,
        _ => unreachable!(),
    }
}

fn amo_apply_d(op: Op, old: i64, rhs: i64) -> i64 {
    match op {
        Op::AmoswapD => rhs,
        Op::AmoaddD => old.wrapping_add(rhs),
        Op::AmoxorD => old ^ rhs,
        Op::AmoandD => old & rhs,
        Op::AmoorD => old | rhs,
        Op::AmominD => old.min(rhs),
        Op::AmomaxD => old.max(rhs),
        Op::AmominuD => (old as u64).min(rhs as u64) as i64,
        Op::AmomaxuD => (old as u64).max(rhs as u64) as i64,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, GUEST_MEMORY_BASE, PAGE_SIZE};
    use crate::decode::Operands;

    fn setup() -> (RegFile, SharedArena) {
        let arena = Arena::new();
        arena.set_range_attr(GUEST_MEMORY_BASE & !(PAGE_SIZE - 1), PAGE_SIZE * 4, true, true, false);
        (RegFile::new(arena.clone()), arena)
    }

    #[test]
    fn add_computes_sum() {
        let (regs, arena) = setup();
        regs.set_x(1, 2);
        regs.set_x(2, 3);
        let insn = DecodedInsn { op: Op::Add, operands: Operands { rd: 3, rs1: 1, rs2: 2, ..Default::default() }, len: 4 };
        let mut lr = None;
        execute(&regs, &arena, &insn, 0, 4, &mut lr).unwrap();
        assert_eq!(regs.x(3), 5);
    }

    #[test]
    fn branch_not_taken_falls_through() {
        let (regs, arena) = setup();
        regs.set_x(1, 1);
        regs.set_x(2, 2);
        let insn = DecodedInsn { op: Op::Beq, operands: Operands { rs1: 1, rs2: 2, imm: 0x100, ..Default::default() }, len: 4 };
        let mut lr = None;
        let target = execute(&regs, &arena, &insn, 0x1000, 0x1004, &mut lr).unwrap();
        assert_eq!(target, None);
    }

    #[test]
    fn sc_fails_without_matching_reservation() {
        let (regs, arena) = setup();
        regs.set_x(1, GUEST_MEMORY_BASE);
        regs.set_x(2, 99);
        let insn = DecodedInsn { op: Op::ScW, operands: Operands { rd: 3, rs1: 1, rs2: 2, ..Default::default() }, len: 4 };
        let mut lr = None;
        execute(&regs, &arena, &insn, 0, 4, &mut lr).unwrap();
        assert_eq!(regs.x(3), 1); // failure code
    }

    #[test]
    fn store_to_read_only_page_faults() {
        let arena = Arena::new();
        arena.set_range_attr(GUEST_MEMORY_BASE, PAGE_SIZE, true, false, false);
        let regs = RegFile::new(arena.clone());
        regs.set_x(1, GUEST_MEMORY_BASE);
        let insn = DecodedInsn { op: Op::Sd, operands: Operands { rs1: 1, rs2: 0, imm: 0, ..Default::default() }, len: 4 };
        let mut lr = None;
        let err = execute(&regs, &arena, &insn, 0, 4, &mut lr).unwrap_err();
        assert_eq!(err, FaultKind::Store);
    }
}
