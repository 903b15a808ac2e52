//! Shared helpers for the end-to-end scenario tests: a tiny RV64 instruction
//! encoder and a minimal ET_EXEC ELF builder, in the same spirit as
//! `elf.rs`'s own `minimal_static_elf` unit-test helper but parameterized
//! over arbitrary code and trailing data.

use rvsim::arena::PAGE_SIZE;

/// Vaddr of the first PT_LOAD segment in every binary this module builds.
pub const LOAD_VADDR: u64 = 0x1_0000;
const EHSIZE: u16 = 64;
const PHSIZE: u16 = 56;
/// Vaddr of the first byte of `code` once mapped (just past the ELF header
/// and the single program header, both folded into the same segment).
pub const CODE_BASE: u64 = LOAD_VADDR + EHSIZE as u64 + PHSIZE as u64;

pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    let imm = (imm as u32) & 0xfff;
    (imm << 20) | ((rs1 as u32) << 15) | ((rd as u32) << 7) | 0x13
}

pub fn auipc(rd: u8, imm20: i32) -> u32 {
    let imm = (imm20 as u32) & 0xf_ffff;
    (imm << 12) | ((rd as u32) << 7) | 0x17
}

pub const ECALL: u32 = 0x0000_0073;

/// `auipc rd,0` followed by `addi rd,rd,offset`, loading the absolute
/// address `target` into `rd`. `pc_of_auipc` is `CODE_BASE + 4*index_of_first_insn`.
pub fn load_address(rd: u8, pc_of_auipc: u64, target: u64) -> [u32; 2] {
    let offset = target as i64 - pc_of_auipc as i64;
    assert!((-2048..2048).contains(&offset), "address too far for a single addi offset");
    [auipc(rd, 0), addi(rd, rd, offset as i32)]
}

/// Build a minimal ET_EXEC RV64 ELF: one R+X PT_LOAD segment holding
/// `code` (as raw instruction words) immediately followed by `data` at
/// `CODE_BASE + code.len()*4`, entry at `CODE_BASE`.
pub fn build_elf(code: &[u32], data: &[u8]) -> Vec<u8> {
    let code_bytes: Vec<u8> = code.iter().flat_map(|w| w.to_le_bytes()).collect();
    let phoff = EHSIZE as u64;
    let filesz = phoff + PHSIZE as u64 + code_bytes.len() as u64 + data.len() as u64;

    let mut buf = vec![0u8; filesz as usize];
    buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    buf[4] = 2; // ELFCLASS64
    buf[5] = 1; // little-endian
    buf[6] = 1; // EI_VERSION
    buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    buf[18..20].copy_from_slice(&243u16.to_le_bytes()); // e_machine = EM_RISCV
    buf[20..24].copy_from_slice(&1u32.to_le_bytes());
    buf[24..32].copy_from_slice(&CODE_BASE.to_le_bytes()); // e_entry
    buf[32..40].copy_from_slice(&phoff.to_le_bytes()); // e_phoff
    buf[52..54].copy_from_slice(&EHSIZE.to_le_bytes());
    buf[54..56].copy_from_slice(&PHSIZE.to_le_bytes());
    buf[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

    let ph = phoff as usize;
    buf[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    buf[ph + 4..ph + 8].copy_from_slice(&5u32.to_le_bytes()); // PF_R|PF_X
    buf[ph + 8..ph + 16].copy_from_slice(&0u64.to_le_bytes()); // p_offset
    buf[ph + 16..ph + 24].copy_from_slice(&LOAD_VADDR.to_le_bytes());
    buf[ph + 24..ph + 32].copy_from_slice(&LOAD_VADDR.to_le_bytes());
    buf[ph + 32..ph + 40].copy_from_slice(&filesz.to_le_bytes());
    buf[ph + 40..ph + 48].copy_from_slice(&filesz.to_le_bytes());
    buf[ph + 48..ph + 56].copy_from_slice(&PAGE_SIZE.to_le_bytes());

    let code_off = ph + PHSIZE as usize;
    buf[code_off..code_off + code_bytes.len()].copy_from_slice(&code_bytes);
    let data_off = code_off + code_bytes.len();
    buf[data_off..data_off + data.len()].copy_from_slice(data);
    buf
}

/// Run a freshly-loaded image to completion (no checkpoint, no bridge I/O
/// thread), returning its exit code and whatever it wrote to stdout.
pub fn run_to_completion(image: Vec<u8>) -> (i32, Vec<u8>) {
    use rvsim::arena::Arena;
    use rvsim::context::ExecuteContext;
    use rvsim::dispatch::{Dispatch, ExitReason};
    use rvsim::elf;
    use rvsim::jit::JitManager;
    use rvsim::vfs::Vfs;

    let arena = Arena::new();
    let loaded = elf::load_elf(&arena, &image, 0).expect("loading hand-built test ELF");
    let mut dispatch = Dispatch::new(arena.clone());
    dispatch.regs.set_pc(loaded.entry);

    let mut ctx = ExecuteContext::new(loaded.entry, (loaded.highest_addr + 0xfff) & !0xfff, vec![], vec![], "/test".into());
    let vfs = Vfs::new();
    let mut jit = JitManager::new();

    loop {
        match dispatch.run_chunk(&mut ctx, &vfs, &mut jit) {
            Ok(Some(ExitReason::Exited(code))) => {
                let out = ctx.bridge.stdout.drain();
                return (code, out);
            }
            Ok(Some(ExitReason::BlockOnInput)) => panic!("test program unexpectedly blocked on stdin"),
            Ok(None) => {}
            Err(fault) => panic!("unexpected host fault: {fault}"),
        }
        jit.process_compile_queue(&dispatch.arena, &mut dispatch.decoder);
    }
}
