//! ELF64 loading and Linux-ABI auxiliary vector construction.
//!
//! Grounded on the PT_LOAD-mapping / stack-setup shape of a kernel-side ELF
//! loader, reworked for a userland host process: segments land directly in
//! the flat arena instead of page tables, and there is no ring transition —
//! the interpreter simply starts dispatching at the computed entry point.

use crate::arena::{SharedArena, PAGE_SIZE};
use crate::error::Errno;
use anyhow::{bail, Context, Result};
use goblin::elf::{program_header::PT_INTERP, program_header::PT_LOAD, Elf};

#[derive(Clone)]
pub struct LoadedImage {
    pub entry: u64,
    pub phdr_addr: u64,
    pub phent: u64,
    pub phnum: u64,
    pub load_bias: u64,
    pub interp: Option<String>,
    pub highest_addr: u64,
}

pub const PIE_LOAD_BIAS: u64 = 0x0040_0000;

/// Map every PT_LOAD segment of `data` into `arena`, returning enough
/// bookkeeping to build the auxiliary vector and, for PT_INTERP binaries, to
/// load the dynamic linker as a second image at a higher bias.
pub fn load_elf(arena: &SharedArena, data: &[u8], bias_hint: u64) -> Result<LoadedImage> {
    let elf = Elf::parse(data).context("parsing ELF header")?;
    if !elf.is_64 {
        bail!("only 64-bit ELF is supported");
    }

    let is_pie = elf.header.e_type == goblin::elf::header::ET_DYN;
    let bias = if is_pie { bias_hint } else { 0 };

    let mut highest_addr = 0u64;
    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        let vaddr = ph.p_vaddr + bias;
        let mem_size = ph.p_memsz;
        let file_size = ph.p_filesz;
        let page_base = vaddr & !(PAGE_SIZE - 1);
        let page_end = (vaddr + mem_size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

        arena.zero_fill(page_base, page_end - page_base);
        let file_start = ph.p_offset as usize;
        let file_end = file_start + file_size as usize;
        if file_end > data.len() {
            bail!("PT_LOAD segment extends past end of file");
        }
        arena.write_bytes(vaddr, &data[file_start..file_end]);

        let r = ph.p_flags & 0x4 != 0;
        let w = ph.p_flags & 0x2 != 0;
        let x = ph.p_flags & 0x1 != 0;
        arena.set_range_attr(page_base, page_end - page_base, r, w, x);

        highest_addr = highest_addr.max(vaddr + mem_size);
    }

    let interp = elf
        .program_headers
        .iter()
        .find(|ph| ph.p_type == PT_INTERP)
        .map(|ph| {
            let start = ph.p_offset as usize;
            let end = start + ph.p_filesz as usize;
            String::from_utf8_lossy(&data[start..end.min(data.len())])
                .trim_end_matches('\0')
                .to_string()
        });

    let phdr_addr = elf
        .program_headers
        .iter()
        .find(|ph| ph.p_type == goblin::elf::program_header::PT_PHDR)
        .map(|ph| ph.p_vaddr + bias)
        .unwrap_or(bias + elf.header.e_phoff);

    Ok(LoadedImage {
        entry: elf.header.e_entry + bias,
        phdr_addr,
        phent: elf.header.e_phentsize as u64,
        phnum: elf.header.e_phnum as u64,
        load_bias: bias,
        interp,
        highest_addr,
    })
}

/// Load a PT_INTERP-named dynamic linker from the VFS at a fixed high bias,
/// well clear of the main executable's PIE load range.
const INTERP_BIAS: u64 = 0x7000_0000;

pub fn load_interp(arena: &SharedArena, data: &[u8]) -> Result<LoadedImage> {
    load_elf(arena, data, INTERP_BIAS)
}

// Linux AT_* auxv constants (asm-generic/auxvec.h).
const AT_NULL: u64 = 0;
const AT_PHDR: u64 = 3;
const AT_PHENT: u64 = 4;
const AT_PHNUM: u64 = 5;
const AT_PAGESZ: u64 = 6;
const AT_BASE: u64 = 7;
const AT_ENTRY: u64 = 9;
const AT_UID: u64 = 11;
const AT_EUID: u64 = 12;
const AT_GID: u64 = 13;
const AT_EGID: u64 = 14;
const AT_SECURE: u64 = 23;
const AT_RANDOM: u64 = 25;
const AT_EXECFN: u64 = 31;

/// Build the guest stack: argc/argv/envp/auxv below `stack_top`, per the
/// Linux process-startup ABI. Returns the resulting stack pointer.
#[allow(clippy::too_many_arguments)]
pub fn setup_stack(
    arena: &SharedArena,
    stack_top: u64,
    argv: &[String],
    envp: &[String],
    image: &LoadedImage,
    exec_path: &str,
    random_bytes: [u8; 16],
    real_entry: u64,
) -> u64 {
    let mut sp = stack_top;

    // Strings first, highest addresses, so their offsets are known before we
    // write the pointer tables below them.
    let mut write_str = |s: &str| -> u64 {
        let bytes = s.as_bytes();
        sp -= (bytes.len() + 1) as u64;
        arena.write_bytes(sp, bytes);
        arena.write_bytes(sp + bytes.len() as u64, &[0]);
        sp
    };

    let execfn_addr = write_str(exec_path);
    let mut envp_addrs = Vec::with_capacity(envp.len());
    for e in envp.iter().rev() {
        envp_addrs.push(write_str(e));
    }
    envp_addrs.reverse();
    let mut argv_addrs = Vec::with_capacity(argv.len());
    for a in argv.iter().rev() {
        argv_addrs.push(write_str(a));
    }
    argv_addrs.reverse();

    sp -= 16;
    let random_addr = sp;
    arena.write_bytes(random_addr, &random_bytes);

    // Align to 16 bytes before the argc/argv/envp/auxv block, per the ABI.
    sp &= !0xf;

    let auxv: Vec<(u64, u64)> = vec![
        (AT_PHDR, image.phdr_addr),
        (AT_PHENT, image.phent),
        (AT_PHNUM, image.phnum),
        (AT_PAGESZ, PAGE_SIZE),
        (AT_BASE, image.load_bias),
        (AT_ENTRY, real_entry),
        (AT_UID, 0),
        (AT_EUID, 0),
        (AT_GID, 0),
        (AT_EGID, 0),
        (AT_SECURE, 0),
        (AT_RANDOM, random_addr),
        (AT_EXECFN, execfn_addr),
        (AT_NULL, 0),
    ];

    // Layout from high to low addresses: auxv, envp NULL, envp[], argv NULL,
    // argv[], argc. We compute total size first so everything lands at a
    // 16-byte aligned sp with argc at the very bottom.
    let total_u64s = 1 // argc
        + argv_addrs.len() + 1 // argv[] + NULL
        + envp_addrs.len() + 1 // envp[] + NULL
        + auxv.len() * 2; // auxv pairs
    sp -= (total_u64s as u64) * 8;
    sp &= !0xf;

    let mut cursor = sp;
    let mut write_u64 = |v: u64| {
        arena.store_u64(cursor, v);
        cursor += 8;
    };

    write_u64(argv_addrs.len() as u64);
    for a in &argv_addrs {
        write_u64(*a);
    }
    write_u64(0);
    for e in &envp_addrs {
        write_u64(*e);
    }
    write_u64(0);
    for (key, val) in &auxv {
        write_u64(*key);
        write_u64(*val);
    }

    sp
}

pub fn errno_for_load_failure() -> Errno {
    Errno::ENOEXEC_FALLBACK
}

impl Errno {
    /// ELF loading has no single canonical Linux errno constant already in
    /// the small table in `error.rs`; `ENOEXEC` (8) is what the kernel
    /// actually returns for a malformed executable.
    #[allow(non_upper_case_globals)]
    pub const ENOEXEC_FALLBACK: Errno = Errno(8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn minimal_static_elf() -> Vec<u8> {
        // A hand-built minimal ET_EXEC RV64 ELF with a single PT_LOAD
        // segment covering the whole file, entry point at the start of the
        // load segment. Enough for goblin to parse and for load_elf to map.
        let entry_vaddr: u64 = 0x1_0000;
        let ehsize = 64u16;
        let phsize = 56u16;
        let phoff = ehsize as u64;
        let code = [0x13, 0x00, 0x00, 0x00]; // addi x0, x0, 0 (nop)
        let filesz = phoff + phsize as u64 + code.len() as u64;

        let mut buf = vec![0u8; filesz as usize];
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 2; // ELFCLASS64
        buf[5] = 1; // little endian
        buf[6] = 1; // EI_VERSION
        buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
        buf[18..20].copy_from_slice(&243u16.to_le_bytes()); // e_machine = EM_RISCV
        buf[20..24].copy_from_slice(&1u32.to_le_bytes());
        buf[24..32].copy_from_slice(&entry_vaddr.to_le_bytes()); // e_entry
        buf[32..40].copy_from_slice(&phoff.to_le_bytes()); // e_phoff
        buf[52..54].copy_from_slice(&ehsize.to_le_bytes());
        buf[54..56].copy_from_slice(&phsize.to_le_bytes());
        buf[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        let ph_off = phoff as usize;
        buf[ph_off..ph_off + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        buf[ph_off + 4..ph_off + 8].copy_from_slice(&5u32.to_le_bytes()); // PF_R|PF_X
        buf[ph_off + 8..ph_off + 16].copy_from_slice(&0u64.to_le_bytes()); // p_offset
        buf[ph_off + 16..ph_off + 24].copy_from_slice(&entry_vaddr.to_le_bytes());
        buf[ph_off + 24..ph_off + 32].copy_from_slice(&entry_vaddr.to_le_bytes());
        buf[ph_off + 32..ph_off + 40].copy_from_slice(&filesz.to_le_bytes());
        buf[ph_off + 40..ph_off + 48].copy_from_slice(&filesz.to_le_bytes());
        buf[ph_off + 48..ph_off + 56].copy_from_slice(&PAGE_SIZE.to_le_bytes());

        let code_off = (phoff + phsize as u64) as usize;
        buf[code_off..code_off + code.len()].copy_from_slice(&code);
        buf
    }

    #[test]
    fn loads_static_elf_and_maps_entry() {
        let arena = Arena::new();
        let data = minimal_static_elf();
        let image = load_elf(&arena, &data, 0).unwrap();
        assert_eq!(image.entry, 0x1_0000);
        assert!(arena.is_executable(0x1_0000));
    }
}
