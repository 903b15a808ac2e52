//! End-to-end scenario: a launcher binary `execve`s into a second binary.
//! The decoder cache built up while running the launcher must not leak into
//! the `execve`d program (`syscall::process::execve` evicts it via
//! `DecoderCache::evict_all`, called from `syscall::handle`'s `EXECVE` arm).

mod common;

use common::{addi, build_elf, load_address, ECALL};
use rvsim::arena::Arena;
use rvsim::context::ExecuteContext;
use rvsim::dispatch::{Dispatch, ExitReason};
use rvsim::elf;
use rvsim::jit::JitManager;
use rvsim::vfs::{Inode, InodeKind, Vfs};

const A0: u8 = 10;
const A1: u8 = 11;
const A2: u8 = 12;
const A7: u8 = 17;

/// A static binary that writes `message` to stdout and exits 0 — the same
/// shape as the hello-world scenario, reused here as the `execve` target.
fn build_writer(message: &[u8]) -> Vec<u8> {
    let code_base = common::CODE_BASE;
    let message_addr = code_base + 9 * 4;
    let [auipc_a1, addi_a1] = load_address(A1, code_base + 2 * 4, message_addr);
    let code = vec![
        addi(A7, 0, 64),
        addi(A0, 0, 1),
        auipc_a1,
        addi_a1,
        addi(A2, 0, message.len() as i32),
        ECALL,
        addi(A7, 0, 94),
        addi(A0, 0, 0),
        ECALL,
    ];
    build_elf(&code, message)
}

/// A binary that `execve`s `/echo` with `argv = ["/echo"]`, `envp = []`; on
/// failure it falls back to `exit_group(42)` so a broken `execve` path fails
/// the test loudly instead of silently falling through.
fn build_launcher() -> Vec<u8> {
    let code_base = common::CODE_BASE;
    const CODE_INSNS: u64 = 11;
    let code_len = CODE_INSNS * 4;

    let mut data = Vec::new();
    let path_off = data.len() as u64;
    data.extend_from_slice(b"/echo\0");
    while data.len() % 8 != 0 {
        data.push(0);
    }
    let argv_off = data.len() as u64;
    let path_addr = code_base + code_len + path_off;
    data.extend_from_slice(&path_addr.to_le_bytes()); // argv[0]
    data.extend_from_slice(&0u64.to_le_bytes()); // argv[1] = NULL
    let envp_off = data.len() as u64;
    data.extend_from_slice(&0u64.to_le_bytes()); // envp[0] = NULL

    let argv_addr = code_base + code_len + argv_off;
    let envp_addr = code_base + code_len + envp_off;

    let [auipc_a0, addi_a0] = load_address(A0, code_base, path_addr);
    let [auipc_a1, addi_a1] = load_address(A1, code_base + 2 * 4, argv_addr);
    let [auipc_a2, addi_a2] = load_address(A2, code_base + 4 * 4, envp_addr);

    let code = vec![
        auipc_a0,
        addi_a0,
        auipc_a1,
        addi_a1,
        auipc_a2,
        addi_a2,
        addi(A7, 0, 221), // SYS_execve
        ECALL,
        addi(A7, 0, 94), // fallback: exit_group(42) if execve failed
        addi(A0, 0, 42),
        ECALL,
    ];
    assert_eq!(code.len() as u64, CODE_INSNS);
    build_elf(&code, &data)
}

#[test]
fn launcher_execve_into_target_runs_target_to_completion() {
    let mut vfs = Vfs::new();
    vfs.insert("/echo", Inode { kind: InodeKind::File(build_writer(b"done\n")), mode: 0o755 });

    let launcher_image = build_launcher();
    let arena = Arena::new();
    let loaded = elf::load_elf(&arena, &launcher_image, 0).expect("loading launcher ELF");
    let mut dispatch = Dispatch::new(arena.clone());
    dispatch.regs.set_pc(loaded.entry);

    let mut ctx = ExecuteContext::new(loaded.entry, (loaded.highest_addr + 0xfff) & !0xfff, vec!["/launcher".into()], vec![], "/launcher".into());
    let mut jit = JitManager::new();

    let exit_code = loop {
        match dispatch.run_chunk(&mut ctx, &vfs, &mut jit) {
            Ok(Some(ExitReason::Exited(code))) => break code,
            Ok(Some(ExitReason::BlockOnInput)) => panic!("unexpected stdin block"),
            Ok(None) => {}
            Err(fault) => panic!("unexpected host fault: {fault}"),
        }
        jit.process_compile_queue(&dispatch.arena, &mut dispatch.decoder);
    };

    assert_eq!(exit_code, 0, "expected the execve'd /echo binary's exit code, not the launcher's fallback");
    assert_eq!(ctx.bridge.stdout.drain(), b"done\n");
    assert_eq!(ctx.exec_path, "/echo", "ExecuteContext must reflect the execve'd image, not the launcher");
}
