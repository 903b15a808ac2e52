//! End-to-end scenario: a static RV64 binary that writes "hello world\n" to
//! stdout and exits 0 (no dynamic linker, no filesystem access beyond its
//! own image).

mod common;

use common::{addi, build_elf, load_address, run_to_completion, ECALL};

const A0: u8 = 10;
const A1: u8 = 11;
const A2: u8 = 12;
const A7: u8 = 17;

#[test]
fn writes_hello_world_and_exits_zero() {
    let message = b"hello world\n";

    // Instruction layout (4 bytes each), indices 0..=8:
    //   0: addi a7, x0, 64        ; a7 = SYS_write
    //   1: addi a0, x0, 1         ; a0 = fd 1
    //   2: auipc a1, 0            ; a1 = pc  \_ a1 := &message
    //   3: addi  a1, a1, off          /
    //   4: addi a2, x0, len(message)
    //   5: ecall
    //   6: addi a7, x0, 94        ; a7 = SYS_exit_group
    //   7: addi a0, x0, 0
    //   8: ecall
    let code_base = common::CODE_BASE;
    let message_addr = code_base + 9 * 4; // right after the 9 fixed instructions
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

    let image = build_elf(&code, message);
    let (exit_code, stdout) = run_to_completion(image);

    assert_eq!(exit_code, 0);
    assert_eq!(stdout, message);
}
