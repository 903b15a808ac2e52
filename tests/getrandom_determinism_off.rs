//! End-to-end scenario: `getrandom` with determinism off (the default, no
//! replay/record file configured) draws from real host entropy, so two
//! independent calls return distinct buffers of the requested length.

use rvsim::arena::{Arena, GUEST_MEMORY_BASE};
use rvsim::syscall::misc::getrandom;

#[test]
fn two_calls_return_distinct_32_byte_buffers() {
    let arena = Arena::new();
    let buf_a = GUEST_MEMORY_BASE;
    let buf_b = GUEST_MEMORY_BASE + 64;

    let n_a = getrandom(&arena, buf_a, 32);
    let n_b = getrandom(&arena, buf_b, 32);

    assert_eq!(n_a, 32);
    assert_eq!(n_b, 32);
    assert_ne!(arena.memarray(buf_a, 32), arena.memarray(buf_b, 32));
}
