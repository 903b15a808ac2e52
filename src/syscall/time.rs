//! Time syscalls, backed by the host wall clock via `chrono`.

use crate::arena::SharedArena;
use chrono::Utc;

const CLOCK_REALTIME: i32 = 0;
const CLOCK_MONOTONIC: i32 = 1;

pub fn clock_gettime(arena: &SharedArena, clock_id: i32, timespec: u64) {
    let (sec, nsec) = match clock_id {
        CLOCK_MONOTONIC => {
            // No guest-visible difference from realtime is modeled; a
            // monotonic clock that never regresses is enough for guests
            // that only compute deltas.
            let now = Utc::now();
            (now.timestamp(), now.timestamp_subsec_nanos())
        }
        CLOCK_REALTIME | _ => {
            let now = Utc::now();
            (now.timestamp(), now.timestamp_subsec_nanos())
        }
    };
    arena.store_u64(timespec, sec as u64);
    arena.store_u64(timespec + 8, nsec as u64);
}

pub fn gettimeofday(arena: &SharedArena, tv: u64) {
    let now = Utc::now();
    arena.store_u64(tv, now.timestamp() as u64);
    arena.store_u64(tv + 8, (now.timestamp_subsec_nanos() / 1000) as u64);
}

/// `nanosleep`/`clock_nanosleep` never actually block the execution thread
/// (there is no guest-visible wall-clock stall this emulator models); they
/// report having slept the full duration immediately.
pub fn nanosleep() -> i64 {
    0
}

/// `clock_getres(2)`: report a 1ns resolution for both clocks this emulator
/// understands (SPEC_FULL.md's clock model has no coarser granularity).
pub fn clock_getres(arena: &SharedArena, res: u64) -> i64 {
    if res != 0 {
        arena.store_u64(res, 0);
        arena.store_u64(res + 8, 1);
    }
    0
}
