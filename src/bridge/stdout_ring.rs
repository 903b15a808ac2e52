//! The stdout ring (SPEC_FULL.md §4.I / §6): wait-free from the producer
//! (execution thread) side, lock-free from the consumer (I/O thread) side.
//! Modeled the same way `arena.rs` models shared mutable bytes: a fixed
//! `AtomicU8` backing array indexed by two `AtomicU32` cursors, so no lock is
//! ever taken on the hot write path.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

pub const RING_SIZE: usize = 65528;

pub struct StdoutRing {
    data: Box<[AtomicU8]>,
    write_head: AtomicU32,
    read_tail: AtomicU32,
}

impl StdoutRing {
    pub fn new() -> Self {
        let mut data = Vec::with_capacity(RING_SIZE);
        data.resize_with(RING_SIZE, || AtomicU8::new(0));
        StdoutRing {
            data: data.into_boxed_slice(),
            write_head: AtomicU32::new(0),
            read_tail: AtomicU32::new(0),
        }
    }

    fn occupied(&self, head: u32, tail: u32) -> usize {
        (head.wrapping_sub(tail) as usize) % RING_SIZE
    }

    pub fn free_space(&self) -> usize {
        let head = self.write_head.load(Ordering::Acquire);
        let tail = self.read_tail.load(Ordering::Acquire);
        RING_SIZE - 1 - self.occupied(head, tail)
    }

    /// Push as many bytes as currently fit, returning the number accepted.
    /// Back-pressure (spin-then-yield) is the caller's responsibility
    /// (SPEC_FULL.md §4.I): this never blocks.
    pub fn push(&self, bytes: &[u8]) -> usize {
        let head = self.write_head.load(Ordering::Relaxed);
        let tail = self.read_tail.load(Ordering::Acquire);
        let free = RING_SIZE - 1 - self.occupied(head, tail);
        let n = bytes.len().min(free);
        for (i, b) in bytes[..n].iter().enumerate() {
            let idx = (head as usize + i) % RING_SIZE;
            self.data[idx].store(*b, Ordering::Relaxed);
        }
        self.write_head.store(head.wrapping_add(n as u32), Ordering::Release);
        n
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<u8> {
        let head = self.write_head.load(Ordering::Acquire);
        let tail = self.read_tail.load(Ordering::Relaxed);
        let n = self.occupied(head, tail);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let idx = (tail as usize + i) % RING_SIZE;
            out.push(self.data[idx].load(Ordering::Relaxed));
        }
        self.read_tail.store(tail.wrapping_add(n as u32), Ordering::Release);
        out
    }

    pub fn is_full(&self) -> bool {
        self.free_space() == 0
    }
}

impl Default for StdoutRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_preserves_order() {
        let ring = StdoutRing::new();
        ring.push(b"hello ");
        ring.push(b"world");
        assert_eq!(ring.drain(), b"hello world");
    }

    #[test]
    fn push_past_capacity_truncates_and_reports_accepted_count() {
        let ring = StdoutRing::new();
        let big = vec![b'x'; RING_SIZE];
        let accepted = ring.push(&big);
        assert_eq!(accepted, RING_SIZE - 1);
        assert!(ring.is_full());
    }

    #[test]
    fn wraps_around_after_drain() {
        let ring = StdoutRing::new();
        ring.push(&vec![b'a'; RING_SIZE - 10]);
        ring.drain();
        ring.push(b"wrapped");
        assert_eq!(ring.drain(), b"wrapped");
    }
}
