//! The I/O bridge (component I): the cooperative boundary between the
//! execution thread and the host-facing I/O thread. Three independent
//! channels per SPEC_FULL.md §4.I: the control block (commands, stdin
//! request/reply, resize, exit, network-RPC signaling), the stdout ring
//! (wait-free producer / lock-free consumer), and the network RPC frame.
//!
//! The execution thread only ever touches `Bridge` through the blocking,
//! synchronous methods below — it never awaits a future or holds a tokio
//! handle. The I/O thread runs `Bridge::service_once` on a bounded poll
//! interval from inside its own single-threaded tokio runtime
//! (`main.rs`/boot glue).

pub mod control;
pub mod netrpc;
pub mod stdout_ring;

pub use control::{Command, ControlBlock};
pub use netrpc::NetRpc;
pub use stdout_ring::StdoutRing;

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// The I/O thread's poll interval ceiling (SPEC_FULL.md §5: "≤ 4 ms").
pub const POLL_INTERVAL: Duration = Duration::from_millis(4);

pub struct Bridge {
    pub control: ControlBlock,
    pub stdout: StdoutRing,
    pub netrpc: NetRpc,
    stdin_buffer: Mutex<VecDeque<u8>>,
    stdin_eof: AtomicBool,
}

impl Bridge {
    pub fn new() -> Self {
        Bridge {
            control: ControlBlock::new(),
            stdout: StdoutRing::new(),
            netrpc: NetRpc::new(),
            stdin_buffer: Mutex::new(VecDeque::new()),
            stdin_eof: AtomicBool::new(false),
        }
    }

    /// Execution-thread side of `write(1|2, ...)`: push into the stdout
    /// ring, spinning briefly and then yielding if it's full (SPEC_FULL.md
    /// §4.I back-pressure policy), never blocking indefinitely on the I/O
    /// thread itself.
    pub fn write_stdout(&self, mut bytes: &[u8]) {
        const SPIN_ITERS: u32 = 64;
        while !bytes.is_empty() {
            let n = self.stdout.push(bytes);
            bytes = &bytes[n..];
            if bytes.is_empty() {
                break;
            }
            for _ in 0..SPIN_ITERS {
                std::hint::spin_loop();
            }
            std::thread::yield_now();
        }
    }

    /// Execution-thread side of `read(0, ...)`: a genuine suspension point
    /// (SPEC_FULL.md §5 (a) "STDIN_REQUEST round-trip"). Returns up to
    /// `max_len` bytes, or empty at EOF.
    pub fn read_stdin_blocking(&self, max_len: usize) -> Vec<u8> {
        {
            let mut buf = self.stdin_buffer.lock().unwrap();
            if !buf.is_empty() {
                let n = max_len.min(buf.len());
                return buf.drain(..n).collect();
            }
        }
        if self.stdin_eof.load(Ordering::Relaxed) {
            return Vec::new();
        }
        self.control.post(Command::StdinRequest, max_len as u32, 0, &[]);
        loop {
            self.control.wait_for_change(POLL_INTERVAL);
            match self.control.command() {
                Command::StdinReady => {
                    let len = self.control.length() as usize;
                    let bytes = self.control.take_payload(len);
                    self.control.acknowledge();
                    if bytes.is_empty() {
                        self.stdin_eof.store(true, Ordering::Relaxed);
                        return Vec::new();
                    }
                    let mut buf = self.stdin_buffer.lock().unwrap();
                    buf.extend(bytes);
                    let n = max_len.min(buf.len());
                    return buf.drain(..n).collect();
                }
                Command::Exit => return Vec::new(),
                _ => continue,
            }
        }
    }

    /// I/O-thread side: one pass of servicing whatever is pending. Called in
    /// a loop from a single-threaded tokio runtime at `POLL_INTERVAL`.
    pub fn service_once(&self) {
        let out = self.stdout.drain();
        if !out.is_empty() {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&out);
            let _ = stdout.flush();
        }

        if self.control.command() == Command::StdinRequest {
            let max_len = (self.control.length() as usize).min(control::INLINE_PAYLOAD_LEN);
            let mut tmp = vec![0u8; max_len.max(1)];
            let n = std::io::stdin().read(&mut tmp).unwrap_or(0);
            self.control.post(Command::StdinReady, n as u32, 0, &tmp[..n]);
        }

        if let Some(req) = self.netrpc.poll_request() {
            // No syscall handler issues a network RPC in this build (socket
            // syscalls act on real host sockets directly from the execution
            // thread); answer with ENOSYS rather than silently dropping the
            // request so a future caller gets a well-defined result.
            self.netrpc.complete(netrpc::Response { result: -38, data: Vec::new() });
        }
    }

    pub fn resize(&self, cols: u32, rows: u32) {
        self.control.set_resize(cols, rows);
    }

    pub fn notify_exit(&self, code: i32) {
        self.control.set_exit(code);
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn write_stdout_is_drained_by_service_once() {
        let bridge = Bridge::new();
        bridge.write_stdout(b"hi there");
        let before = bridge.stdout.free_space();
        bridge.stdout.drain(); // service_once would do this; exercised directly to avoid real stdout in tests
        assert!(bridge.stdout.free_space() > before);
    }

    #[test]
    fn read_stdin_blocking_unblocks_once_stdin_ready_is_posted() {
        let bridge = Arc::new(Bridge::new());
        let reader = Arc::clone(&bridge);
        let handle = thread::spawn(move || reader.read_stdin_blocking(5));

        // Wait for the STDIN_REQUEST to post, then answer it directly
        // (standing in for the I/O thread's service_once).
        loop {
            if bridge.control.command() == Command::StdinRequest {
                break;
            }
            thread::yield_now();
        }
        bridge.control.post(Command::StdinReady, 5, 0, b"howdy");

        let got = handle.join().unwrap();
        assert_eq!(got, b"howdy");
    }
}
