//! The shared control block (SPEC_FULL.md §4.I / §6): the command word the
//! execution thread and I/O thread rendezvous on, plus the small inline
//! payload area used for short transfers (terminal size, stdin bytes).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

/// Byte offset of the inline payload, per the control-block layout table.
pub const INLINE_PAYLOAD_OFFSET: usize = 64;
pub const INLINE_PAYLOAD_LEN: usize = 3968;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Idle = 0,
    StdinRequest = 1,
    StdinReady = 2,
    Exit = 3,
    ExportVfs = 4,
    Resize = 5,
    NetworkRpc = 6,
    NetworkRpcDone = 7,
}

impl Command {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => Command::StdinRequest,
            2 => Command::StdinReady,
            3 => Command::Exit,
            4 => Command::ExportVfs,
            5 => Command::Resize,
            6 => Command::NetworkRpc,
            7 => Command::NetworkRpcDone,
            _ => Command::Idle,
        }
    }
}

/// Fixed-offset scalar fields plus a `Mutex`-guarded inline payload. The
/// mutex stands in for what a true shared-memory embedding would express as
/// a process-shared atomic wake/wait primitive: the execution thread blocks
/// on `wait_for_change`, the I/O thread notifies after updating state.
pub struct ControlBlock {
    command: AtomicU32,
    status: AtomicU32,
    length: AtomicU32,
    fd: AtomicU32,
    result: AtomicU32,
    exit_code: AtomicU32,
    cols: AtomicU32,
    rows: AtomicU32,
    payload: Mutex<Vec<u8>>,
    changed: Condvar,
    change_lock: Mutex<()>,
}

impl ControlBlock {
    pub fn new() -> Self {
        ControlBlock {
            command: AtomicU32::new(Command::Idle as u32),
            status: AtomicU32::new(0),
            length: AtomicU32::new(0),
            fd: AtomicU32::new(0),
            result: AtomicU32::new(0),
            exit_code: AtomicU32::new(0),
            cols: AtomicU32::new(80),
            rows: AtomicU32::new(24),
            payload: Mutex::new(vec![0u8; INLINE_PAYLOAD_LEN]),
            changed: Condvar::new(),
            change_lock: Mutex::new(()),
        }
    }

    pub fn command(&self) -> Command {
        Command::from_u32(self.command.load(Ordering::Acquire))
    }

    pub fn terminal_size(&self) -> (u32, u32) {
        (self.cols.load(Ordering::Relaxed), self.rows.load(Ordering::Relaxed))
    }

    /// Post a command and notify whichever side is waiting. Called by
    /// either thread; only one side is ever waiting on a given transition.
    pub fn post(&self, cmd: Command, length: u32, fd: u32, payload: &[u8]) {
        {
            let mut guard = self.payload.lock().unwrap();
            let n = payload.len().min(INLINE_PAYLOAD_LEN);
            guard[..n].copy_from_slice(&payload[..n]);
        }
        self.length.store(length, Ordering::Relaxed);
        self.fd.store(fd, Ordering::Relaxed);
        let _lock = self.change_lock.lock().unwrap();
        self.command.store(cmd as u32, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn set_resize(&self, cols: u32, rows: u32) {
        self.cols.store(cols, Ordering::Relaxed);
        self.rows.store(rows, Ordering::Relaxed);
        let _lock = self.change_lock.lock().unwrap();
        self.command.store(Command::Resize as u32, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn set_exit(&self, code: i32) {
        self.exit_code.store(code as u32, Ordering::Relaxed);
        let _lock = self.change_lock.lock().unwrap();
        self.command.store(Command::Exit as u32, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn length(&self) -> u32 {
        self.length.load(Ordering::Relaxed)
    }

    pub fn payload(&self) -> Vec<u8> {
        self.payload.lock().unwrap().clone()
    }

    pub fn take_payload(&self, len: usize) -> Vec<u8> {
        let guard = self.payload.lock().unwrap();
        guard[..len.min(INLINE_PAYLOAD_LEN)].to_vec()
    }

    /// Block until the command word changes away from `Idle`, or `timeout`
    /// elapses (the I/O thread's bounded poll interval, SPEC_FULL.md §5:
    /// "≤ 4 ms").
    pub fn wait_for_change(&self, timeout: std::time::Duration) {
        let guard = self.change_lock.lock().unwrap();
        let _ = self.changed.wait_timeout(guard, timeout);
    }

    /// Reset to `Idle` once a command has been consumed.
    pub fn acknowledge(&self) {
        self.command.store(Command::Idle as u32, Ordering::Release);
    }
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_then_read_roundtrips_payload() {
        let cb = ControlBlock::new();
        cb.post(Command::StdinReady, 5, 0, b"hello");
        assert_eq!(cb.command(), Command::StdinReady);
        assert_eq!(cb.length(), 5);
        assert_eq!(&cb.take_payload(5), b"hello");
    }

    #[test]
    fn resize_updates_cols_rows_and_posts_command() {
        let cb = ControlBlock::new();
        cb.set_resize(132, 43);
        assert_eq!(cb.terminal_size(), (132, 43));
        assert_eq!(cb.command(), Command::Resize);
    }
}
