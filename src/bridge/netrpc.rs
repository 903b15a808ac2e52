//! The network RPC frame (SPEC_FULL.md §4.I / §6): the wire shape the I/O
//! thread and execution thread would exchange socket requests over in a
//! true shared-memory embedding. `Frame` models the 64-byte header exactly;
//! `NetRpc` is the in-process request/response channel this build uses to
//! carry it (a `Mutex`+`Condvar` handoff standing in for the process-shared
//! ring a true embedding would use).

use std::sync::{Condvar, Mutex};

pub const HEADER_LEN: usize = 64;
pub const DATA_AREA_LEN: usize = 65472;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Op {
    SocketCreate = 1,
    Connect = 2,
    Bind = 3,
    Listen = 4,
    Accept = 5,
    Send = 6,
    Recv = 7,
    Close = 8,
    HasData = 9,
    HasPendingAccept = 10,
    SetSockOpt = 11,
    GetSockOpt = 12,
    Shutdown = 13,
}

/// One 64-byte header as laid out in SPEC_FULL.md §6: `lock:i32, op:i32,
/// fd:i32, arg1:i32, arg2:i32, result:i32, data_len:u32, _pad:u32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameHeader {
    pub lock: i32,
    pub op: i32,
    pub fd: i32,
    pub arg1: i32,
    pub arg2: i32,
    pub result: i32,
    pub data_len: u32,
    pub _pad: u32,
}

impl FrameHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.lock.to_le_bytes());
        out[4..8].copy_from_slice(&self.op.to_le_bytes());
        out[8..12].copy_from_slice(&self.fd.to_le_bytes());
        out[12..16].copy_from_slice(&self.arg1.to_le_bytes());
        out[16..20].copy_from_slice(&self.arg2.to_le_bytes());
        out[20..24].copy_from_slice(&self.result.to_le_bytes());
        out[24..28].copy_from_slice(&self.data_len.to_le_bytes());
        out[28..32].copy_from_slice(&self._pad.to_le_bytes());
        out
    }

    pub fn from_bytes(b: &[u8; HEADER_LEN]) -> Self {
        FrameHeader {
            lock: i32::from_le_bytes(b[0..4].try_into().unwrap()),
            op: i32::from_le_bytes(b[4..8].try_into().unwrap()),
            fd: i32::from_le_bytes(b[8..12].try_into().unwrap()),
            arg1: i32::from_le_bytes(b[12..16].try_into().unwrap()),
            arg2: i32::from_le_bytes(b[16..20].try_into().unwrap()),
            result: i32::from_le_bytes(b[20..24].try_into().unwrap()),
            data_len: u32::from_le_bytes(b[24..28].try_into().unwrap()),
            _pad: u32::from_le_bytes(b[28..32].try_into().unwrap()),
        }
    }
}

pub struct Request {
    pub header: FrameHeader,
    pub data: Vec<u8>,
}

pub struct Response {
    pub result: i32,
    pub data: Vec<u8>,
}

enum Slot {
    Empty,
    Pending(Request),
    Done(Response),
}

/// Single-request-in-flight handoff: the execution thread never issues a
/// second `NETWORK_RPC` before the first's `NETWORK_RPC_DONE` (SPEC_FULL.md
/// §5 — only one RPC round-trip suspends the execution thread at a time).
pub struct NetRpc {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl NetRpc {
    pub fn new() -> Self {
        NetRpc { slot: Mutex::new(Slot::Empty), ready: Condvar::new() }
    }

    /// Execution-thread side: submit a request and block for its response.
    pub fn call(&self, header: FrameHeader, data: Vec<u8>) -> Response {
        {
            let mut slot = self.slot.lock().unwrap();
            *slot = Slot::Pending(Request { header, data });
            self.ready.notify_all();
        }
        let mut slot = self.slot.lock().unwrap();
        loop {
            if matches!(*slot, Slot::Done(_)) {
                break;
            }
            slot = self.ready.wait(slot).unwrap();
        }
        match std::mem::replace(&mut *slot, Slot::Empty) {
            Slot::Done(resp) => resp,
            _ => unreachable!(),
        }
    }

    /// I/O-thread side: take the next pending request, if any, without
    /// blocking (polled at the bridge's bounded interval).
    pub fn poll_request(&self) -> Option<Request> {
        let mut slot = self.slot.lock().unwrap();
        if matches!(*slot, Slot::Pending(_)) {
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Pending(req) => Some(req),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    pub fn complete(&self, response: Response) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Slot::Done(response);
        self.ready.notify_all();
    }
}

impl Default for NetRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_through_bytes() {
        let h = FrameHeader { lock: 0, op: Op::Send as i32, fd: 7, arg1: 1, arg2: 2, result: 0, data_len: 128, _pad: 0 };
        let bytes = h.to_bytes();
        let back = FrameHeader::from_bytes(&bytes);
        assert_eq!(back.op, Op::Send as i32);
        assert_eq!(back.fd, 7);
        assert_eq!(back.data_len, 128);
    }

    #[test]
    fn poll_request_then_complete_unblocks_call() {
        use std::sync::Arc;
        use std::thread;

        let rpc = Arc::new(NetRpc::new());
        let rpc2 = Arc::clone(&rpc);
        let handle = thread::spawn(move || {
            loop {
                if let Some(req) = rpc2.poll_request() {
                    assert_eq!(req.header.op, Op::Close as i32);
                    rpc2.complete(Response { result: 0, data: vec![] });
                    break;
                }
                thread::yield_now();
            }
        });
        let header = FrameHeader { op: Op::Close as i32, fd: 3, ..Default::default() };
        let resp = rpc.call(header, vec![]);
        assert_eq!(resp.result, 0);
        handle.join().unwrap();
    }
}
