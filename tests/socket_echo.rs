//! End-to-end scenario: the guest opens a TCP connection to a loopback peer,
//! sends "ping", and reads back 4 bytes. `network.rs` acts on real host
//! sockets directly from the execution thread (a deliberate, documented
//! departure from routing connected-socket I/O through the bridge — see
//! DESIGN.md), so a plain background thread stands in for the peer.

use rvsim::arena::{Arena, GUEST_MEMORY_BASE};
use rvsim::context::ExecuteContext;
use rvsim::syscall::network;
use std::net::TcpListener;
use std::thread;

const AF_INET: i32 = 2;
const SOCK_STREAM: i32 = 1;

#[test]
fn ping_sent_over_loopback_is_echoed_back() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let echo_thread = thread::spawn(move || {
        use std::io::{Read, Write};
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    });

    let arena = Arena::new();
    let mut ctx = ExecuteContext::new(0, 0, vec![], vec![], "/test".into());

    let fd = network::socket(&mut ctx, AF_INET, SOCK_STREAM) as i32;
    assert!(fd >= 0, "socket() failed");

    let addr_buf = GUEST_MEMORY_BASE;
    let mut sockaddr = [0u8; 8];
    sockaddr[2..4].copy_from_slice(&port.to_be_bytes());
    sockaddr[4..8].copy_from_slice(&[127, 0, 0, 1]);
    arena.write_bytes(addr_buf, &sockaddr);

    let rc = network::connect(&arena, &mut ctx, fd, addr_buf, sockaddr.len());
    assert_eq!(rc, 0, "connect() failed");

    let send_buf = GUEST_MEMORY_BASE + 64;
    arena.write_bytes(send_buf, b"ping");
    let sent = network::sendto(&arena, &mut ctx, fd, send_buf, 4);
    assert_eq!(sent, 4);

    let recv_buf = GUEST_MEMORY_BASE + 128;
    let received = network::recvfrom(&arena, &mut ctx, fd, recv_buf, 4);
    assert_eq!(received, 4);
    assert_eq!(arena.memarray(recv_buf, 4), b"ping");

    echo_thread.join().unwrap();
}
