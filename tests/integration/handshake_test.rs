// tests/integration/handshake_test.rs

use super::test_helpers::{FakeSocket, Harness, expected_greeting};
use authgate::connection::{ClientConnection, ConnectionState};

#[test]
fn test_greeting_is_sent_on_create() {
    let h = Harness::new();
    let (conn, socket) = h.connect();

    assert_eq!(socket.take_output(), expected_greeting(1));
    assert_eq!(conn.state(), ConnectionState::AwaitingVersion);
    assert_eq!(conn.ref_count(), 1);
    assert!(h.listener.contains(&conn));
}

#[test]
fn test_connect_uids_are_sequential() {
    let h = Harness::new();
    let (first, _s1) = h.connect();
    let (second, s2) = h.connect();
    let (third, _s3) = h.connect();

    assert_eq!(first.connect_uid(), 1);
    assert_eq!(second.connect_uid(), 2);
    assert_eq!(third.connect_uid(), 3);
    assert_eq!(s2.take_output(), expected_greeting(2));
    assert_eq!(h.listener.len(), 3);
}

#[test]
fn test_full_handshake_binds_engine() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.take_output();

    socket.push("VERSION\t1\t0\n");
    conn.on_readable();
    assert_eq!(conn.state(), ConnectionState::AwaitingClientPid);
    assert_eq!(h.engines.created(), 0);

    socket.push("CPID\t123\n");
    conn.on_readable();
    assert_eq!(conn.state(), ConnectionState::Active);
    assert_eq!(conn.client_pid(), 123);
    assert_eq!(h.engines.log.borrow().binds, vec![(1, 123)]);
    // Registry plus engine.
    assert_eq!(conn.ref_count(), 2);
    // The client gets no acknowledgement.
    assert_eq!(socket.take_output(), "");
}

#[test]
fn test_newer_minor_version_is_accepted() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("VERSION\t1\t7\n");
    conn.on_readable();
    assert_eq!(conn.state(), ConnectionState::AwaitingClientPid);
}

#[test]
fn test_incompatible_major_version_destroys() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("VERSION\t2\t0\n");
    conn.on_readable();

    assert!(conn.is_closed());
    assert!(conn.is_freed());
    assert!(h.listener.is_empty());
}

#[test]
fn test_first_line_must_be_version() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("CPID\t10\n");
    conn.on_readable();

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(h.engines.created(), 0);
}

#[test]
fn test_zero_pid_destroys() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("VERSION\t1\t0\nCPID\t0\n");
    conn.on_readable();

    assert!(conn.is_closed());
    assert_eq!(h.engines.created(), 0);
}

#[test]
fn test_non_numeric_pid_destroys() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("VERSION\t1\t0\nCPID\tabc\n");
    conn.on_readable();

    assert!(conn.is_closed());
}

#[test]
fn test_unknown_handshake_lines_are_ignored() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("VERSION\t1\t0\nOPTION\tfoo\n");
    conn.on_readable();
    assert_eq!(conn.state(), ConnectionState::AwaitingClientPid);

    socket.push("CPID\t77\n");
    conn.on_readable();
    assert_eq!(conn.state(), ConnectionState::Active);
}

#[test]
fn test_pipelined_handshake_and_commands() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("VERSION\t1\t0\nCPID\t55\nAUTH\t1\tPLAIN\tservice=imap\n");
    conn.on_readable();

    assert_eq!(conn.state(), ConnectionState::Active);
    assert_eq!(h.engines.begins(), vec!["1\tPLAIN\tservice=imap".to_string()]);
}

#[test]
fn test_eof_during_handshake_destroys_silently() {
    let h = Harness::new();
    let (conn, socket) = h.connect();
    socket.push("VERSION\t1\t0\n");
    socket.hang_up();
    conn.on_readable();
    assert_eq!(conn.state(), ConnectionState::AwaitingClientPid);

    conn.on_readable();
    assert!(conn.is_closed());
    assert!(conn.is_freed());
}

#[test]
fn test_failed_greeting_write_rejects_connection() {
    let h = Harness::new();
    let socket = FakeSocket::new();
    socket.break_pipe();

    let result = ClientConnection::create(&h.listener, socket.transport());
    assert!(result.is_err());
    assert!(h.listener.is_empty());
}

#[test]
fn test_greeting_survives_a_slow_reader() {
    let h = Harness::new();
    let socket = FakeSocket::new();
    socket.set_write_budget(Some(10));

    let conn = ClientConnection::create(&h.listener, socket.transport()).unwrap();
    assert!(conn.output_pending());

    socket.set_write_budget(None);
    conn.on_writable();
    assert!(!conn.output_pending());
    assert_eq!(socket.take_output(), expected_greeting(1));
}
