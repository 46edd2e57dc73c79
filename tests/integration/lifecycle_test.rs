// tests/integration/lifecycle_test.rs

use super::test_helpers::Harness;
use authgate::connection::ConnectionState;

#[test]
fn test_destroy_before_handshake_frees_immediately() {
    let h = Harness::new();
    let (conn, _socket) = h.connect();

    conn.destroy();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.ref_count(), 0);
    assert!(conn.is_freed());
    assert!(h.listener.is_empty());
}

#[test]
fn test_destroy_is_idempotent() {
    let h = Harness::new();
    let (conn, _socket) = h.handshake(100);

    conn.destroy();
    conn.destroy();
    conn.destroy();

    assert_eq!(conn.ref_count(), 0);
    assert_eq!(h.engines.log.borrow().releases, 1);
}

#[test]
fn test_engine_keeps_connection_until_it_closes() {
    let h = Harness::new();
    h.engines.defer_close.set(true);
    let (conn, _socket) = h.handshake(100);
    assert_eq!(conn.ref_count(), 2);

    conn.destroy();
    assert!(conn.is_closed());
    assert!(!conn.is_freed());
    assert_eq!(conn.ref_count(), 1);
    assert!(!h.listener.contains(&conn));

    assert_eq!(h.engines.finish_closes(), 1);
    assert_eq!(conn.ref_count(), 0);
    assert!(conn.is_freed());
}

#[test]
fn test_late_engine_reply_after_destroy_is_dropped() {
    let h = Harness::new();
    h.engines.defer_close.set(true);
    let (conn, socket) = h.handshake(100);
    conn.destroy();

    h.engines.reply(0, "OK\t1");
    assert_eq!(socket.take_output(), "");
    assert!(!conn.output_pending());

    h.engines.finish_closes();
    assert!(conn.is_freed());
}

#[test]
fn test_hold_delays_free() {
    let h = Harness::new();
    let (conn, _socket) = h.handshake(100);

    let guard = conn.hold();
    assert_eq!(conn.ref_count(), 3);
    assert!(guard.connection().ptr_eq(&conn));

    conn.destroy();
    assert!(conn.is_closed());
    assert!(!conn.is_freed());
    assert_eq!(conn.ref_count(), 1);

    drop(guard);
    assert!(conn.is_freed());
}

#[test]
fn test_batch_reference_is_released_after_processing() {
    let h = Harness::new();
    let (conn, socket) = h.handshake(100);

    socket.push("AUTH\t1\tPLAIN\nAUTH\t2\tPLAIN\n");
    conn.on_readable();

    assert_eq!(h.engines.begins().len(), 2);
    assert_eq!(conn.ref_count(), 2);
}

#[test]
fn test_destroy_wakes_the_driver() {
    let h = Harness::new();
    let (conn, _socket) = h.connect();
    conn.destroy();

    // A stored permit makes the next wait complete immediately.
    let notified = conn.wakeup().notified();
    tokio::pin!(notified);
    assert!(
        poll_once(notified.as_mut()),
        "destroy should leave a wakeup permit"
    );
}

/// Polls a future once with a no-op waker.
fn poll_once<F: std::future::Future>(fut: std::pin::Pin<&mut F>) -> bool {
    let waker = std::task::Waker::noop();
    let mut cx = std::task::Context::from_waker(waker);
    fut.poll(&mut cx).is_ready()
}

#[test]
fn test_shutdown_destroys_every_connection() {
    let h = Harness::new();
    let (a, _sa) = h.handshake(1);
    let (b, _sb) = h.handshake(2);
    let (c, _sc) = h.connect();
    assert_eq!(h.listener.len(), 3);

    h.listener.shutdown();
    assert!(h.listener.is_empty());
    for conn in [&a, &b, &c] {
        assert!(conn.is_closed());
        assert!(conn.is_freed());
    }
    assert_eq!(h.engines.log.borrow().releases, 2);
}

#[test]
fn test_debug_output_names_the_connection() {
    let h = Harness::new();
    let (conn, _socket) = h.handshake(31);
    let rendered = format!("{conn:?}");
    assert!(rendered.contains("connect_uid: 1"));
    assert!(rendered.contains("client_pid: 31"));
    assert!(rendered.contains("Active"));
}
