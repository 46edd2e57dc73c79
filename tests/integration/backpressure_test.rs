// tests/integration/backpressure_test.rs

use super::test_helpers::Harness;
use authgate::core::state::{ConnectionSettings, OUTBUF_THROTTLE_SIZE};

fn small_throttle() -> Harness {
    Harness::with_settings(ConnectionSettings {
        output_throttle: 300,
        ..ConnectionSettings::default()
    })
}

#[test]
fn test_default_thresholds() {
    let settings = ConnectionSettings::default();
    assert_eq!(settings.output_throttle, 50 * 1024);
    assert_eq!(OUTBUF_THROTTLE_SIZE, 51200);
    assert_eq!(settings.resume_threshold(), 17066);
}

#[test]
fn test_backlog_at_high_water_mark_pauses_input() {
    let h = small_throttle();
    let (conn, socket) = h.handshake(100);
    socket.set_write_budget(Some(0));

    // 149 bytes + newline each.
    let reply = "x".repeat(149);
    h.engines.reply(0, &reply);
    assert!(conn.wants_input());
    assert_eq!(conn.output_backlog(), 150);

    h.engines.reply(0, &reply);
    assert_eq!(conn.output_backlog(), 300);
    assert!(!conn.wants_input());
    assert!(conn.output_pending());
}

#[test]
fn test_paused_connection_does_not_read() {
    let h = small_throttle();
    let (conn, socket) = h.handshake(100);
    socket.set_write_budget(Some(0));
    h.engines.reply(0, &"x".repeat(400));
    assert!(!conn.wants_input());

    socket.push("AUTH\t1\tPLAIN\n");
    conn.on_readable();
    assert!(h.engines.begins().is_empty());
}

#[test]
fn test_input_resumes_at_one_third() {
    let h = small_throttle();
    let (conn, socket) = h.handshake(100);
    socket.set_write_budget(Some(0));
    h.engines.reply(0, &"x".repeat(299));
    assert_eq!(conn.output_backlog(), 300);
    assert!(!conn.wants_input());

    // 101 bytes left: still above 300 / 3.
    socket.set_write_budget(Some(199));
    conn.on_writable();
    assert_eq!(conn.output_backlog(), 101);
    assert!(!conn.wants_input());

    // Exactly 100 left resumes.
    socket.set_write_budget(Some(1));
    conn.on_writable();
    assert_eq!(conn.output_backlog(), 100);
    assert!(conn.wants_input());

    socket.push("AUTH\t5\tPLAIN\n");
    conn.on_readable();
    assert_eq!(h.engines.begins(), vec!["5\tPLAIN".to_string()]);
}

#[test]
fn test_replies_keep_queueing_while_paused() {
    let h = small_throttle();
    let (conn, socket) = h.handshake(100);
    socket.set_write_budget(Some(0));
    for _ in 0..5 {
        h.engines.reply(0, &"y".repeat(99));
    }
    assert_eq!(conn.output_backlog(), 500);

    socket.set_write_budget(None);
    conn.on_writable();
    assert_eq!(conn.output_backlog(), 0);
    assert!(conn.wants_input());
    assert_eq!(socket.take_lines().len(), 5);
}

#[test]
fn test_reply_that_drains_backlog_resumes_input() {
    let h = small_throttle();
    let (conn, socket) = h.handshake(100);
    socket.set_write_budget(Some(0));
    h.engines.reply(0, &"x".repeat(400));
    assert!(!conn.wants_input());

    // The client catches up, and the next reply's own flush empties the
    // backlog before any writability callback runs.
    socket.set_write_budget(None);
    h.engines.reply(0, "OK\t1");
    assert_eq!(conn.output_backlog(), 0);
    assert!(!conn.output_pending());
    assert!(conn.wants_input());

    socket.push("AUTH\t2\tPLAIN\n");
    conn.on_readable();
    assert_eq!(h.engines.begins(), vec!["2\tPLAIN".to_string()]);
}

#[test]
fn test_reply_above_one_third_stays_paused() {
    let h = small_throttle();
    let (conn, socket) = h.handshake(100);
    socket.set_write_budget(Some(0));
    h.engines.reply(0, &"x".repeat(399));
    assert!(!conn.wants_input());

    // 400 + 10 queued, 250 written: 160 left is still above 100.
    socket.set_write_budget(Some(250));
    h.engines.reply(0, "123456789");
    assert_eq!(conn.output_backlog(), 160);
    assert!(!conn.wants_input());
}

#[test]
fn test_write_failure_is_fatal_on_flush() {
    let h = Harness::new();
    let (conn, socket) = h.handshake(100);
    socket.break_pipe();

    // The reply itself never destroys the connection.
    h.engines.reply(0, "OK\t1");
    assert!(!conn.is_closed());
    assert!(conn.output_pending());

    conn.on_writable();
    assert!(conn.is_closed());
    assert!(conn.is_freed());
    assert!(h.listener.is_empty());
}

#[test]
fn test_flush_after_destroy_is_harmless() {
    let h = Harness::new();
    let (conn, _socket) = h.handshake(100);
    conn.destroy();

    conn.on_writable();
    conn.on_readable();
    assert!(conn.is_closed());
    assert!(!conn.output_pending());
}
