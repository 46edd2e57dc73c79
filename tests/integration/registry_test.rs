// tests/integration/registry_test.rs

use super::test_helpers::{Harness, RecordingMasterPeers};
use authgate::connection::ConnectionState;
use std::rc::Rc;

#[test]
fn test_lookup_finds_handshaken_connections() {
    let h = Harness::new();
    let (a, _sa) = h.handshake(10);
    let (b, _sb) = h.handshake(20);
    let (_c, _sc) = h.connect();

    assert!(h.listener.lookup(10).unwrap().ptr_eq(&a));
    assert!(h.listener.lookup(20).unwrap().ptr_eq(&b));
    assert!(h.listener.lookup(30).is_none());
}

#[test]
fn test_registry_keeps_insertion_order() {
    let h = Harness::new();
    let (a, _sa) = h.connect();
    let (b, _sb) = h.connect();
    let (c, _sc) = h.connect();
    b.destroy();

    let uids: Vec<u32> = h.listener.clients().iter().map(|c| c.connect_uid()).collect();
    assert_eq!(uids, vec![a.connect_uid(), c.connect_uid()]);
}

#[test]
fn test_duplicate_pid_of_live_connection_is_rejected() {
    let h = Harness::new();
    let (old, _old_socket) = h.handshake(500);
    let (new, socket) = h.connect();

    socket.push("VERSION\t1\t0\nCPID\t500\n");
    new.on_readable();

    assert!(new.is_closed());
    assert_eq!(old.state(), ConnectionState::Active);
    assert!(h.listener.lookup(500).unwrap().ptr_eq(&old));
    assert_eq!(h.engines.created(), 1);
}

#[test]
fn test_duplicate_pid_of_dead_connection_is_reclaimed() {
    let h = Harness::new();
    let (old, old_socket) = h.handshake(500);
    // The old client is gone but nothing has read from it yet.
    old_socket.hang_up();
    assert!(!old.is_closed());

    let (new, socket) = h.connect();
    socket.push("VERSION\t1\t0\nCPID\t500\n");
    new.on_readable();

    assert!(old.is_closed());
    assert!(old.is_freed());
    assert_eq!(new.state(), ConnectionState::Active);
    assert!(h.listener.lookup(500).unwrap().ptr_eq(&new));
    assert_eq!(h.listener.len(), 1);
}

#[test]
fn test_reclaim_probe_keeps_data_for_the_old_connection() {
    let h = Harness::new();
    let (old, old_socket) = h.handshake(500);
    old_socket.push("AUTH\t9\tPLAIN\n");

    let (new, socket) = h.connect();
    socket.push("VERSION\t1\t0\nCPID\t500\n");
    new.on_readable();

    assert!(new.is_closed());
    assert!(!old.is_closed());
    // The probe buffered the line without dispatching it.
    assert!(h.engines.begins().is_empty());

    old.process_input();
    assert_eq!(h.engines.begins(), vec!["9\tPLAIN".to_string()]);
}

#[test]
fn test_pid_is_free_again_after_destroy() {
    let h = Harness::new();
    let (old, _old_socket) = h.handshake(500);
    old.destroy();

    let (new, _socket) = h.handshake(500);
    assert_eq!(new.state(), ConnectionState::Active);
}

#[test]
fn test_master_relay_only_offered_with_peers() {
    let masters = Rc::new(RecordingMasterPeers::default());
    let h = Harness::with_master_peers(masters.clone());

    let (_a, _sa) = h.handshake(1);
    masters.peers.set(2);
    let (b, _sb) = h.handshake(2);

    assert_eq!(h.engines.log.borrow().relay_offered, vec![false, true]);
    assert!(!h.engines.relay(0, 1, "OK\t1"));
    assert!(h.engines.relay(1, b.connect_uid(), "OK\t4\tuser=bob"));
    assert_eq!(
        *masters.relayed.borrow(),
        vec![(b.connect_uid(), "OK\t4\tuser=bob".to_string())]
    );
}

#[test]
fn test_listener_without_masters_has_no_peers() {
    let h = Harness::new();
    assert!(!h.listener.has_master_peers());
    let (_conn, _socket) = h.handshake(3);
    assert_eq!(h.engines.log.borrow().relay_offered, vec![false]);
}

#[test]
fn test_check_timeouts_skips_unbound_connections() {
    let h = Harness::new();
    let (_a, _sa) = h.handshake(1);
    let (_b, _sb) = h.connect();
    let (_c, _sc) = h.handshake(3);

    assert_eq!(h.listener.check_timeouts(), 2);
    assert_eq!(h.engines.timeout_checks(), 2);
}
