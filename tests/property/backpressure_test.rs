// tests/property/backpressure_test.rs

//! Input is paused exactly while the output backlog has crossed the
//! high-water mark and not yet drained to a third of it.

use crate::test_helpers::Harness;
use authgate::core::state::ConnectionSettings;
use proptest::prelude::*;

const THROTTLE: usize = 300;

#[derive(Debug, Clone)]
enum Op {
    Reply(usize),
    Drain(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..200).prop_map(Op::Reply),
        (0usize..400).prop_map(Op::Drain),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_throttle_hysteresis(ops in prop::collection::vec(op(), 1..60)) {
        let h = Harness::with_settings(ConnectionSettings {
            output_throttle: THROTTLE,
            ..ConnectionSettings::default()
        });
        let (conn, socket) = h.handshake(100);
        socket.set_write_budget(Some(0));

        let mut paused = false;
        for op in ops {
            match op {
                Op::Reply(len) => {
                    // Replies flush too, so they can drain as well as fill.
                    h.engines.reply(0, &"r".repeat(len));
                    let backlog = conn.output_backlog();
                    if backlog >= THROTTLE {
                        paused = true;
                    } else if backlog <= THROTTLE / 3 {
                        paused = false;
                    }
                }
                Op::Drain(budget) => {
                    socket.set_write_budget(Some(budget));
                    conn.on_writable();
                    if conn.output_backlog() <= THROTTLE / 3 {
                        paused = false;
                    }
                }
            }
            prop_assert_eq!(conn.wants_input(), !paused);
            prop_assert!(!conn.is_closed());
            prop_assert_eq!(conn.ref_count(), 2);
        }
    }
}
