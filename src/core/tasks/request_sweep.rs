// src/core/tasks/request_sweep.rs

use crate::core::state::AuthListener;
use std::rc::Weak;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically asks every bound request engine to expire stale requests.
///
/// The task only holds a weak reference, so it never keeps a listener alive;
/// it ends on its own once the listener is gone, and is otherwise stopped by
/// aborting its handle.
pub struct RequestSweepTask {
    listener: Weak<AuthListener>,
    period: Duration,
}

impl RequestSweepTask {
    pub fn new(listener: Weak<AuthListener>, period: Duration) -> Self {
        Self { listener, period }
    }

    pub async fn run(self) {
        // The first sweep happens one full period after start.
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(listener) = self.listener.upgrade() else {
                info!("Listener is gone, request timeout sweep exiting.");
                return;
            };
            let checked = listener.check_timeouts();
            debug!("Request timeout sweep checked {} engines.", checked);
        }
    }
}
