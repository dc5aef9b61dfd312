use std::time::Duration;

use tokio::{
    task::JoinSet,
    time::{MissedTickBehavior, interval},
};

use crate::bridge::Bridge;

/* === Definitions === */

/// Periodically re-reads the observed fields so the cache converges even
/// when nobody is asking.
///
/// The first pass runs immediately, replacing the seeded defaults with real
/// values as soon as the daemon answers. Each pass only enqueues reads:
/// when the daemon is down they fail inside the queue and the cache keeps
/// its last values. Dropping the scheduler stops the task.
pub struct RefreshScheduler {
    tasks: JoinSet<()>,
}

/* == Public API == */

impl RefreshScheduler {
    pub fn start(bridge: Bridge, period: Duration) -> Self {
        let mut tasks = JoinSet::new();
        tasks.spawn(Self::refresh_task(bridge, period));

        Self { tasks }
    }

    async fn refresh_task(bridge: Bridge, period: Duration) {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;

            tracing::debug!("Starting refresh pass");
            bridge.enqueue_refresh();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}

/* === Tests === */
