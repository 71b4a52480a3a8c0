use std::sync::{Arc, Weak};
use std::time::Duration;

use munbot_core::{ChatBackend, PreambleSource};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;

/// Background task probing every key at a fixed interval.
///
/// The task holds only a weak reference and exits once the dispatcher is
/// dropped. Dropping the handle aborts it.
#[derive(Debug)]
pub struct HealthMonitor {
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn<B, S>(dispatcher: &Arc<Dispatcher<B, S>>, interval: Duration) -> Self
    where
        B: ChatBackend + 'static,
        S: PreambleSource + 'static,
    {
        let weak: Weak<Dispatcher<B, S>> = Arc::downgrade(dispatcher);
        info!("Starting API key health monitor (every {}s)", interval.as_secs());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(dispatcher) = weak.upgrade() else {
                    debug!("Dispatcher dropped, stopping health monitor");
                    break;
                };
                let report = dispatcher.health_check().await;
                info!(
                    "Health check finished: {} healthy, {} failed",
                    report.healthy.len(),
                    report.failed.len()
                );
            }
        });

        Self { handle }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
