//! Periodic idle-session eviction.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::SessionRegistry;

#[derive(Clone, Copy, Debug)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

pub(crate) struct ReaperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub(crate) fn stop(self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Spawn the sweep loop. The task holds only a weak reference and exits
/// once the registry is dropped.
pub(crate) fn spawn(registry: Weak<SessionRegistry>, config: ReaperConfig) -> ReaperHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = config.interval.max(Duration::from_millis(1));

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(registry) = registry.upgrade() else { break };
                    let evicted = registry.sweep(Instant::now(), config.idle_timeout);
                    if evicted > 0 {
                        info!(evicted, remaining = registry.len(), "idle sweep");
                    } else {
                        debug!(active = registry.len(), "idle sweep found nothing");
                    }
                }
            }
        }
        debug!("reaper stopped");
    });

    ReaperHandle { cancel, task }
}
