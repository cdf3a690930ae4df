//! Periodic retention cleanup

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::domain::metrics::RetentionDays;
use crate::infrastructure::log_messages;
use crate::store::TimeSeriesStore;

/// Runs `cleanup_old_data` every `interval` until stopped
///
/// A cleanup pass that is already running when stop is requested is allowed
/// to finish.
pub struct RetentionTask {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionTask {
    pub fn spawn(
        store: Arc<dyn TimeSeriesStore>,
        retention: RetentionDays,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                retention_days = %retention,
                interval_secs = interval.as_secs(),
                "{}",
                log_messages::store::RETENTION_TASK_STARTED
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                if let Err(e) = store.cleanup_old_data(retention).await {
                    error!("{}: {}", log_messages::store::CLEANUP_FAILED, e);
                }
            }

            info!("{}", log_messages::store::RETENTION_TASK_STOPPED);
        });

        Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Retention task ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for RetentionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionTask")
            .field("running", &self.handle.lock().is_some())
            .finish()
    }
}
