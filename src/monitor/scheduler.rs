//! Fixed-interval background task with explicit start/stop

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Runs a job every `interval` until stopped.
///
/// The first run happens immediately. A tick that would overlap a still
/// running job is skipped. `stop` abandons an in-flight job at its next
/// suspension point and waits for the task to exit.
pub struct ScheduledTask {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<u64>>>,
}

impl ScheduledTask {
    pub fn start<F, Fut>(name: impl Into<String>, interval: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                tokio::select! {
                    _ = job() => {
                        runs += 1;
                        debug!(task = %task_name, runs, "Scheduled run finished");
                    }
                    _ = shutdown_rx.changed() => {
                        warn!(task = %task_name, "Abandoning in-flight run on shutdown");
                        break;
                    }
                }
            }
            runs
        });

        info!(task = %name, interval_ms = interval.as_millis() as u64, "▶️ Scheduled task started");
        Self {
            name,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal shutdown and wait for the task. Returns completed run count.
    pub async fn stop(&self) -> u64 {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        let runs = match handle {
            Some(handle) => match handle.await {
                Ok(runs) => runs,
                Err(e) => {
                    warn!(task = %self.name, error = %e, "Scheduled task ended abnormally");
                    0
                }
            },
            None => 0,
        };
        info!(task = %self.name, runs, "⏹️ Scheduled task stopped");
        runs
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
