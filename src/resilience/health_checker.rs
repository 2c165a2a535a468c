use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::{debug, info, warn};

use crate::storage::Probe;

/// Configuration for health checks
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// How often to probe the primary store
    pub check_interval: Duration,
    /// Deadline for a single probe
    pub check_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            check_timeout: Duration::from_secs(1),
        }
    }
}

/// Background prober for a primary store. Owns its task; `stop` cancels it
/// deterministically so teardown never leaves a timer running.
#[derive(Debug)]
pub struct HealthChecker {
    healthy: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
}

impl HealthChecker {
    /// Starts probing `target` on the configured interval. The store is
    /// assumed healthy until a probe says otherwise.
    pub fn start<P>(target: Arc<P>, config: HealthCheckConfig) -> Self
    where
        P: Probe + 'static,
    {
        let healthy = Arc::new(AtomicBool::new(true));
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&healthy);
        let stop = Arc::clone(&stopped);
        let task = task::spawn(async move {
            let mut ticker = time::interval(config.check_interval);
            loop {
                ticker.tick().await;
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                let reachable = match time::timeout(config.check_timeout, target.ping()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!(error = %e, "primary store probe failed");
                        false
                    }
                    Err(_) => {
                        debug!("primary store probe timed out");
                        false
                    }
                };

                let previous = flag.swap(reachable, Ordering::SeqCst);
                if previous != reachable {
                    if reachable {
                        info!("primary store is reachable again");
                    } else {
                        warn!("primary store unreachable, degrading to local counting");
                    }
                }
            }
            debug!("health checker task stopped");
        });

        Self {
            healthy,
            task: Mutex::new(Some(task)),
            stopped,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Stops the probe task. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
