// src/storage/memory.rs

// In-process counting store. Serves as the automatic fallback when the
// distributed store is unreachable and as the sole backend in
// single-instance deployments.
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::{debug, warn};

use crate::config::InMemoryConfig;
use crate::error::Result;
use crate::storage::{now_millis, window_millis, CountingStore, WindowSample};

/// Sliding log for a single identifier: ordered event stamps plus the
/// window length last used for the key, which drives sweeping.
#[derive(Debug)]
struct WindowLog {
    stamps: VecDeque<u64>,
    window_ms: u64,
}

impl WindowLog {
    fn new(window_ms: u64) -> Self {
        Self {
            stamps: VecDeque::new(),
            window_ms,
        }
    }

    /// Drops stamps that have aged strictly past the window. A stamp at the
    /// exact boundary stays in-window until it is older than the window.
    fn evict(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window_ms);
        while let Some(&oldest) = self.stamps.front() {
            if oldest <= cutoff {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn sample(&self) -> WindowSample {
        WindowSample {
            count: self.stamps.len() as u64,
            oldest: self.stamps.front().copied(),
        }
    }

    /// True once the newest stamp has aged out of the window.
    fn expired(&self, now: u64) -> bool {
        match self.stamps.back() {
            Some(&newest) => newest.saturating_add(self.window_ms) <= now,
            None => true,
        }
    }
}

/// In-process counting store backed by a mutex-guarded identifier map.
#[derive(Debug)]
pub struct MemoryCounter {
    logs: Arc<RwLock<HashMap<String, WindowLog>>>,
    config: InMemoryConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
}

impl MemoryCounter {
    /// Creates a new in-process store. When the config enables it, a
    /// background task periodically drops identifiers whose whole log has
    /// aged out; the task is owned by this store and stopped by `shutdown`.
    pub fn new(config: InMemoryConfig) -> Self {
        let logs = Arc::new(RwLock::new(HashMap::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let sweeper = if config.background_sweep {
            let logs = Arc::clone(&logs);
            let stopped = Arc::clone(&stopped);
            let interval = config.sweep_interval;

            Some(task::spawn(async move {
                let mut ticker = time::interval(interval);
                loop {
                    ticker.tick().await;
                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    Self::drop_expired(&logs);
                }
                debug!("memory counter sweep task stopped");
            }))
        } else {
            None
        };

        Self {
            logs,
            config,
            sweeper: Mutex::new(sweeper),
            stopped,
        }
    }

    fn drop_expired(logs: &Arc<RwLock<HashMap<String, WindowLog>>>) {
        let now = now_millis();
        let mut logs = logs.write().unwrap();
        logs.retain(|_, log| !log.expired(now));
    }
}

#[async_trait]
impl CountingStore for MemoryCounter {
    async fn record(&self, key: &str, window: Duration) -> Result<WindowSample> {
        let now = now_millis();
        let window_ms = window_millis(window);
        let mut logs = self.logs.write().unwrap();

        if logs.len() >= self.config.max_entries && !logs.contains_key(key) {
            // Capacity pressure is a planning concern, not a failure: purge
            // in place and keep counting.
            logs.retain(|_, log| !log.expired(now));
            if logs.len() >= self.config.max_entries {
                warn!(tracked = logs.len(), "memory counter over capacity");
            }
        }

        let log = logs
            .entry(key.to_string())
            .or_insert_with(|| WindowLog::new(window_ms));
        log.window_ms = window_ms;
        log.evict(now);
        log.stamps.push_back(now);
        Ok(log.sample())
    }

    async fn peek(&self, key: &str, window: Duration) -> Result<WindowSample> {
        let now = now_millis();
        let window_ms = window_millis(window);
        let logs = self.logs.read().unwrap();

        match logs.get(key) {
            Some(log) => {
                // Count under a read lock without mutating; eviction happens
                // on the next write for this key.
                let cutoff = now.saturating_sub(window_ms);
                let count = log.stamps.iter().filter(|&&ts| ts > cutoff).count() as u64;
                let oldest = log.stamps.iter().find(|&&ts| ts > cutoff).copied();
                Ok(WindowSample { count, oldest })
            }
            None => Ok(WindowSample::EMPTY),
        }
    }

    async fn forget_latest(&self, key: &str) -> Result<()> {
        let mut logs = self.logs.write().unwrap();
        if let Some(log) = logs.get_mut(key) {
            log.stamps.pop_back();
        }
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.logs.write().unwrap().remove(key);
        Ok(())
    }

    async fn tracked_keys(&self) -> Result<usize> {
        Ok(self.logs.read().unwrap().len())
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }
}
