// src/test_utils.rs

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::InMemoryConfig;
use crate::error::{AdmissionError, Result, StorageError};
use crate::identity::RequestInfo;
use crate::limiter::AdmissionController;
use crate::policy::QuotaPolicy;
use crate::storage::{CountingStore, MemoryCounter, Probe, WindowSample};

/// Counting store that can be switched into a failing state, for testing
/// the fallback path without a real network outage.
#[derive(Debug)]
pub struct FlakyCounter {
    inner: MemoryCounter,
    failing: AtomicBool,
    failures_seen: AtomicUsize,
}

impl FlakyCounter {
    pub fn new() -> Self {
        Self {
            inner: MemoryCounter::new(test_memory_config()),
            failing: AtomicBool::new(false),
            failures_seen: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of store operations refused while failing. Probes are not
    /// counted so assertions stay deterministic.
    pub fn failures_seen(&self) -> usize {
        self.failures_seen.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures_seen.fetch_add(1, Ordering::SeqCst);
            return Err(AdmissionError::Storage(StorageError::Connection(
                "simulated outage".to_string(),
            )));
        }
        Ok(())
    }
}

impl Default for FlakyCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CountingStore for FlakyCounter {
    async fn record(&self, key: &str, window: Duration) -> Result<WindowSample> {
        self.gate()?;
        self.inner.record(key, window).await
    }

    async fn peek(&self, key: &str, window: Duration) -> Result<WindowSample> {
        self.gate()?;
        self.inner.peek(key, window).await
    }

    async fn forget_latest(&self, key: &str) -> Result<()> {
        self.gate()?;
        self.inner.forget_latest(key).await
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.gate()?;
        self.inner.clear(key).await
    }

    async fn tracked_keys(&self) -> Result<usize> {
        self.inner.tracked_keys().await
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}

#[async_trait]
impl Probe for FlakyCounter {
    async fn ping(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdmissionError::Storage(StorageError::Connection(
                "simulated outage".to_string(),
            )));
        }
        Ok(())
    }
}

/// In-memory config with background work disabled, so tests tear down
/// without stray tasks.
pub fn test_memory_config() -> InMemoryConfig {
    InMemoryConfig {
        max_entries: 10_000,
        background_sweep: false,
        sweep_interval: Duration::from_secs(60),
    }
}

/// Local-only controller for tests; no redis, no background sweeps.
pub fn local_controller() -> AdmissionController<MemoryCounter> {
    AdmissionController::new(
        MemoryCounter::new(test_memory_config()),
        "test".to_string(),
        Duration::ZERO,
    )
}

/// Request carrying only a transport address.
pub fn request_from(addr: &str) -> RequestInfo {
    RequestInfo::new("GET", "/resource").with_remote_addr(addr)
}

pub fn policy_of(window_ms: u64, max_requests: u64) -> QuotaPolicy {
    QuotaPolicy::new(Duration::from_millis(window_ms), max_requests)
}

/// Fires `count` simultaneous checks for the same request and returns how
/// many were admitted. A barrier lines the tasks up so they genuinely race.
pub async fn admitted_of_burst<S>(
    controller: &Arc<AdmissionController<S>>,
    request: &RequestInfo,
    policy: &QuotaPolicy,
    count: usize,
) -> usize
where
    S: CountingStore + 'static,
{
    let barrier = Arc::new(tokio::sync::Barrier::new(count));
    let mut handles = Vec::with_capacity(count);

    for _ in 0..count {
        let controller = Arc::clone(controller);
        let barrier = Arc::clone(&barrier);
        let request = request.clone();
        let policy = policy.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            controller
                .check(&request, &policy)
                .await
                .map(|decision| decision.allowed)
                .unwrap_or(false)
        }));
    }

    join_all(handles)
        .await
        .into_iter()
        .filter(|outcome| matches!(outcome, Ok(true)))
        .count()
}
