// src/limiter/mod.rs

pub mod instance;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::info;

use crate::backoff::ViolationTracker;
use crate::config::AdmissionConfig;
use crate::error::{AdmissionError, Result};
use crate::identity::{resolve_identifier, RequestInfo};
use crate::policy::QuotaPolicy;
use crate::storage::{now_millis, window_millis, CountingStore, FallbackCounter, WindowSample};

/// Outcome of one admission check. Produced fresh on every call; a rejected
/// decision is structured data for the caller to render, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Admissions left in the current window
    pub remaining: u64,
    pub limit: u64,
    /// Time until the oldest in-window event ages out; zero when allowed
    pub retry_after: Duration,
    /// When the current window starts draining
    pub resets_at: DateTime<Utc>,
}

/// Read-only aggregate for dashboards and health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tracked_identifiers: usize,
    pub tracked_violators: usize,
}

/// Store shape used by the shared process-wide controller.
pub type SharedStore = FallbackCounter<crate::storage::RedisCounter>;

/// Sliding-window admission controller.
///
/// Evaluates the trailing window ending now, never fixed aligned buckets,
/// so a burst straddling a bucket boundary cannot double its quota. The
/// interval is closed-left-open: a request at `t` is admitted when fewer
/// than `max_requests` prior events fall in `(t - window, t]`.
#[derive(Debug)]
pub struct AdmissionController<S: CountingStore> {
    store: Arc<S>,
    violations: Arc<ViolationTracker>,
    key_prefix: String,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl AdmissionController<SharedStore> {
    /// Builds the production controller from deployment config.
    pub async fn from_config(config: &AdmissionConfig) -> Self {
        let store = SharedStore::from_config(config).await;
        Self::new(store, config.key_prefix.clone(), config.sweep_interval)
    }
}

impl<S: CountingStore + 'static> AdmissionController<S> {
    /// Wires a controller around an explicit store. A zero `sweep_interval`
    /// disables the periodic violation-ledger sweep.
    pub fn new(store: S, key_prefix: String, sweep_interval: Duration) -> Self {
        let store = Arc::new(store);
        let violations = Arc::new(ViolationTracker::new());

        let sweeper = if sweep_interval > Duration::ZERO {
            let violations = Arc::clone(&violations);
            Some(task::spawn(async move {
                let mut ticker = time::interval(sweep_interval);
                loop {
                    ticker.tick().await;
                    violations.sweep();
                }
            }))
        } else {
            None
        };

        Self {
            store,
            violations,
            key_prefix,
            sweeper: Mutex::new(sweeper),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Counts the request and decides admission. This call always consumes
    /// quota; invoke it at most once per logical request and use [`status`]
    /// for side-effect-free inspection.
    ///
    /// [`status`]: AdmissionController::status
    pub async fn check(&self, request: &RequestInfo, policy: &QuotaPolicy) -> Result<Decision> {
        self.ensure_live()?;
        policy.validate()?;

        let identifier = resolve_identifier(request, policy);
        let key = self.storage_key(&identifier, policy);
        let sample = self.store.record(&key, policy.window).await?;
        let decision = decision_after_record(policy, sample);

        crate::admission_event!(
            identifier.as_str(),
            decision.allowed,
            decision.limit,
            decision.remaining
        );

        Ok(decision)
    }

    /// Reports the identifier's current standing without consuming quota.
    /// Any number of status reads leaves later [`check`] outcomes unchanged.
    ///
    /// [`check`]: AdmissionController::check
    pub async fn status(&self, request: &RequestInfo, policy: &QuotaPolicy) -> Result<Decision> {
        self.ensure_live()?;
        policy.validate()?;

        let identifier = resolve_identifier(request, policy);
        let key = self.storage_key(&identifier, policy);
        let sample = self.store.peek(&key, policy.window).await?;
        Ok(decision_from_peek(policy, sample))
    }

    /// Clears the identifier's window entirely, restoring full quota.
    pub async fn reset(&self, request: &RequestInfo, policy: &QuotaPolicy) -> Result<()> {
        self.ensure_live()?;
        policy.validate()?;

        let identifier = resolve_identifier(request, policy);
        let key = self.storage_key(&identifier, policy);
        self.store.clear(&key).await
    }

    /// Applies the policy's outcome opt-outs after the request finished:
    /// when the policy skips this outcome, the event recorded by [`check`]
    /// is forgotten and the quota slot returns.
    ///
    /// [`check`]: AdmissionController::check
    pub async fn report_outcome(
        &self,
        request: &RequestInfo,
        policy: &QuotaPolicy,
        success: bool,
    ) -> Result<()> {
        self.ensure_live()?;

        let skip = (success && policy.skip_on_success) || (!success && policy.skip_on_failure);
        if !skip {
            return Ok(());
        }

        let identifier = resolve_identifier(request, policy);
        let key = self.storage_key(&identifier, policy);
        self.store.forget_latest(&key).await
    }

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        Ok(StatsSnapshot {
            tracked_identifiers: self.store.tracked_keys().await?,
            tracked_violators: self.violations.tracked(),
        })
    }

    /// The violation ledger for escalating repeat offenders. Not consulted
    /// by [`check`]; calling code records violations when it observes a
    /// rejected decision.
    ///
    /// [`check`]: AdmissionController::check
    pub fn violations(&self) -> &ViolationTracker {
        &self.violations
    }

    /// Stops the sweep task and the store's background work. Idempotent and
    /// safe to call from tests that build many controllers.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        self.store.shutdown();
        info!("admission controller destroyed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(AdmissionError::Internal(
                "admission controller has been destroyed".to_string(),
            ));
        }
        Ok(())
    }

    /// Windows of different lengths must not share a log, so the storage
    /// key carries the window alongside the identifier.
    fn storage_key(&self, identifier: &str, policy: &QuotaPolicy) -> String {
        format!(
            "{}:{}:{}ms",
            self.key_prefix,
            identifier,
            policy.window.as_millis()
        )
    }
}

fn decision_after_record(policy: &QuotaPolicy, sample: WindowSample) -> Decision {
    let now = now_millis();
    let window_ms = window_millis(policy.window);

    // The sample already includes this request: the Nth in-window request
    // is admitted, the N+1th is not.
    let allowed = sample.count <= policy.max_requests;
    let remaining = policy.max_requests.saturating_sub(sample.count);
    let window_resets = sample.oldest.unwrap_or(now).saturating_add(window_ms);

    let retry_after = if allowed {
        Duration::ZERO
    } else {
        Duration::from_millis(window_resets.saturating_sub(now).max(1))
    };

    Decision {
        allowed,
        remaining,
        limit: policy.max_requests,
        retry_after,
        resets_at: millis_to_datetime(window_resets),
    }
}

fn decision_from_peek(policy: &QuotaPolicy, sample: WindowSample) -> Decision {
    let now = now_millis();
    let window_ms = window_millis(policy.window);

    // Same computation from the other side of the increment: would one
    // more request be admitted, and how many slots are left right now.
    let allowed = sample.count < policy.max_requests;
    let remaining = policy.max_requests.saturating_sub(sample.count);
    let window_resets = sample.oldest.unwrap_or(now).saturating_add(window_ms);

    let retry_after = if allowed {
        Duration::ZERO
    } else {
        Duration::from_millis(window_resets.saturating_sub(now).max(1))
    };

    Decision {
        allowed,
        remaining,
        limit: policy.max_requests,
        retry_after,
        resets_at: millis_to_datetime(window_resets),
    }
}

fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_else(Utc::now)
}
