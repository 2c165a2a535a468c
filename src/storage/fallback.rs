// src/storage/fallback.rs

//! Distributed-first counting with local degradation.
//!
//! Every operation is an explicit two-step attempt: try the primary store
//! if one is configured, healthy, and admitted by the circuit breaker; on
//! any failure log it and rerun the same operation on the in-process store.
//! Callers never see primary failures, and with no primary configured the
//! local store is the sole backend.
//!
//! Consistency tolerance: counts observed while flipping between backends
//! can diverge by the events recorded on the side that was unreachable,
//! and the distributed counter may overcount by a small bounded amount
//! under extreme concurrency. Admission accuracy degrades to
//! single-instance precision, never to fail-open or fail-closed.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{AdmissionConfig, InMemoryConfig};
use crate::error::Result;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, HealthCheckConfig, HealthChecker};
use crate::storage::{CountingStore, MemoryCounter, Probe, RedisCounter, WindowSample};

#[derive(Debug)]
pub struct FallbackCounter<P = RedisCounter> {
    primary: Option<Arc<P>>,
    local: MemoryCounter,
    breaker: CircuitBreaker,
    health: Option<HealthChecker>,
}

impl FallbackCounter<RedisCounter> {
    /// Builds the production store from deployment config. A missing or
    /// unreachable Redis endpoint leaves the local store as the sole
    /// backend rather than failing construction.
    pub async fn from_config(config: &AdmissionConfig) -> Self {
        let primary = match &config.redis {
            Some(redis_config) => match RedisCounter::connect(redis_config.clone()).await {
                Ok(counter) => Some(Arc::new(counter)),
                Err(e) => {
                    warn!(error = %e, "distributed store unavailable at startup, running single-instance");
                    None
                }
            },
            None => None,
        };

        Self::with_primary(primary, MemoryCounter::new(config.memory.clone()))
    }

    /// Local-only store, for single-instance deployments and tests.
    pub fn local_only(config: InMemoryConfig) -> Self {
        Self::with_primary(None, MemoryCounter::new(config))
    }
}

impl<P> FallbackCounter<P>
where
    P: CountingStore + Probe + 'static,
{
    /// Wires an explicit primary; tests inject failing stores here.
    pub fn with_primary(primary: Option<Arc<P>>, local: MemoryCounter) -> Self {
        let health = primary
            .as_ref()
            .map(|p| HealthChecker::start(Arc::clone(p), HealthCheckConfig::default()));

        Self {
            primary,
            local,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            health,
        }
    }

    fn primary_if_admitted(&self) -> Option<&Arc<P>> {
        let primary = self.primary.as_ref()?;
        let healthy = self.health.as_ref().map_or(true, |h| h.is_healthy());
        if healthy && self.breaker.allow_request() {
            Some(primary)
        } else {
            None
        }
    }
}

#[async_trait]
impl<P> CountingStore for FallbackCounter<P>
where
    P: CountingStore + Probe + 'static,
{
    async fn record(&self, key: &str, window: Duration) -> Result<WindowSample> {
        if let Some(primary) = self.primary_if_admitted() {
            match primary.record(key, window).await {
                Ok(sample) => {
                    self.breaker.record_success();
                    return Ok(sample);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(error = %e, key, "distributed record failed, using local store");
                }
            }
        }
        self.local.record(key, window).await
    }

    async fn peek(&self, key: &str, window: Duration) -> Result<WindowSample> {
        if let Some(primary) = self.primary_if_admitted() {
            match primary.peek(key, window).await {
                Ok(sample) => {
                    self.breaker.record_success();
                    return Ok(sample);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(error = %e, key, "distributed peek failed, using local store");
                }
            }
        }
        self.local.peek(key, window).await
    }

    async fn forget_latest(&self, key: &str) -> Result<()> {
        if let Some(primary) = self.primary_if_admitted() {
            match primary.forget_latest(key).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(());
                }
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(error = %e, key, "distributed forget failed, using local store");
                }
            }
        }
        self.local.forget_latest(key).await
    }

    async fn clear(&self, key: &str) -> Result<()> {
        if let Some(primary) = self.primary_if_admitted() {
            match primary.clear(key).await {
                Ok(()) => {
                    self.breaker.record_success();
                    // Clear the local side too so a later fallback does not
                    // resurrect stale counts.
                    return self.local.clear(key).await;
                }
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(error = %e, key, "distributed clear failed, using local store");
                }
            }
        }
        self.local.clear(key).await
    }

    /// The distributed side cannot report key counts cheaply; diagnostics
    /// cover the in-process map.
    async fn tracked_keys(&self) -> Result<usize> {
        self.local.tracked_keys().await
    }

    fn shutdown(&self) {
        if let Some(health) = &self.health {
            health.stop();
        }
        self.local.shutdown();
    }
}
