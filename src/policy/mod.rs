// src/policy/mod.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AdmissionError, Result};
use crate::identity::RequestInfo;

/// Custom identifier derivation stored on a policy.
pub type KeyFn = dyn Fn(&RequestInfo) -> String + Send + Sync;

/// Immutable description of one quota: how many requests an identifier may
/// make inside a trailing window, plus opt-outs applied when the caller
/// reports the request outcome.
///
/// A policy never mutates after creation and may be shared freely across
/// calls and tasks.
#[derive(Clone)]
pub struct QuotaPolicy {
    /// Trailing window length
    pub window: Duration,

    /// Maximum admitted requests per identifier per window (inclusive)
    pub max_requests: u64,

    /// Do not count requests whose outcome was reported successful
    pub skip_on_success: bool,

    /// Do not count requests whose outcome was reported failed
    pub skip_on_failure: bool,

    /// Overrides default network-address resolution when set
    pub key_fn: Option<Arc<KeyFn>>,
}

impl QuotaPolicy {
    pub fn new(window: Duration, max_requests: u64) -> Self {
        Self {
            window,
            max_requests,
            skip_on_success: false,
            skip_on_failure: false,
            key_fn: None,
        }
    }

    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    pub fn skip_successful(mut self) -> Self {
        self.skip_on_success = true;
        self
    }

    pub fn skip_failed(mut self) -> Self {
        self.skip_on_failure = true;
        self
    }

    /// Policies are deployment configuration; a bad one is refused at first
    /// use rather than silently misbehaving.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests < 1 {
            return Err(AdmissionError::Config(
                "policy max_requests must be at least 1".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(AdmissionError::Config(
                "policy window must be longer than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for QuotaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaPolicy")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("skip_on_success", &self.skip_on_success)
            .field("skip_on_failure", &self.skip_on_failure)
            .field(
                "key_fn",
                &self.key_fn.as_ref().map(|_| "<custom>").unwrap_or("<default>"),
            )
            .finish()
    }
}

/// Named policies selected by intent rather than hand-tuned numbers.
pub mod presets {
    use super::QuotaPolicy;
    use std::time::Duration;

    /// Caller entitlement tier for [`tiered`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Entitlement {
        Free,
        Paid,
    }

    /// Strict throttling of authentication attempts: long window, very low
    /// quota, counts successes and failures alike.
    pub fn authentication() -> QuotaPolicy {
        QuotaPolicy::new(Duration::from_secs(15 * 60), 5)
    }

    /// Generous quota for read-heavy traffic.
    pub fn read_heavy() -> QuotaPolicy {
        QuotaPolicy::new(Duration::from_secs(60), 300)
    }

    /// Per-minute quota that differs by caller entitlement.
    pub fn tiered(entitlement: Entitlement) -> QuotaPolicy {
        match entitlement {
            Entitlement::Free => QuotaPolicy::new(Duration::from_secs(60), 60),
            Entitlement::Paid => QuotaPolicy::new(Duration::from_secs(60), 600),
        }
    }

    /// Short-window burst protection that only counts requests reported as
    /// failed or retried; successful ones are forgotten.
    pub fn burst_shield() -> QuotaPolicy {
        QuotaPolicy::new(Duration::from_secs(1), 10).skip_successful()
    }
}
