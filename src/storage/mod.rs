// src/storage/mod.rs

pub mod fallback;
pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use fallback::FallbackCounter;
pub use memory::MemoryCounter;
pub use self::redis::RedisCounter;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Point-in-time view of one identifier's trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSample {
    /// Events inside the window, including one just recorded by `record`
    pub count: u64,

    /// Unix-millisecond stamp of the oldest in-window event, if any
    pub oldest: Option<u64>,
}

impl WindowSample {
    pub const EMPTY: WindowSample = WindowSample {
        count: 0,
        oldest: None,
    };
}

/// Core trait that all counting stores must implement.
///
/// A store answers one question: how many events has this key produced in
/// the trailing window ending now. Events older than the window are
/// logically invisible and purged opportunistically.
#[async_trait]
pub trait CountingStore: Send + Sync + Debug {
    /// Records one event for `key` and returns the resulting window sample.
    async fn record(&self, key: &str, window: Duration) -> Result<WindowSample>;

    /// Returns the current window sample without recording anything.
    async fn peek(&self, key: &str, window: Duration) -> Result<WindowSample>;

    /// Drops the newest recorded event for `key`, if there is one.
    async fn forget_latest(&self, key: &str) -> Result<()>;

    /// Drops all recorded events for `key`.
    async fn clear(&self, key: &str) -> Result<()>;

    /// Number of identifiers currently tracked, for diagnostics.
    async fn tracked_keys(&self) -> Result<usize>;

    /// Stops background work owned by the store. Idempotent.
    fn shutdown(&self) {}
}

/// Liveness probe for primary stores, used by the health checker.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

// Both stores stamp events with wall-clock milliseconds so counts agree
// across processes sharing the distributed store.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

pub(crate) fn window_millis(window: Duration) -> u64 {
    (window.as_millis() as u64).max(1)
}
