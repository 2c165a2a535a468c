// src/limiter/instance.rs

//! Process-wide controller instance.
//!
//! An explicit, lazily-initialized holder rather than implicit global
//! state: `shared` builds the controller once and hands out clones of the
//! same `Arc`, `install` injects a pre-built instance, and `teardown`
//! destroys it so tests get deterministic isolation.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::AdmissionConfig;
use crate::limiter::{AdmissionController, SharedStore};

static INSTANCE: Mutex<Option<Arc<AdmissionController<SharedStore>>>> = Mutex::const_new(None);

/// Returns the process-wide controller, building it on first use.
pub async fn shared(config: &AdmissionConfig) -> Arc<AdmissionController<SharedStore>> {
    let mut slot = INSTANCE.lock().await;
    if let Some(controller) = slot.as_ref() {
        return Arc::clone(controller);
    }

    let controller = Arc::new(AdmissionController::from_config(config).await);
    *slot = Some(Arc::clone(&controller));
    controller
}

/// Replaces the process-wide controller with a pre-built one.
pub async fn install(controller: Arc<AdmissionController<SharedStore>>) {
    *INSTANCE.lock().await = Some(controller);
}

/// Destroys and forgets the shared controller. Safe when none was built.
pub async fn teardown() {
    if let Some(controller) = INSTANCE.lock().await.take() {
        controller.destroy();
    }
}
