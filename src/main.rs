use dotenv::dotenv;
use tracing::{info, warn};

use admission::config::AdmissionConfig;
use admission::limiter::instance;
use admission::{init_logging, presets, RequestInfo};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let config = AdmissionConfig::from_env();
    info!(
        redis = config.redis.is_some(),
        key_prefix = config.key_prefix.as_str(),
        "admission controller starting"
    );

    let controller = instance::shared(&config).await;

    // Smoke run: a handful of checks against the read-heavy preset
    let policy = presets::read_heavy();
    let request = RequestInfo::new("GET", "/status").with_remote_addr("127.0.0.1");

    for _ in 0..3 {
        match controller.check(&request, &policy).await {
            Ok(decision) => info!(
                allowed = decision.allowed,
                remaining = decision.remaining,
                limit = decision.limit,
                "admission check"
            ),
            Err(e) => warn!(error = %e, "admission check failed"),
        }
    }

    match controller.stats().await {
        Ok(stats) => info!(
            tracked_identifiers = stats.tracked_identifiers,
            "controller stats"
        ),
        Err(e) => warn!(error = %e, "stats unavailable"),
    }

    instance::teardown().await;
}
