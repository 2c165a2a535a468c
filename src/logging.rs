use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,admission=trace
pub fn init() {
    INIT.call_once(|| {
        // Default to 'info' level if RUST_LOG is not specified
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true) // Include module path in logs
                    .with_line_number(true),
            )
            .init();

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging admission decisions with consistent fields
#[macro_export]
macro_rules! admission_event {
    ($identifier:expr, $allowed:expr, $limit:expr, $remaining:expr) => {
        tracing::debug!(
            identifier = $identifier,
            allowed = $allowed,
            limit = $limit,
            remaining = $remaining,
            "Admission decision"
        )
    };
}
