use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber. Safe to call more than once;
/// only the first call wins (later test binaries share one subscriber).
pub fn init(service_name: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    });

    info!(service = service_name, "telemetry initialized");
}
