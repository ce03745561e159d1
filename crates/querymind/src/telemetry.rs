// querymind/crates/querymind/src/telemetry.rs

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Install the global subscriber. Returns false if one was already set.
pub fn init_tracing() -> bool {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
