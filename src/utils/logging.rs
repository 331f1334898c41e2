//! Logging initialization.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the
//! `LOG_LEVEL` environment variable (`debug`, `info`, `warn`, `error`,
//! `fatal`, `silent`).

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let level = log_level_filter(
        std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .as_str(),
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Map a LOG_LEVEL value onto a tracing filter directive.
fn log_level_filter(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        // tracing has no `fatal`; error is the closest level.
        "fatal" => "error",
        "silent" => "off",
        _ => "info",
    }
}
