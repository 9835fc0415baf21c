use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "FOG_LOG";

/// Installs the global stderr subscriber. `FOG_LOG` takes precedence over the
/// binary's default directive; a second call is a no-op.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
