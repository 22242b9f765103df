// crates/policy-mirror-cli/src/logging.rs
// ============================================================================
// Module: CLI Logging
// Description: Tracing subscriber installation for the policy-mirror binary.
// Purpose: Route structured logs to stderr in text or JSON form.
// Dependencies: policy-mirror-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! Logs always go to stderr so command output on stdout stays machine
//! readable. `RUST_LOG` overrides the configured level.

use policy_mirror_config::LogFormat;
use policy_mirror_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr);
    let _ = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
