//! Process-wide tracing subscriber setup. Call [`init_tracing`] once at
//! process startup, before constructing a [`crate::Kernel`]; every
//! `tracing::info!`/`warn!`/`debug!` call across the workspace then reaches
//! one configured sink.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration, sourced from the environment the way the
/// teacher's API crate reads its `CALIBER_*` variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Name stamped into every log line's `service` field.
    pub service_name: String,
    /// `AETHER_LOG`, falling back to `info` for this crate and `warn`
    /// elsewhere when unset or unparseable.
    pub filter: String,
    /// Structured JSON lines instead of the human-readable default.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("AETHER_SERVICE_NAME").unwrap_or_else(|_| "aether-kernel".to_string()),
            filter: std::env::var("AETHER_LOG").unwrap_or_else(|_| "aether=info,warn".to_string()),
            json: std::env::var("AETHER_LOG_JSON")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
        }
    }
}

/// Installs a process-wide [`tracing_subscriber`] registry built from
/// `config`. Idempotent: a second call is a no-op rather than a panic, since
/// host processes that embed a [`crate::Kernel`] inside an existing
/// subscriber (tests, multi-kernel hosts) must not be torn down by it.
pub fn init_tracing(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized, skipping");
    } else {
        tracing::info!(service = %config.service_name, "telemetry initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_falls_back_when_env_unset() {
        std::env::remove_var("AETHER_SERVICE_NAME");
        std::env::remove_var("AETHER_LOG");
        std::env::remove_var("AETHER_LOG_JSON");
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "aether-kernel");
        assert_eq!(config.filter, "aether=info,warn");
        assert!(!config.json);
    }

    #[test]
    fn second_init_does_not_panic() {
        let config = TelemetryConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
