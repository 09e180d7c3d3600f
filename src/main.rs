//! CLI thin wrapper (spec.md §6): loads configuration, builds the
//! Gateway against real collaborators, and serves until a shutdown
//! signal. Deliberately thin — every behavior lives in the library
//! crate; this binary only owns process-level concerns (argv, env,
//! logging init, exit codes).

use api_gateway::config::GatewayConfig;
use api_gateway::{Gateway, GatewayInitError};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EXIT_CLEAN: u8 = 0;
const EXIT_STARTUP_FAILURE: u8 = 1;
const EXIT_CONFIG_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config_path = std::env::var("API_GATEWAY_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(message) => {
            tracing::error!(path = %config_path, error = %message, "configuration load failed");
            return ExitCode::from(EXIT_CONFIG_FAILURE);
        }
    };

    let gateway = match Gateway::build(config).await {
        Ok(gateway) => gateway,
        Err(GatewayInitError::Config(e)) => {
            tracing::error!(error = %e, "configuration validation failed");
            return ExitCode::from(EXIT_CONFIG_FAILURE);
        }
        Err(e) => {
            tracing::error!(error = %e, "gateway startup failed");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    match gateway.start().await {
        Ok(()) => ExitCode::from(EXIT_CLEAN),
        Err(e) => {
            tracing::error!(error = %e, "gateway exited with an error");
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

/// Reads and parses the config file named by `API_GATEWAY_CONFIG`
/// (default `config.json`). A missing or unparsable file is a config
/// failure (exit 2), same as a config that fails `GatewayConfig::validate`
/// once [`Gateway::build`] runs it.
fn load_config(path: &str) -> Result<GatewayConfig, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    GatewayConfig::from_json(&raw).map_err(|e| e.to_string())
}

/// `RUST_LOG`-driven filter, JSON formatting when `API_GATEWAY_LOG_JSON`
/// is set — matches the teacher's `tracing_subscriber::registry()` layering
/// rather than the simpler `tracing_subscriber::fmt()` builder, since this
/// binary (unlike a one-shot CLI command) runs as a long-lived service.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if std::env::var("API_GATEWAY_LOG_JSON").is_ok() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
