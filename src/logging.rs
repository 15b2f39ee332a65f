//! # Structured Logging Module
//!
//! Environment-aware structured logging for the conductor. Console output by
//! default; set `CONDUCTOR_LOG_FORMAT=json` for one JSON object per line.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber,
/// and an already-installed global subscriber is left alone.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| get_log_level(&environment));
        let json = std::env::var("CONDUCTOR_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(filter))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(filter))
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("CONDUCTOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for pipeline lifecycle operations
pub fn log_pipeline_operation(
    operation: &str,
    request_id: &str,
    pipeline: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        request_id = %request_id,
        pipeline = %pipeline,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🎼 PIPELINE_OPERATION"
    );
}

/// Log structured data for resource arbitration
pub fn log_resource_operation(operation: &str, resource_id: &str, instance_id: &str, resolution: &str) {
    tracing::info!(
        operation = %operation,
        resource_id = %resource_id,
        instance_id = %instance_id,
        resolution = %resolution,
        timestamp = %Utc::now().to_rfc3339(),
        "🔒 RESOURCE_OPERATION"
    );
}

/// Log a subscription policy violation; strict-mode violations log at error level
pub fn log_policy_violation(kind: &str, actor_id: &str, stack: &str, message: &str, is_error: bool) {
    if is_error {
        tracing::error!(
            kind = %kind,
            actor_id = %actor_id,
            stack = %stack,
            timestamp = %Utc::now().to_rfc3339(),
            "🚫 POLICY_VIOLATION: {message}"
        );
    } else {
        tracing::warn!(
            kind = %kind,
            actor_id = %actor_id,
            stack = %stack,
            timestamp = %Utc::now().to_rfc3339(),
            "⚠️ POLICY_VIOLATION: {message}"
        );
    }
}
