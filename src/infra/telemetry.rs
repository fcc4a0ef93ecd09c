use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry initialization failed: {0}")]
    Init(String),
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            TelemetryError::Init(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "foglio_cycles_total",
            Unit::Count,
            "Render cycles by outcome (rendered, unchanged, no_text, failed)."
        );
        describe_counter!(
            "foglio_fetch_total",
            Unit::Count,
            "Document fetch attempts by result (proxy, fallback, failed)."
        );
        describe_counter!(
            "foglio_theme_apply_total",
            Unit::Count,
            "Theme artifacts applied to the page."
        );
        describe_histogram!(
            "foglio_cycle_ms",
            Unit::Milliseconds,
            "Full render cycle latency in milliseconds."
        );
        describe_histogram!(
            "foglio_render_ms",
            Unit::Milliseconds,
            "Pipeline render latency in milliseconds."
        );
    });
}
