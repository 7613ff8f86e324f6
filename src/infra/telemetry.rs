use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
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
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pooldash_page_rebuild_total",
            Unit::Count,
            "Total number of published page rebuilds, labelled full or single."
        );
        describe_counter!(
            "pooldash_stats_fetch_failure_total",
            Unit::Count,
            "Total number of skipped periodic ticks due to a failed statistics fetch."
        );
        describe_counter!(
            "pooldash_broadcast_delivered_total",
            Unit::Count,
            "Total number of live-update payloads delivered to subscribers."
        );
        describe_counter!(
            "pooldash_broadcast_dropped_total",
            Unit::Count,
            "Total number of live connections dropped on write failure."
        );
        describe_counter!(
            "pooldash_resolver_rpc_failure_total",
            Unit::Count,
            "Total number of coins skipped during version byte resolution."
        );
        describe_counter!(
            "pooldash_template_reload_total",
            Unit::Count,
            "Total number of template sources reloaded from disk."
        );
        describe_gauge!(
            "pooldash_live_connections",
            Unit::Count,
            "Currently registered live statistics connections."
        );
    });
}
