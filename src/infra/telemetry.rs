use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and register metric descriptions.
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "newsdeck_cache_hit_total",
            Unit::Count,
            "Cache reads answered by a tier, labelled by tier."
        );
        describe_counter!(
            "newsdeck_cache_miss_total",
            Unit::Count,
            "Cache reads a tier could not answer, labelled by tier."
        );
        describe_counter!(
            "newsdeck_cache_error_total",
            Unit::Count,
            "Tier operations that failed or timed out, labelled by tier and operation."
        );
        describe_counter!(
            "newsdeck_cache_promotion_total",
            Unit::Count,
            "Values copied into a faster tier after a slower tier hit."
        );
        describe_histogram!(
            "newsdeck_cache_fetch_ms",
            Unit::Milliseconds,
            "Time spent computing a value after a full cache miss."
        );
        describe_counter!(
            "newsdeck_invalidation_evicted_total",
            Unit::Count,
            "Cache entries removed by invalidation, labelled by namespace."
        );
        describe_counter!(
            "newsdeck_invalidation_error_total",
            Unit::Count,
            "Invalidation targets that could not be evicted or broadcast."
        );
        describe_histogram!(
            "newsdeck_paginate_ms",
            Unit::Milliseconds,
            "Store time per resolved page, labelled by pagination mode."
        );
    });
}
