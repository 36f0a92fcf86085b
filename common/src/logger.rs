use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::Span;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Correlation ID that follows a feed batch / signal / delivery through the
/// pipeline.
#[derive(Clone, Debug)]
pub struct TraceId(String);

impl TraceId {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Install the global subscriber. Safe to call more than once (tests).
pub fn init_tracing(json: bool) {
    LOGGER_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let base = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            // Includes timing when the span closes
            .with_span_events(fmt::format::FmtSpan::CLOSE);

        if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.pretty())
                .init();
        }
    });
}

/// Root span for one unit of pipeline work (a feed batch, a job). The
/// trace id ties every log line under it back to that unit.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str()
    )
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
