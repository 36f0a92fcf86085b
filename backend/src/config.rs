use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    // =========================
    // Feed configuration
    // =========================
    /// Ticker endpoint the feed poller hits for batch snapshots.
    pub feed_endpoint: String,

    /// Cadence of feed polls. Window horizons are expressed in sample
    /// counts against this cadence, so changing it rescales the nominal
    /// 5m/15m/1h baselines.
    pub feed_poll_interval: Duration,

    /// Ticks under this 24h quote volume are dropped at the boundary.
    /// Thin symbols produce baseline noise, not signals.
    pub min_quote_volume: f64,

    // =========================
    // Window / detection configuration
    // =========================
    /// Samples retained per symbol window.
    pub window_capacity: usize,

    /// Idle time after which a symbol's window expires wholesale and the
    /// symbol goes cold (no signals until it warms back up).
    pub window_ttl_ms: u64,

    /// Prior samples required before any detection rule evaluates.
    pub detector_min_samples: usize,

    /// Absolute funding rate that counts as extreme.
    pub funding_threshold: f64,

    /// Magnitude floors for the OI divergence rule.
    pub oi_min_price_delta: f64,
    pub oi_min_oi_delta: f64,

    /// Repeat signals of one (symbol, kind) inside this interval are
    /// suppressed; repeats slide the deadline forward.
    pub signal_cooldown_ms: u64,

    // =========================
    // Queue / worker configuration
    // =========================
    /// Per-queue channel capacity. Acts as backpressure: when workers
    /// fall behind, enqueueing blocks instead of growing memory.
    pub queue_capacity: usize,

    /// Concurrent jobs per worker pool.
    pub worker_concurrency: usize,

    /// How long in-flight jobs may run after shutdown begins.
    pub shutdown_grace: Duration,

    // =========================
    // Retention configuration
    // =========================
    /// Snapshots older than this are pruned by the retention sweep.
    pub snapshot_retention_ms: u64,

    /// Cadence of the retention sweep.
    pub retention_sweep_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://surge_dev.db?mode=rwc".to_string());

        let feed_endpoint = std::env::var("FEED_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:9000/ticker/24hr".to_string());

        Self {
            database_url,
            feed_endpoint,

            // Feed defaults: 3-minute cadence makes the 20-sample window
            // span one hour.
            feed_poll_interval: Duration::from_secs(180),
            min_quote_volume: 3_000_000.0,

            // Window & detection defaults:
            window_capacity: 20,
            window_ttl_ms: 3_600_000,
            detector_min_samples: 3,
            funding_threshold: 0.0003,
            oi_min_price_delta: 0.005,
            oi_min_oi_delta: 0.02,
            signal_cooldown_ms: 300_000,

            // Queue defaults:
            queue_capacity: 256,
            worker_concurrency: 3,
            shutdown_grace: Duration::from_secs(10),

            // Retention defaults: keep 90 days of snapshots, sweep daily.
            snapshot_retention_ms: 90 * 86_400_000,
            retention_sweep_interval: Duration::from_secs(86_400),
        }
    }
}
