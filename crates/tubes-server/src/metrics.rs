//! Metrics collection and export for tubes.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;
use tubes_core::{tracing_sink, Client, Error, ErrorKind, ErrorSink, Hooks, Router, RouterStats};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tubes_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tubes_connections_active";
    pub const MESSAGES_TOTAL: &str = "tubes_messages_total";
    pub const MESSAGES_BYTES: &str = "tubes_messages_bytes";
    pub const CHANNELS_ACTIVE: &str = "tubes_channels_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "tubes_subscriptions_active";
    pub const LATENCY_SECONDS: &str = "tubes_latency_seconds";
    pub const ERRORS_TOTAL: &str = "tubes_errors_total";
}

/// How often channel and subscription gauges are refreshed.
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of inbound messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of inbound messages");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of registered channels");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of live subscriptions"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound message dispatch latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of channel errors by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an inbound message.
pub fn record_message(bytes: usize) {
    counter!(names::MESSAGES_TOTAL).increment(1);
    counter!(names::MESSAGES_BYTES).increment(bytes as u64);
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update channel and subscription gauges.
pub fn set_router_stats(stats: RouterStats) {
    gauge!(names::CHANNELS_ACTIVE).set(stats.channel_count as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(stats.subscription_count as f64);
}

/// Refresh the channel and subscription gauges every `period`.
///
/// Counting subscriptions walks every channel, so it is kept off the
/// per-message path.
pub fn spawn_stats_reporter(router: Arc<Router>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(report_stats(router, period, set_router_stats))
}

async fn report_stats<F>(router: Arc<Router>, period: Duration, mut report: F)
where
    F: FnMut(RouterStats),
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        report(router.stats());
    }
}

/// Record an error.
pub fn record_error(kind: ErrorKind) {
    counter!(names::ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Error sink counting errors by kind before logging them.
#[must_use]
pub fn error_sink() -> ErrorSink {
    let log = tracing_sink();
    Arc::new(move |error: Error| {
        record_error(error.kind());
        log(error);
    })
}

/// Hooks recording connection and message metrics around the router.
pub struct MeteredHooks {
    router: Arc<Router>,
}

impl MeteredHooks {
    /// Wrap `router`.
    #[must_use]
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl Hooks for MeteredHooks {
    fn on_connect(&self, client: &Arc<Client>) {
        record_connection();
        self.router.on_connect(client);
    }

    fn on_disconnect(&self, client: &Arc<Client>) {
        self.router.on_disconnect(client);
        record_disconnection();
    }

    fn on_message(&self, client: &Arc<Client>, data: &[u8]) {
        let start = Instant::now();
        record_message(data.len());
        self.router.on_message(client, data);
        record_latency(start.elapsed().as_secs_f64());
    }
}
