use crate::state::PublishedState;
use prometheus::core::Collector;
use prometheus::{
    opts, Counter, CounterVec, Encoder, Gauge, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

/// Prometheus view of the broadcaster: last published readings plus pipeline health.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub statusd_cpu_usage_percent: Gauge,
    pub statusd_memory_used_bytes: Gauge,
    pub statusd_memory_total_bytes: Gauge,
    pub statusd_memory_usage_percent: Gauge,
    pub statusd_swap_used_bytes: Gauge,
    pub statusd_disk_usage_percent: Gauge,
    pub statusd_process_memory_bytes: Gauge,
    pub statusd_process_cpu_percent: Gauge,
    pub statusd_app_connected: Gauge,
    pub statusd_app_guild_count: Gauge,
    pub statusd_app_user_count: Gauge,
    pub statusd_app_latency_ms: Gauge,
    pub statusd_history_points: Gauge,
    pub statusd_subscribers: IntGauge,
    pub statusd_ticks_total: Counter,
    pub statusd_collect_errors_total: CounterVec,
    pub statusd_subscribers_dropped_total: CounterVec,
    pub statusd_scrape_count_total: Counter,
    pub statusd_uptime_seconds: Gauge,
    pub statusd_last_collect_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let statusd_cpu_usage_percent = Gauge::with_opts(opts!(
            "statusd_cpu_usage_percent",
            "Host CPU usage in percent (0..100)"
        ))?;
        let statusd_memory_used_bytes =
            Gauge::with_opts(opts!("statusd_memory_used_bytes", "Used memory in bytes"))?;
        let statusd_memory_total_bytes =
            Gauge::with_opts(opts!("statusd_memory_total_bytes", "Total memory in bytes"))?;
        let statusd_memory_usage_percent = Gauge::with_opts(opts!(
            "statusd_memory_usage_percent",
            "Memory usage in percent"
        ))?;
        let statusd_swap_used_bytes =
            Gauge::with_opts(opts!("statusd_swap_used_bytes", "Used swap in bytes"))?;
        let statusd_disk_usage_percent = Gauge::with_opts(opts!(
            "statusd_disk_usage_percent",
            "Root filesystem usage in percent"
        ))?;
        let statusd_process_memory_bytes = Gauge::with_opts(opts!(
            "statusd_process_memory_bytes",
            "Resident memory of this process in bytes"
        ))?;
        let statusd_process_cpu_percent = Gauge::with_opts(opts!(
            "statusd_process_cpu_percent",
            "CPU usage of this process in percent of the whole host"
        ))?;
        let statusd_app_connected = Gauge::with_opts(opts!(
            "statusd_app_connected",
            "1 when the application reported itself connected on the last tick"
        ))?;
        let statusd_app_guild_count =
            Gauge::with_opts(opts!("statusd_app_guild_count", "Guilds served by the application"))?;
        let statusd_app_user_count =
            Gauge::with_opts(opts!("statusd_app_user_count", "Users visible to the application"))?;
        let statusd_app_latency_ms = Gauge::with_opts(opts!(
            "statusd_app_latency_ms",
            "Application API latency in milliseconds"
        ))?;
        let statusd_history_points = Gauge::with_opts(opts!(
            "statusd_history_points",
            "Points currently held in the rolling history"
        ))?;
        let statusd_subscribers = IntGauge::with_opts(opts!(
            "statusd_subscribers",
            "Live stream subscribers"
        ))?;
        let statusd_ticks_total =
            Counter::with_opts(opts!("statusd_ticks_total", "Collector ticks that published state"))?;
        let statusd_collect_errors_total = CounterVec::new(
            opts!(
                "statusd_collect_errors_total",
                "Collection errors by source"
            ),
            &["source"],
        )?;
        let statusd_subscribers_dropped_total = CounterVec::new(
            opts!(
                "statusd_subscribers_dropped_total",
                "Subscribers disconnected by the server, by reason"
            ),
            &["reason"],
        )?;
        let statusd_scrape_count_total =
            Counter::with_opts(opts!("statusd_scrape_count_total", "Number of /metrics scrapes"))?;
        let statusd_uptime_seconds =
            Gauge::with_opts(opts!("statusd_uptime_seconds", "Seconds since statusd started"))?;
        let statusd_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "statusd_last_collect_timestamp_seconds",
            "Unix time of the last published sample"
        ))?;

        register(&registry, &statusd_cpu_usage_percent)?;
        register(&registry, &statusd_memory_used_bytes)?;
        register(&registry, &statusd_memory_total_bytes)?;
        register(&registry, &statusd_memory_usage_percent)?;
        register(&registry, &statusd_swap_used_bytes)?;
        register(&registry, &statusd_disk_usage_percent)?;
        register(&registry, &statusd_process_memory_bytes)?;
        register(&registry, &statusd_process_cpu_percent)?;
        register(&registry, &statusd_app_connected)?;
        register(&registry, &statusd_app_guild_count)?;
        register(&registry, &statusd_app_user_count)?;
        register(&registry, &statusd_app_latency_ms)?;
        register(&registry, &statusd_history_points)?;
        register(&registry, &statusd_subscribers)?;
        register(&registry, &statusd_ticks_total)?;
        register(&registry, &statusd_collect_errors_total)?;
        register(&registry, &statusd_subscribers_dropped_total)?;
        register(&registry, &statusd_scrape_count_total)?;
        register(&registry, &statusd_uptime_seconds)?;
        register(&registry, &statusd_last_collect_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            statusd_cpu_usage_percent,
            statusd_memory_used_bytes,
            statusd_memory_total_bytes,
            statusd_memory_usage_percent,
            statusd_swap_used_bytes,
            statusd_disk_usage_percent,
            statusd_process_memory_bytes,
            statusd_process_cpu_percent,
            statusd_app_connected,
            statusd_app_guild_count,
            statusd_app_user_count,
            statusd_app_latency_ms,
            statusd_history_points,
            statusd_subscribers,
            statusd_ticks_total,
            statusd_collect_errors_total,
            statusd_subscribers_dropped_total,
            statusd_scrape_count_total,
            statusd_uptime_seconds,
            statusd_last_collect_timestamp_seconds,
        }))
    }

    pub fn update_from_state(&self, state: &PublishedState) {
        let system = &state.system;
        self.statusd_cpu_usage_percent.set(system.cpu_percent);
        self.statusd_memory_used_bytes
            .set(system.memory_used_bytes as f64);
        self.statusd_memory_total_bytes
            .set(system.memory_total_bytes as f64);
        self.statusd_memory_usage_percent
            .set(system.memory_percent());
        self.statusd_swap_used_bytes.set(system.swap_used_bytes as f64);
        self.statusd_disk_usage_percent.set(system.disk_percent());
        self.statusd_process_memory_bytes
            .set(system.process_memory_bytes as f64);
        self.statusd_process_cpu_percent
            .set(system.process_cpu_percent);

        let app = &state.application;
        self.statusd_app_connected
            .set(if app.connected { 1.0 } else { 0.0 });
        self.statusd_app_guild_count.set(app.guild_count as f64);
        self.statusd_app_user_count.set(app.user_count as f64);
        self.statusd_app_latency_ms.set(app.latency_ms);

        self.statusd_history_points.set(state.history.len() as f64);
        self.statusd_ticks_total.inc();
        self.statusd_last_collect_timestamp_seconds
            .set(system.captured_at.timestamp() as f64);
        self.statusd_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());
    }

    pub fn set_subscribers(&self, count: usize) {
        self.statusd_subscribers.set(count as i64);
    }

    pub fn inc_scrape_count(&self) {
        self.statusd_scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, source: &str) {
        self.statusd_collect_errors_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn inc_subscriber_dropped(&self, reason: &str) {
        self.statusd_subscribers_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.statusd_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
