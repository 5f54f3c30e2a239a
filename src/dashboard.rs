//! Wiring: one collector, one hub, one HTTP server, stopped in that order.

use crate::collector::{Collector, CollectorSettings};
use crate::collectors::{ApplicationStatusProvider, SysinfoSampler, SystemSampler};
use crate::config::{Config, ConfigError};
use crate::http;
use crate::hub::BroadcastHub;
use crate::metrics::Metrics;
use crate::snapshot::SnapshotService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("не удалось инициализировать метрики: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("не удалось инициализировать сборщик системных метрик: {0}")]
    Sampler(String),
    #[error("не удалось открыть {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A running dashboard. Dropping it without [`DashboardHandle::shutdown`] leaves the
/// tasks running until the runtime stops.
pub struct DashboardHandle {
    local_addr: SocketAddr,
    snapshots: SnapshotService,
    hub: Arc<BroadcastHub>,
    collector_stop: watch::Sender<bool>,
    http_stop: watch::Sender<bool>,
    collector_task: JoinHandle<()>,
    http_task: JoinHandle<()>,
    grace: Duration,
}

impl DashboardHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn snapshots(&self) -> SnapshotService {
        self.snapshots.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.len()
    }

    /// Stops sampling, closes every stream, then drains the HTTP server. Anything still
    /// running after the grace period is aborted.
    pub async fn shutdown(self) {
        let Self {
            hub,
            collector_stop,
            http_stop,
            mut collector_task,
            mut http_task,
            grace,
            ..
        } = self;

        let stop = async {
            let _ = collector_stop.send(true);
            if let Err(err) = (&mut collector_task).await {
                warn!(error = %err, "задача сборщика завершилась с ошибкой");
            }
            let closed = hub.close_all();
            info!(subscribers = closed, "потоки подписчиков закрыты");
            let _ = http_stop.send(true);
            if let Err(err) = (&mut http_task).await {
                warn!(error = %err, "задача HTTP-сервера завершилась с ошибкой");
            }
        };

        let finished = time::timeout(grace, stop).await.is_ok();
        if !finished {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "остановка не уложилась в отведённое время, соединения закрыты принудительно"
            );
            collector_task.abort();
            hub.close_all();
            http_task.abort();
        }
        info!("панель статуса остановлена");
    }
}

/// Starts the dashboard with the host sampler.
pub async fn start(
    cfg: Config,
    provider: Arc<dyn ApplicationStatusProvider>,
) -> Result<DashboardHandle, StartError> {
    let sampler = task::spawn_blocking(SysinfoSampler::new)
        .await
        .map_err(|err| StartError::Sampler(err.to_string()))?;
    start_with_sampler(cfg, Box::new(sampler), provider).await
}

pub async fn start_with_sampler(
    cfg: Config,
    sampler: Box<dyn SystemSampler>,
    provider: Arc<dyn ApplicationStatusProvider>,
) -> Result<DashboardHandle, StartError> {
    cfg.validate()?;
    let metrics = Metrics::new()?;

    let (sampler, host) = task::spawn_blocking(move || {
        let mut sampler = sampler;
        let host = sampler.host_info();
        (sampler, host)
    })
    .await
    .map_err(|err| StartError::Sampler(err.to_string()))?;

    let listener = TcpListener::bind(cfg.listen.as_str())
        .await
        .map_err(|source| StartError::Bind {
            addr: cfg.listen.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| StartError::Bind {
        addr: cfg.listen.clone(),
        source,
    })?;

    let hub = Arc::new(BroadcastHub::new(
        cfg.subscriber_queue_capacity,
        cfg.subscriber_send_timeout,
        metrics.clone(),
    ));
    let collector = Collector::new(
        CollectorSettings::from(&cfg),
        sampler,
        provider,
        hub.clone(),
        metrics.clone(),
    );
    let snapshots = collector.snapshots();
    let host_name = host.host_name.clone();

    let (collector_stop, collector_rx) = watch::channel(false);
    let collector_task = tokio::spawn(collector.run(collector_rx));

    let (http_stop, mut http_rx) = watch::channel(false);
    let app = http::build_router(metrics, snapshots.clone(), hub.clone(), Arc::new(host));
    let http_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = http_rx.changed().await;
        });
        if let Err(err) = server.await {
            error!(error = %err, "ошибка HTTP-сервера");
        }
    });

    info!(
        listen = %local_addr,
        host_name = host_name.as_deref().unwrap_or("-"),
        sample_interval_seconds = cfg.sample_interval_seconds,
        history_capacity = cfg.history_capacity,
        "панель статуса запущена"
    );

    Ok(DashboardHandle {
        local_addr,
        snapshots,
        hub,
        collector_stop,
        http_stop,
        collector_task,
        http_task,
        grace: cfg.shutdown_grace,
    })
}

/// Like [`start`], but a dashboard that cannot start is logged and skipped so the host
/// application keeps running without it.
pub async fn start_or_disable(
    cfg: Config,
    provider: Arc<dyn ApplicationStatusProvider>,
) -> Option<DashboardHandle> {
    match start(cfg, provider).await {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!(error = %err, "панель статуса отключена");
            None
        }
    }
}
