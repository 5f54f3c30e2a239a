use crate::collectors::{
    ApplicationStatusProvider, BoundedSampler, ProviderUnavailable, SystemSampler,
};
use crate::config::Config;
use crate::history::HistoryStore;
use crate::hub::BroadcastHub;
use crate::metrics::Metrics;
use crate::snapshot::{SnapshotService, StateCell};
use crate::state::{
    ApplicationSnapshot, ApplicationStatus, HistoryPoint, PublishedState, SystemSnapshot,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sampling,
    Publishing,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectorSettings {
    pub interval: Duration,
    pub sample_timeout: Duration,
    pub provider_timeout: Duration,
    pub history_capacity: usize,
}

impl From<&Config> for CollectorSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            interval: cfg.sample_interval(),
            sample_timeout: cfg.sample_timeout,
            provider_timeout: cfg.provider_timeout,
            history_capacity: cfg.history_capacity,
        }
    }
}

/// Owns the sampling cadence and is the only writer of the published state.
pub struct Collector {
    sampler: BoundedSampler,
    provider: Arc<dyn ApplicationStatusProvider>,
    provider_timeout: Duration,
    interval: Duration,
    history: HistoryStore,
    cell: StateCell,
    hub: Arc<BroadcastHub>,
    metrics: Arc<Metrics>,
    last_system: Option<SystemSnapshot>,
    phase: Phase,
}

impl Collector {
    pub fn new(
        settings: CollectorSettings,
        sampler: Box<dyn SystemSampler>,
        provider: Arc<dyn ApplicationStatusProvider>,
        hub: Arc<BroadcastHub>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sampler: BoundedSampler::new(sampler, settings.sample_timeout),
            provider,
            provider_timeout: settings.provider_timeout,
            interval: settings.interval,
            history: HistoryStore::new(settings.history_capacity),
            cell: StateCell::new(settings.history_capacity),
            hub,
            metrics,
            last_system: None,
            phase: Phase::Idle,
        }
    }

    pub fn snapshots(&self) -> SnapshotService {
        self.cell.reader()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// One sampling-and-publish cycle. Returns `None` only when nothing could be
    /// published: the host sample failed and there is no earlier one to fall back on.
    pub async fn tick(&mut self) -> Option<Arc<PublishedState>> {
        self.phase = Phase::Sampling;
        let (system, application) = tokio::join!(self.sampler.sample(), self.poll_application());
        let now = Utc::now();

        let system = match system {
            // a clock stepped back must not make a fresh sample look older than the last one
            Ok(snapshot) => match &self.last_system {
                Some(previous) => {
                    snapshot.restamped(next_stamp(snapshot.captured_at, previous.captured_at))
                }
                None => snapshot,
            },
            Err(err) => {
                self.metrics.inc_collect_error("system");
                match &self.last_system {
                    Some(previous) => {
                        warn!(error = %err, "system sampling failed, reusing previous values");
                        previous.restamped(next_stamp(now, previous.captured_at))
                    }
                    None => {
                        warn!(error = %err, "system sampling failed before the first sample, tick skipped");
                        self.phase = Phase::Idle;
                        return None;
                    }
                }
            }
        };

        let application = match application {
            Ok(status) => ApplicationSnapshot::from_status(status, now),
            Err(err) => {
                self.metrics.inc_collect_error("application");
                warn!(error = %err, "application status unavailable, publishing disconnected");
                ApplicationSnapshot::disconnected(now)
            }
        };

        self.phase = Phase::Publishing;
        if let Err(err) = self.history.append(HistoryPoint::from(&system)) {
            warn!(error = %err, "history point rejected");
        }
        let state = Arc::new(PublishedState {
            system: system.clone(),
            application,
            history: self.history.snapshot(),
        });
        self.last_system = Some(system);

        self.cell.swap(Arc::clone(&state));
        self.metrics.update_from_state(&state);
        let report = self.hub.publish(Arc::clone(&state));
        debug!(
            delivered = report.delivered,
            dropped = report.dropped.len(),
            cpu_percent = state.system.cpu_percent,
            "tick published"
        );

        self.phase = Phase::Idle;
        Some(state)
    }

    /// Ticks until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        // an overrunning tick is followed right away by the next, without a catch-up burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "collector started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("collector stopped");
    }

    async fn poll_application(&self) -> Result<ApplicationStatus, ProviderUnavailable> {
        match time::timeout(self.provider_timeout, self.provider.status()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ProviderUnavailable::new(format!(
                "no answer within {:?}",
                self.provider_timeout
            ))),
        }
    }
}

/// Keeps reused samples strictly after the one they repeat, even if the clock stepped back.
fn next_stamp(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}
