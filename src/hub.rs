use crate::metrics::Metrics;
use crate::protocol::MessageKind;
use crate::state::PublishedState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub type SubscriberId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("broadcast hub is closed")]
pub struct HubClosed;

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("send to subscriber failed: {0}")]
    SendFailed(String),
    #[error("send to subscriber timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    Stalled,
    Closed,
    SendFailed,
    SendTimeout,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::Stalled => "stalled",
            DropReason::Closed => "closed",
            DropReason::SendFailed => "send_failed",
            DropReason::SendTimeout => "send_timeout",
        }
    }
}

impl From<&SubscriberError> for DropReason {
    fn from(value: &SubscriberError) -> Self {
        match value {
            SubscriberError::SendFailed(_) => DropReason::SendFailed,
            SubscriberError::Timeout(_) => DropReason::SendTimeout,
        }
    }
}

/// A queued frame: which kind of message to emit and the state it carries.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub kind: MessageKind,
    pub state: Arc<PublishedState>,
}

/// Receiving end of one subscription.
///
/// Dropping it ends the subscription; the hub notices on the next publish. Once the hub
/// unregisters or drops it, nothing more is handed out, not even frames already queued.
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<Outbound>,
    drained: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next queued frame; `None` once the hub has let go of this subscriber.
    pub async fn recv(&mut self) -> Option<Outbound> {
        if self.is_cancelled() {
            return None;
        }
        let message = self.rx.recv().await?;
        if self.is_cancelled() {
            return None;
        }
        self.drained.fetch_add(1, Ordering::Relaxed);
        Some(message)
    }

    pub fn try_recv(&mut self) -> Result<Outbound, TryRecvError> {
        if self.is_cancelled() {
            return Err(TryRecvError::Disconnected);
        }
        let message = self.rx.try_recv()?;
        self.drained.fetch_add(1, Ordering::Relaxed);
        Ok(message)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: Vec<(SubscriberId, DropReason)>,
    /// The state was older than the last published one and was not sent.
    pub stale: bool,
}

struct Slot {
    tx: mpsc::Sender<Outbound>,
    drained: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
    sent: u64,
    seen_drained: u64,
    /// Last time the consumer was seen making progress or fully caught up.
    progress_at: Instant,
    last_send: Option<Instant>,
    greeted: bool,
}

impl Slot {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn offer(
        &mut self,
        state: &Arc<PublishedState>,
        now: Instant,
        send_timeout: Duration,
    ) -> Result<(), DropReason> {
        if self.tx.is_closed() {
            return Err(DropReason::Closed);
        }

        let drained = self.drained.load(Ordering::Relaxed);
        if drained != self.seen_drained {
            self.seen_drained = drained;
            self.progress_at = now;
        }
        let pending = self.sent.saturating_sub(drained);
        if pending == 0 {
            self.progress_at = now;
        } else if now.duration_since(self.progress_at) >= send_timeout {
            return Err(DropReason::Stalled);
        }

        let kind = if self.greeted {
            MessageKind::Update
        } else {
            MessageKind::Initial
        };
        self.push(kind, Arc::clone(state), now)
    }

    fn push(
        &mut self,
        kind: MessageKind,
        state: Arc<PublishedState>,
        now: Instant,
    ) -> Result<(), DropReason> {
        match self.tx.try_send(Outbound { kind, state }) {
            Ok(()) => {
                self.sent += 1;
                self.greeted = true;
                self.last_send = Some(now);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(DropReason::QueueFull),
            Err(TrySendError::Closed(_)) => Err(DropReason::Closed),
        }
    }
}

#[derive(Default)]
struct Registry {
    slots: HashMap<SubscriberId, Slot>,
    latest: Option<Arc<PublishedState>>,
    closed: bool,
}

/// Fan-out of published states to every live subscriber.
///
/// All registry changes and every publish happen inside one short, non-awaiting
/// critical section. A subscriber that registers concurrently with a publish therefore
/// sees that state either as its `initial` frame or not at all, never twice.
/// Slow consumers are dropped rather than waited for.
pub struct BroadcastHub {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    queue_capacity: usize,
    send_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize, send_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            send_timeout,
            metrics,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn register(&self) -> Result<Subscriber, HubClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let drained = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let now = Instant::now();
        let mut slot = Slot {
            tx,
            drained: Arc::clone(&drained),
            cancelled: Arc::clone(&cancelled),
            sent: 0,
            seen_drained: 0,
            progress_at: now,
            last_send: None,
            greeted: false,
        };

        let count = {
            let mut registry = self.lock();
            if registry.closed {
                return Err(HubClosed);
            }
            if let Some(latest) = registry.latest.clone() {
                if let Err(reason) = slot.push(MessageKind::Initial, latest, now) {
                    warn!(subscriber = id, reason = reason.as_str(), "initial frame not queued");
                }
            }
            registry.slots.insert(id, slot);
            registry.slots.len()
        };

        self.metrics.set_subscribers(count);
        debug!(subscriber = id, subscribers = count, "subscriber registered");
        Ok(Subscriber {
            id,
            rx,
            drained,
            cancelled,
        })
    }

    /// Removes a subscriber; its queue closes and nothing published later reaches it.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut registry = self.lock();
            let removed = match registry.slots.remove(&id) {
                Some(slot) => {
                    slot.cancel();
                    true
                }
                None => false,
            };
            (removed, registry.slots.len())
        };
        if removed {
            self.metrics.set_subscribers(count);
            debug!(subscriber = id, subscribers = count, "subscriber unregistered");
        }
        removed
    }

    /// Disconnects a subscriber whose transport failed.
    pub fn drop_subscriber(&self, id: SubscriberId, reason: DropReason) {
        if self.unregister(id) {
            self.metrics.inc_subscriber_dropped(reason.as_str());
            warn!(subscriber = id, reason = reason.as_str(), "subscriber dropped");
        }
    }

    pub fn publish(&self, state: Arc<PublishedState>) -> PublishReport {
        let now = Instant::now();
        let send_timeout = self.send_timeout;
        let mut report = PublishReport::default();

        let count = {
            let mut registry = self.lock();
            if registry.closed {
                return report;
            }
            if let Some(latest) = &registry.latest {
                if state.captured_at() < latest.captured_at() {
                    warn!(
                        captured_at = %state.captured_at(),
                        latest = %latest.captured_at(),
                        "stale state not published"
                    );
                    report.stale = true;
                    return report;
                }
            }
            registry.latest = Some(Arc::clone(&state));

            let mut delivered = 0_usize;
            let mut dropped = Vec::new();
            registry
                .slots
                .retain(|id, slot| match slot.offer(&state, now, send_timeout) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(reason) => {
                        slot.cancel();
                        dropped.push((*id, reason));
                        false
                    }
                });
            report.delivered = delivered;
            report.dropped = dropped;
            registry.slots.len()
        };

        for (id, reason) in &report.dropped {
            self.metrics.inc_subscriber_dropped(reason.as_str());
            warn!(subscriber = id, reason = reason.as_str(), "subscriber dropped");
        }
        self.metrics.set_subscribers(count);
        report
    }

    /// Refuses new subscribers and ends every queue. Frames already queued stay readable
    /// so connections can flush them during shutdown.
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut registry = self.lock();
            registry.closed = true;
            let count = registry.slots.len();
            registry.slots.clear();
            count
        };
        self.metrics.set_subscribers(0);
        info!(subscribers = closed, "broadcast hub closed");
        closed
    }

    pub fn latest(&self) -> Option<Arc<PublishedState>> {
        self.lock().latest.clone()
    }

    pub fn last_send(&self, id: SubscriberId) -> Option<Instant> {
        self.lock().slots.get(&id).and_then(|slot| slot.last_send)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
