use crate::protocol::{CombinedResponse, HistoryResponse};
use crate::state::{ApplicationSnapshot, PublishedState, SystemSnapshot};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("no sample has been published yet")]
    NotYetAvailable,
}

/// Write side of the published state. Only the collector holds one.
pub struct StateCell {
    published: Arc<ArcSwapOption<PublishedState>>,
    history_capacity: usize,
}

impl StateCell {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            published: Arc::new(ArcSwapOption::empty()),
            history_capacity,
        }
    }

    /// Replaces the whole published tuple in one atomic store.
    pub fn swap(&self, state: Arc<PublishedState>) {
        self.published.store(Some(state));
    }

    pub fn reader(&self) -> SnapshotService {
        SnapshotService {
            published: Arc::clone(&self.published),
            history_capacity: self.history_capacity,
        }
    }
}

/// Point-in-time answers from the last published tick. Reads never block the collector.
#[derive(Clone)]
pub struct SnapshotService {
    published: Arc<ArcSwapOption<PublishedState>>,
    history_capacity: usize,
}

impl SnapshotService {
    pub fn current(&self) -> Result<Arc<PublishedState>, SnapshotError> {
        self.published
            .load_full()
            .ok_or(SnapshotError::NotYetAvailable)
    }

    pub fn system(&self) -> Result<SystemSnapshot, SnapshotError> {
        self.current().map(|state| state.system.clone())
    }

    pub fn application(&self) -> Result<ApplicationSnapshot, SnapshotError> {
        self.current().map(|state| state.application.clone())
    }

    pub fn combined(&self) -> Result<CombinedResponse, SnapshotError> {
        self.current().map(|state| CombinedResponse::from(state.as_ref()))
    }

    pub fn history(&self) -> Result<HistoryResponse, SnapshotError> {
        self.current().map(|state| HistoryResponse {
            capacity: self.history_capacity,
            points: state.history.clone(),
        })
    }

    pub fn is_available(&self) -> bool {
        self.published.load().is_some()
    }
}
