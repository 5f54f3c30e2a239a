use crate::state::HistoryPoint;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use thiserror::Error;

pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("point at {point} is not newer than the latest stored point at {latest}")]
    OutOfOrder {
        point: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// Fixed-capacity FIFO of recent samples, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl HistoryStore {
    /// `capacity` is raised to 1 if zero; config validation rejects zero before this.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, point: HistoryPoint) -> Result<(), HistoryError> {
        if let Some(latest) = self.points.back() {
            if point.timestamp <= latest.timestamp {
                return Err(HistoryError::OutOfOrder {
                    point: point.timestamp,
                    latest: latest.timestamp,
                });
            }
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
        Ok(())
    }

    /// Owned copy in capture order.
    pub fn snapshot(&self) -> Vec<HistoryPoint> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
