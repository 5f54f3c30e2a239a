//! Live status dashboard: periodic host and application samples, a rolling history,
//! a WebSocket push stream and point-in-time HTTP queries.
//!
//! Embed it with [`start_or_disable`] to run next to an application that reports its
//! own status through a [`StatusBoard`], or run the `statusd` binary standalone.

pub mod collector;
pub mod collectors;
pub mod config;
mod dashboard;
pub mod history;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod snapshot;
pub mod state;
mod stream;

pub use collectors::{
    ApplicationStatusProvider, DetachedProvider, HttpStatusProvider, ProviderUnavailable,
    StatusBoard, SysinfoSampler, SystemSampler,
};
pub use config::{Config, ConfigError};
pub use dashboard::{start, start_or_disable, start_with_sampler, DashboardHandle, StartError};
pub use snapshot::{SnapshotError, SnapshotService};
pub use state::{
    ApplicationSnapshot, ApplicationState, ApplicationStatus, HistoryPoint, HostInfo, SystemSnapshot,
};
