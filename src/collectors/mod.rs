pub mod application;
pub mod system;

pub use application::{
    ApplicationStatusProvider, DetachedProvider, HttpStatusProvider, ProviderUnavailable,
    StatusBoard,
};
pub use system::{BoundedSampler, SamplingError, SysinfoSampler, SystemSampler};
