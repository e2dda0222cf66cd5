//! Adaptive resource governor.
//!
//! Samples memory and CPU usage in the background and recommends a worker
//! pool size for each wave: one smaller under pressure, one larger after a
//! sustained idle period, never changing twice within the cooldown.

mod policy;
mod resource;
mod sampler;
mod snapshot;

pub use policy::{GovernorConfig, HysteresisPolicy};
pub use resource::{PoolDecision, ResourceGovernor};
#[cfg(feature = "system-sampler")]
pub use sampler::SystemSampler;
pub use sampler::{ResourceSampler, ScriptedSampler, StaticSampler};
pub use snapshot::ResourceSnapshot;
