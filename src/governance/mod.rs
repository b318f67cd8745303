//! Request governance: versioning, rate limiting and conditional caching
//!
//! The three concerns are independent components chained by
//! [`GovernancePipeline`] in front of the controllers.

pub mod cache;
pub mod pipeline;
pub mod rate_limit;
pub mod version;

pub use cache::{
    CacheDecision, CacheLocation, CacheProfile, CacheValidationToken, CacheValidator, Conditions,
    LastModified,
};
pub use pipeline::{GovernancePipeline, GovernanceState};
pub use rate_limit::{
    ClientKeyResolver, ClientRateLimitPolicy, ContentionPolicy, PolicySnapshot, RateLimitCounterStore,
    RateLimitDecision, RateLimitPolicyStore, RateLimitProcessor, RateLimitRule, WindowKind,
};
pub use version::{ApiVersion, ResolvedVersion, VersionRouter};
