//! Per-client request quotas

pub mod client;
pub mod counter;
pub mod policy;
pub mod processor;
pub mod rule;

pub use client::{ANONYMOUS_CLIENT, ClientKeyResolver};
pub use counter::{CounterKey, CounterState, RateLimitCounterStore};
pub use policy::{ClientRateLimitPolicy, PolicySnapshot, RateLimitPolicyStore};
pub use processor::{ContentionPolicy, QuotaStatus, RateLimitDecision, RateLimitProcessor};
pub use rule::{CompiledRule, EndpointPattern, RateLimitRule, RuleError, WindowKind, parse_period};
