//! Server host: the long-lived state behind the HTTP surface
//!
//! The host owns the store, the rate-limit policy and counter stores, the
//! cache validator and the clock they share. It is independent of the
//! transport; [`RestExposure`](super::exposure::RestExposure) turns it into
//! an axum `Router`.

use super::router::build_version_router;
use super::state::AppState;
use crate::config::{AppConfig, RateLimitingConfig};
use crate::core::clock::Clock;
use crate::core::error::ConfigError;
use crate::governance::rate_limit::RuleError;
use crate::governance::{
    CacheValidator, GovernancePipeline, RateLimitCounterStore, RateLimitPolicyStore,
    RateLimitProcessor, RateLimitRule,
};
use crate::storage::EntityStore;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Host context containing all server state
pub struct ServerHost {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn EntityStore>,
    pub clock: Arc<dyn Clock>,
    policies: Arc<RateLimitPolicyStore>,
    counters: Arc<RateLimitCounterStore>,
    rate_limiter: Arc<RateLimitProcessor>,
    cache: Arc<CacheValidator>,
}

impl ServerHost {
    /// Build the host from a validated configuration
    pub fn new(config: AppConfig, store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let limits = &config.rate_limiting;
        let policies = Arc::new(RateLimitPolicyStore::new(limits.policy_snapshot()?));
        let counters = Arc::new(RateLimitCounterStore::new(limits.counter_retries));
        let rate_limiter = Arc::new(RateLimitProcessor::new(
            policies.clone(),
            counters.clone(),
            clock.clone(),
            limits.contention,
        ));
        let cache = Arc::new(CacheValidator::new(
            config.caching.default_profile.clone(),
            config.caching.profiles.clone(),
            clock.clone(),
        )
        .with_max_tokens(config.caching.max_tokens));

        Ok(Self {
            config: Arc::new(config),
            store,
            clock,
            policies,
            counters,
            rate_limiter,
            cache,
        })
    }

    /// Handler state over the host's store
    pub fn app_state(&self) -> AppState {
        AppState::new(self.store.clone(), self.config.storage.deadline()).with_clock(self.clock.clone())
    }

    /// The versioned API behind the governance chain
    pub fn governed_router(&self) -> Result<Router> {
        let mut pipeline = GovernancePipeline::new(build_version_router(self.app_state()))
            .with_version_header(self.config.versioning.header_name()?);

        if self.config.rate_limiting.enabled {
            pipeline = pipeline.with_rate_limiter(self.rate_limiter.clone(), self.config.rate_limiting.client_keys()?);
        }
        if self.config.caching.enabled {
            pipeline = pipeline.with_cache(self.cache.clone());
        }
        Ok(pipeline.into_router())
    }

    /// Swap in a new rule set; live counters of unchanged rules are kept
    pub fn reload_rate_limits(&self, limits: &RateLimitingConfig) -> Result<(), ConfigError> {
        self.policies.replace(limits.policy_snapshot()?);
        Ok(())
    }

    /// Replace the overrides of one client
    pub fn set_client_rules(&self, client_id: &str, rules: &[RateLimitRule]) -> Result<(), RuleError> {
        self.policies.set_client_rules(client_id, rules)
    }

    /// Start the periodic purge of expired counters
    pub fn spawn_counter_sweeper(&self) -> JoinHandle<()> {
        self.rate_limiter
            .spawn_sweeper(self.config.rate_limiting.sweep_interval())
    }

    /// Start the periodic purge of expired cache validators
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        self.cache.spawn_sweeper(self.config.caching.sweep_interval())
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimitProcessor> {
        &self.rate_limiter
    }

    pub fn counters(&self) -> &Arc<RateLimitCounterStore> {
        &self.counters
    }

    pub fn policies(&self) -> &Arc<RateLimitPolicyStore> {
        &self.policies
    }

    pub fn cache(&self) -> &Arc<CacheValidator> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{ManualClock, SystemClock};
    use crate::storage::InMemoryEntityStore;
    use chrono::Utc;

    fn host(config: AppConfig) -> Result<ServerHost> {
        ServerHost::new(config, Arc::new(InMemoryEntityStore::new()), Arc::new(SystemClock::new()))
    }

    #[test]
    fn test_host_compiles_default_rules() {
        let host = host(AppConfig::default()).unwrap();
        let snapshot = host.policies().load();
        assert_eq!(snapshot.general_rules().len(), 1);
        assert!(host.counters().is_empty());
        assert!(host.cache().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.rate_limiting.general_rules = vec![RateLimitRule::new("*", 0, "1m")];
        assert!(host(config).is_err());
    }

    #[test]
    fn test_reload_replaces_rules() {
        let host = host(AppConfig::default()).unwrap();
        let mut limits = RateLimitingConfig::default();
        limits.general_rules = vec![
            RateLimitRule::new("*", 100, "5m"),
            RateLimitRule::new("get:/api/companies", 10, "1m"),
        ];

        host.reload_rate_limits(&limits).unwrap();
        assert_eq!(host.policies().load().general_rules().len(), 2);

        limits.general_rules = vec![RateLimitRule::new("*", 1, "sometimes")];
        assert!(host.reload_rate_limits(&limits).is_err());
        assert_eq!(host.policies().load().general_rules().len(), 2);
    }

    #[test]
    fn test_client_rules_can_be_set_at_runtime() {
        let host = host(AppConfig::default()).unwrap();
        host.set_client_rules("reporting", &[RateLimitRule::new("*", 5, "1m")])
            .unwrap();
        assert_eq!(host.policies().load().client_rules("reporting").len(), 1);
    }

    #[test]
    fn test_cache_capacity_comes_from_config() {
        let mut config = AppConfig::default();
        config.caching.max_tokens = 3;
        let host = host(config).unwrap();

        for i in 0..10 {
            host.cache()
                .issue(&format!("1.0|/api/companies?x={i}"), "/api/companies", b"[]", None);
        }
        assert!(host.cache().len() <= 3);
    }

    #[tokio::test]
    async fn test_cache_sweeper_purges_expired_validators() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let host = ServerHost::new(AppConfig::default(), Arc::new(InMemoryEntityStore::new()), clock.clone()).unwrap();
        host.cache().issue("1.0|/api/companies", "/api/companies", b"[]", None);

        let sweeper = host.cache().spawn_sweeper(std::time::Duration::from_millis(10));
        clock.advance(std::time::Duration::from_secs(3_600));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(host.cache().is_empty());
        sweeper.abort();
    }
}
