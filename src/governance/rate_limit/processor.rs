//! Evaluation of a request against the rate-limit policies

use super::counter::{CounterKey, Hit, RateLimitCounterStore};
use super::policy::RateLimitPolicyStore;
use super::rule::CompiledRule;
use crate::core::clock::Clock;
use crate::core::error::QuotaExceededError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What to do when a counter cannot be updated in time
///
/// Contention is detected per counter shard, not per key: a lock held by
/// another client whose key hashes to the same shard, or a sweep passing
/// over that shard, exhausts the retries just like a busy counter of the
/// same client. Under `FailClosed` such a request gets a spurious 429, so
/// `counter_retries` should leave room for those short critical sections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionPolicy {
    /// Let the request through uncounted
    #[default]
    FailOpen,
    /// Reject the request with a one-second retry hint
    FailClosed,
}

/// Quota state reported on allowed responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset: DateTime<Utc>,
}

/// Outcome of [`RateLimitProcessor::check`]
#[derive(Debug)]
pub enum RateLimitDecision {
    /// Admitted; `None` when no rule governs the request or the client is exempt
    Allowed(Option<QuotaStatus>),
    Denied(QuotaExceededError),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed(_))
    }
}

/// Applies policies to counters
///
/// Every rule of the resolved group is counted, denied requests included, so
/// a client hammering a denied endpoint keeps its window saturated.
#[derive(Debug, Clone)]
pub struct RateLimitProcessor {
    policies: Arc<RateLimitPolicyStore>,
    counters: Arc<RateLimitCounterStore>,
    clock: Arc<dyn Clock>,
    contention: ContentionPolicy,
}

impl RateLimitProcessor {
    pub fn new(
        policies: Arc<RateLimitPolicyStore>,
        counters: Arc<RateLimitCounterStore>,
        clock: Arc<dyn Clock>,
        contention: ContentionPolicy,
    ) -> Self {
        Self {
            policies,
            counters,
            clock,
            contention,
        }
    }

    pub fn policies(&self) -> &Arc<RateLimitPolicyStore> {
        &self.policies
    }

    pub fn counters(&self) -> &Arc<RateLimitCounterStore> {
        &self.counters
    }

    pub fn check(&self, client_key: &str, method: &str, path: &str) -> RateLimitDecision {
        let snapshot = self.policies.load();
        if snapshot.is_exempt(client_key) {
            tracing::trace!(client = client_key, "client exempt from rate limiting");
            return RateLimitDecision::Allowed(None);
        }

        let rules = snapshot.resolve(client_key, method, path);
        if rules.is_empty() {
            return RateLimitDecision::Allowed(None);
        }

        let now = self.clock.now();
        let mut status: Option<QuotaStatus> = None;
        let mut denial: Option<QuotaExceededError> = None;

        for rule in rules {
            let hit = match self
                .counters
                .increment(CounterKey::new(client_key, rule), rule, now)
            {
                Ok(hit) => hit,
                Err(_) => match self.contention {
                    ContentionPolicy::FailOpen => {
                        tracing::warn!(
                            client = client_key,
                            endpoint = %rule.rule.endpoint,
                            "rate-limit counter contended, failing open"
                        );
                        continue;
                    }
                    ContentionPolicy::FailClosed => {
                        tracing::warn!(
                            client = client_key,
                            endpoint = %rule.rule.endpoint,
                            "rate-limit counter contended, failing closed"
                        );
                        let error = quota_error(client_key, rule, Duration::from_secs(1));
                        keep_longest(&mut denial, error);
                        continue;
                    }
                },
            };

            if hit.count > rule.rule.limit {
                let error = quota_error(client_key, rule, remaining(now, &hit));
                keep_longest(&mut denial, error);
            } else {
                let candidate = QuotaStatus {
                    limit: rule.rule.limit,
                    remaining: rule.rule.limit - hit.count,
                    reset: hit.reset_at,
                };
                if status.as_ref().is_none_or(|s| candidate.remaining < s.remaining) {
                    status = Some(candidate);
                }
            }
        }

        match denial {
            Some(error) => {
                tracing::info!(
                    client = client_key,
                    method,
                    path,
                    endpoint = %error.endpoint,
                    retry_after = error.retry_after_secs(),
                    "request quota exceeded"
                );
                RateLimitDecision::Denied(error)
            }
            None => RateLimitDecision::Allowed(status),
        }
    }

    /// Periodically purge expired counters until the task is aborted
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let counters = self.counters.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = counters.sweep(clock.now());
                if removed > 0 {
                    tracing::debug!(removed, live = counters.len(), "swept expired rate-limit counters");
                }
            }
        })
    }
}

fn remaining(now: DateTime<Utc>, hit: &Hit) -> Duration {
    (hit.reset_at - now).to_std().unwrap_or(Duration::ZERO)
}

fn quota_error(client_key: &str, rule: &CompiledRule, retry_after: Duration) -> QuotaExceededError {
    QuotaExceededError {
        client_key: client_key.to_string(),
        endpoint: rule.rule.endpoint.clone(),
        limit: rule.rule.limit,
        period: rule.rule.period.clone(),
        retry_after,
    }
}

fn keep_longest(slot: &mut Option<QuotaExceededError>, error: QuotaExceededError) {
    if slot.as_ref().is_none_or(|e| error.retry_after > e.retry_after) {
        *slot = Some(error);
    }
}
