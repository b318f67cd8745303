//! Per-client, per-rule request counters
//!
//! Counters live in a [`DashMap`], so a read-and-increment only locks the
//! shard owning its key: two clients, or two rules, never serialize unless
//! they happen to share a shard.

use super::rule::{CompiledRule, WindowKind};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Identity of a counter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub client_key: String,
    pub rule_key: String,
}

impl CounterKey {
    pub fn new(client_key: &str, rule: &CompiledRule) -> Self {
        Self {
            client_key: client_key.to_string(),
            rule_key: rule.key(),
        }
    }
}

/// Window bookkeeping, in epoch milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterState {
    Fixed { window_start: i64, count: u64 },
    /// The most recent `limit + 1` hits, oldest first
    Rolling { hits: VecDeque<i64> },
}

/// Result of counting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Requests in the window, this one included
    pub count: u64,
    /// When the window admits a request again (or resets, if allowed)
    pub reset_at: DateTime<Utc>,
}

/// The shard holding a key stayed locked through every retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contention;

#[derive(Debug)]
struct Counter {
    state: CounterState,
    period_ms: i64,
}

impl Counter {
    fn new(rule: &CompiledRule) -> Self {
        let state = match rule.rule.window {
            WindowKind::Fixed => CounterState::Fixed {
                window_start: i64::MIN,
                count: 0,
            },
            WindowKind::Rolling => CounterState::Rolling {
                hits: VecDeque::new(),
            },
        };
        Self {
            state,
            period_ms: rule.period_millis(),
        }
    }

    fn hit(&mut self, limit: u64, now_ms: i64) -> (u64, i64) {
        let period = self.period_ms;
        match &mut self.state {
            CounterState::Fixed {
                window_start,
                count,
            } => {
                let start = now_ms - now_ms.rem_euclid(period);
                if *window_start != start {
                    *window_start = start;
                    *count = 0;
                }
                *count = count.saturating_add(1);
                (*count, start.saturating_add(period))
            }
            CounterState::Rolling { hits } => {
                while hits.front().is_some_and(|t| now_ms - t >= period) {
                    hits.pop_front();
                }
                hits.push_back(now_ms);
                let keep = usize::try_from(limit.saturating_add(1)).unwrap_or(usize::MAX);
                while hits.len() > keep {
                    hits.pop_front();
                }

                let count = hits.len() as u64;
                // The next request fits once all but the newest `limit - 1`
                // hits have left the window
                let releasing = if count > limit {
                    hits.len() - usize::try_from(limit).unwrap_or(usize::MAX)
                } else {
                    0
                };
                let reset = hits.get(releasing).copied().unwrap_or(now_ms);
                (count, reset.saturating_add(period))
            }
        }
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        match &self.state {
            CounterState::Fixed { window_start, .. } => {
                now_ms.saturating_sub(*window_start) >= self.period_ms
            }
            CounterState::Rolling { hits } => hits
                .back()
                .is_none_or(|last| now_ms - last >= self.period_ms),
        }
    }
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sharded store of every live counter
#[derive(Debug)]
pub struct RateLimitCounterStore {
    counters: DashMap<CounterKey, Counter>,
    max_retries: u32,
}

impl RateLimitCounterStore {
    /// Create a store whose increments give up after `max_retries` attempts
    /// on a locked shard
    pub fn new(max_retries: u32) -> Self {
        Self {
            counters: DashMap::new(),
            max_retries,
        }
    }

    /// Count one request against `rule` for the client of `key`
    ///
    /// Expired windows are reset lazily here.
    pub fn increment(&self, key: CounterKey, rule: &CompiledRule, now: DateTime<Utc>) -> Result<Hit, Contention> {
        let now_ms = now.timestamp_millis();
        for attempt in 0..=self.max_retries {
            if let Some(entry) = self.counters.try_entry(key.clone()) {
                let mut counter = entry.or_insert_with(|| Counter::new(rule));
                // A reload may change the window kind of a rule
                if counter.period_ms != rule.period_millis()
                    || matches!(
                        (&counter.state, rule.rule.window),
                        (CounterState::Fixed { .. }, WindowKind::Rolling)
                            | (CounterState::Rolling { .. }, WindowKind::Fixed)
                    )
                {
                    *counter = Counter::new(rule);
                }
                let (count, reset_ms) = counter.hit(rule.rule.limit, now_ms);
                return Ok(Hit {
                    count,
                    reset_at: to_datetime(reset_ms),
                });
            }
            if attempt < self.max_retries {
                std::thread::yield_now();
            }
        }
        Err(Contention)
    }

    /// Current state of a counter
    pub fn state(&self, key: &CounterKey) -> Option<CounterState> {
        self.counters.get(key).map(|c| c.state.clone())
    }

    /// Drop every counter whose window has passed; returns how many went
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now_ms));
        before.saturating_sub(self.counters.len())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Hold the shard of `key` locked until the guard drops
    #[cfg(test)]
    pub(crate) fn lock_shard(&self, key: CounterKey) -> impl Sized + '_ {
        self.counters.entry(key)
    }
}

impl Default for RateLimitCounterStore {
    fn default() -> Self {
        Self::new(64)
    }
}
