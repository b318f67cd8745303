//! Rate-limit policies: general rules, client overrides and exemptions
//!
//! The whole rule set lives in one immutable [`PolicySnapshot`] held behind
//! an [`ArcSwap`]. Readers load the current snapshot without locking; a
//! reload builds a new snapshot and swaps it in, so a request always sees
//! either the old rules or the new rules, never a mix.

use super::rule::{CompiledRule, RateLimitRule, RuleError};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Rules attached to one client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRateLimitPolicy {
    pub client_id: String,
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

/// Immutable, compiled rule set
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    general: Vec<CompiledRule>,
    clients: HashMap<String, Vec<CompiledRule>>,
    exempt: HashSet<String>,
}

impl PolicySnapshot {
    pub fn compile(
        general: &[RateLimitRule],
        clients: &[ClientRateLimitPolicy],
        exempt: &[String],
    ) -> Result<Self, RuleError> {
        let mut compiled_clients = HashMap::new();
        for policy in clients {
            compiled_clients.insert(
                policy.client_id.clone(),
                CompiledRule::compile_all(&policy.rules)?,
            );
        }

        Ok(Self {
            general: CompiledRule::compile_all(general)?,
            clients: compiled_clients,
            exempt: exempt.iter().cloned().collect(),
        })
    }

    pub fn is_exempt(&self, client_key: &str) -> bool {
        self.exempt.contains(client_key)
    }

    pub fn general_rules(&self) -> &[CompiledRule] {
        &self.general
    }

    pub fn client_rules(&self, client_key: &str) -> &[CompiledRule] {
        self.clients.get(client_key).map_or(&[], Vec::as_slice)
    }

    /// The rule group governing a request
    ///
    /// Client rules replace general rules with the same endpoint and period.
    /// Among the matching rules the most specific endpoint wins (ties go to
    /// the first one, client rules first) and every matching rule written for
    /// that same endpoint applies. Empty when nothing matches.
    pub fn resolve(&self, client_key: &str, method: &str, path: &str) -> Vec<&CompiledRule> {
        let client = self.client_rules(client_key);
        let candidates: Vec<&CompiledRule> = client
            .iter()
            .chain(
                self.general
                    .iter()
                    .filter(|g| !client.iter().any(|c| c.overrides(g))),
            )
            .filter(|rule| rule.pattern.matches(method, path))
            .collect();

        let mut best: Option<&CompiledRule> = None;
        for rule in candidates.iter().copied() {
            if best.is_none_or(|b| rule.pattern.specificity() > b.pattern.specificity()) {
                best = Some(rule);
            }
        }

        match best {
            Some(winner) => candidates
                .into_iter()
                .filter(|rule| rule.pattern.normalized() == winner.pattern.normalized())
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Process-wide, hot-reloadable holder of the current [`PolicySnapshot`]
#[derive(Debug)]
pub struct RateLimitPolicyStore {
    current: ArcSwap<PolicySnapshot>,
}

impl RateLimitPolicyStore {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// The snapshot in force right now
    pub fn load(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Atomically install a new rule set
    pub fn replace(&self, snapshot: PolicySnapshot) {
        self.current.store(Arc::new(snapshot));
        tracing::info!("rate-limit policies reloaded");
    }

    /// Replace the rules of one client, keeping everything else
    pub fn set_client_rules(&self, client_id: &str, rules: &[RateLimitRule]) -> Result<(), RuleError> {
        let compiled = CompiledRule::compile_all(rules)?;
        self.current.rcu(|current| {
            let mut next = PolicySnapshot::clone(current);
            next.clients.insert(client_id.to_string(), compiled.clone());
            next
        });
        tracing::info!(client = client_id, rules = rules.len(), "client rate-limit policy updated");
        Ok(())
    }
}

impl Default for RateLimitPolicyStore {
    fn default() -> Self {
        Self::new(PolicySnapshot::default())
    }
}
