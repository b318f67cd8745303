//! Rate-limit rules and endpoint patterns
//!
//! An endpoint is written `[verb:]path`, where the path may contain `*`
//! wildcards: `*`, `get:/api/companies`, `*:/api/companies/*`. Matching is
//! case-insensitive.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while compiling rules
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid period '{0}': expected a positive number followed by s, m, h or d")]
    InvalidPeriod(String),

    #[error("rule for '{endpoint}' must admit at least one request")]
    ZeroLimit { endpoint: String },

    #[error("invalid endpoint pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// How the counter of a rule is bucketed in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Epoch-aligned buckets of one period
    #[default]
    Fixed,
    /// The period immediately preceding each request
    Rolling,
}

/// A configured quota: at most `limit` requests per `period` on `endpoint`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub endpoint: String,
    pub limit: u64,
    /// e.g. `"30s"`, `"5m"`, `"1h"`, `"1d"`
    pub period: String,
    #[serde(default)]
    pub window: WindowKind,
}

impl RateLimitRule {
    pub fn new(endpoint: impl Into<String>, limit: u64, period: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            limit,
            period: period.into(),
            window: WindowKind::Fixed,
        }
    }

    pub fn rolling(mut self) -> Self {
        self.window = WindowKind::Rolling;
        self
    }
}

/// Parse a period such as `"5m"`
pub fn parse_period(raw: &str) -> Result<Duration, RuleError> {
    let raw = raw.trim();
    let invalid = || RuleError::InvalidPeriod(raw.to_string());

    let split = raw.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (amount, unit) = raw.split_at(split);
    let amount: u64 = amount.parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }

    let seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    amount
        .checked_mul(seconds)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Compiled `[verb:]path` pattern
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    raw: String,
    method: Option<String>,
    path: Regex,
    literal_chars: usize,
}

impl EndpointPattern {
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let trimmed = raw.trim();
        let (method, path) = match trimmed.split_once(':') {
            Some((verb, path)) if !verb.is_empty() && verb.chars().all(|c| c.is_ascii_alphabetic() || c == '*') => {
                let method = (verb != "*").then(|| verb.to_ascii_uppercase());
                (method, path)
            }
            _ => (None, trimmed),
        };

        if path.is_empty() {
            return Err(RuleError::InvalidPattern {
                pattern: raw.to_string(),
                message: "path is empty".to_string(),
            });
        }

        let body = path
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = RegexBuilder::new(&format!("^{}$", body))
            .case_insensitive(true)
            .build()
            .map_err(|e| RuleError::InvalidPattern {
                pattern: raw.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            raw: trimmed.to_ascii_lowercase(),
            method,
            path: regex,
            literal_chars: path.chars().filter(|c| *c != '*').count(),
        })
    }

    pub fn matches(&self, method: &str, path: &str) -> bool {
        let method_ok = self
            .method
            .as_deref()
            .is_none_or(|m| m.eq_ignore_ascii_case(method));
        method_ok && self.path.is_match(path)
    }

    /// Ranking among matching patterns: literal characters first, then
    /// verb-specific over any-verb
    pub fn specificity(&self) -> (usize, bool) {
        (self.literal_chars, self.method.is_some())
    }

    /// Normalized source text, used to group rules of the same endpoint
    pub fn normalized(&self) -> &str {
        &self.raw
    }
}

/// A rule with its pattern and period compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: RateLimitRule,
    pub pattern: EndpointPattern,
    pub period: Duration,
}

impl CompiledRule {
    pub fn compile(rule: RateLimitRule) -> Result<Self, RuleError> {
        if rule.limit == 0 {
            return Err(RuleError::ZeroLimit {
                endpoint: rule.endpoint,
            });
        }
        let period = parse_period(&rule.period)?;
        let pattern = EndpointPattern::parse(&rule.endpoint)?;
        Ok(Self {
            rule,
            pattern,
            period,
        })
    }

    pub fn compile_all(rules: &[RateLimitRule]) -> Result<Vec<Self>, RuleError> {
        rules.iter().cloned().map(Self::compile).collect()
    }

    /// Counter identity: endpoint and period, so a reload that only changes
    /// the limit keeps the running counts
    pub fn key(&self) -> String {
        format!("{}#{}", self.pattern.normalized(), self.period.as_secs())
    }

    pub fn period_millis(&self) -> i64 {
        i64::try_from(self.period.as_millis()).unwrap_or(i64::MAX)
    }

    /// Whether this rule replaces `other` when attached to a client
    pub fn overrides(&self, other: &CompiledRule) -> bool {
        self.pattern.normalized() == other.pattern.normalized() && self.period == other.period
    }
}
