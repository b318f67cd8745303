//! Conditional HTTP caching
//!
//! Every cacheable response gets a validator token: a strong entity tag
//! (SHA-256 of the body) and a last-modified instant. Tokens are remembered
//! per resource key, which lets a conditional GET be answered with `304 Not
//! Modified` before any handler runs, and lets write preconditions
//! (`If-Match`, `If-Unmodified-Since`) be checked before the write happens.
//!
//! The token map is bounded: tokens older than their profile's max-age plus
//! [`EXPIRY_GRACE`] are swept, and past the configured capacity the oldest
//! tokens are evicted. A forgotten token only costs one handler run.

use crate::core::clock::Clock;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long a token outlives the max-age of its profile
pub const EXPIRY_GRACE: Duration = Duration::from_secs(60);

/// Default bound of the token map
pub const DEFAULT_MAX_TOKENS: usize = 10_000;

/// Response extension through which a handler reports when the returned
/// state last changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastModified(pub DateTime<Utc>);

/// Who may store the response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLocation {
    #[default]
    Private,
    Public,
}

/// Caching directives of a resource class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheProfile {
    pub max_age_secs: u64,
    pub location: CacheLocation,
    pub must_revalidate: bool,
}

impl Default for CacheProfile {
    fn default() -> Self {
        Self {
            max_age_secs: 65,
            location: CacheLocation::Private,
            must_revalidate: true,
        }
    }
}

impl CacheProfile {
    /// Value of the `Cache-Control` header
    pub fn cache_control(&self) -> String {
        let location = match self.location {
            CacheLocation::Private => "private",
            CacheLocation::Public => "public",
        };
        let mut value = format!("{}, max-age={}", location, self.max_age_secs);
        if self.must_revalidate {
            value.push_str(", must-revalidate");
        }
        value
    }
}

/// Freshness marker of one representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValidationToken {
    /// Version, path and query of the representation
    pub resource_key: String,
    pub path: String,
    /// Quoted strong entity tag
    pub etag: String,
    /// Truncated to whole seconds, the precision of HTTP dates
    pub last_modified: DateTime<Utc>,
    pub profile: CacheProfile,
    /// When the token was last computed
    pub issued_at: DateTime<Utc>,
}

impl CacheValidationToken {
    /// Whether the token is past max-age plus [`EXPIRY_GRACE`] at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let lifetime = Duration::from_secs(self.profile.max_age_secs) + EXPIRY_GRACE;
        (now - self.issued_at)
            .to_std()
            .is_ok_and(|age| age > lifetime)
    }
}

impl CacheValidationToken {
    /// Write `ETag`, `Last-Modified`, `Cache-Control` and `Vary`
    pub fn apply_headers(&self, headers: &mut HeaderMap, vary: &HeaderValue) {
        if let Ok(etag) = HeaderValue::from_str(&self.etag) {
            headers.insert(header::ETAG, etag);
        }
        if let Ok(date) = HeaderValue::from_str(&format_http_date(self.last_modified)) {
            headers.insert(header::LAST_MODIFIED, date);
        }
        if let Ok(control) = HeaderValue::from_str(&self.profile.cache_control()) {
            headers.insert(header::CACHE_CONTROL, control);
        }
        headers.insert(header::VARY, vary.clone());
    }
}

/// Strong entity tag of a body
pub fn entity_tag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(digest))
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Parsed `If-None-Match` / `If-Match` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCondition {
    Any,
    Tags(Vec<String>),
}

impl TagCondition {
    fn parse(raw: &str) -> Self {
        if raw.trim() == "*" {
            return TagCondition::Any;
        }
        TagCondition::Tags(
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Weak comparison: `W/` prefixes are ignored
    fn matches_weak(&self, etag: &str) -> bool {
        match self {
            TagCondition::Any => true,
            TagCondition::Tags(tags) => tags.iter().any(|t| strip_weak(t) == strip_weak(etag)),
        }
    }

    /// Strong comparison: weak tags never match
    fn matches_strong(&self, etag: &str) -> bool {
        match self {
            TagCondition::Any => true,
            TagCondition::Tags(tags) => tags
                .iter()
                .any(|t| !t.starts_with("W/") && !etag.starts_with("W/") && t == etag),
        }
    }
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Conditional request headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub if_none_match: Option<TagCondition>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_match: Option<TagCondition>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl Conditions {
    /// Unparseable dates are ignored
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            if_none_match: text(header::IF_NONE_MATCH).map(TagCondition::parse),
            if_modified_since: text(header::IF_MODIFIED_SINCE).and_then(parse_http_date),
            if_match: text(header::IF_MATCH).map(TagCondition::parse),
            if_unmodified_since: text(header::IF_UNMODIFIED_SINCE).and_then(parse_http_date),
        }
    }

    pub fn is_conditional_read(&self) -> bool {
        self.if_none_match.is_some() || self.if_modified_since.is_some()
    }

    pub fn has_write_preconditions(&self) -> bool {
        self.if_match.is_some() || self.if_unmodified_since.is_some()
    }
}

/// Outcome of a conditional evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// The client's copy is current
    NotModified(CacheValidationToken),
    /// Serve (or perform) the request normally
    Proceed,
    /// A write precondition did not hold
    PreconditionFailed,
}

/// Issues, remembers and checks validator tokens
#[derive(Debug)]
pub struct CacheValidator {
    default_profile: CacheProfile,
    profiles: HashMap<String, CacheProfile>,
    tokens: DashMap<String, CacheValidationToken>,
    max_tokens: usize,
    clock: Arc<dyn Clock>,
}

impl CacheValidator {
    pub fn new(
        default_profile: CacheProfile,
        profiles: HashMap<String, CacheProfile>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            default_profile,
            profiles,
            tokens: DashMap::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            clock,
        }
    }

    /// Bound the number of remembered tokens (at least one)
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    /// Profile of the resource class of `path`
    pub fn profile_for(&self, path: &str) -> &CacheProfile {
        resource_class(path)
            .and_then(|class| self.profiles.get(class))
            .unwrap_or(&self.default_profile)
    }

    /// Stored token of a resource key
    pub fn lookup(&self, resource_key: &str) -> Option<CacheValidationToken> {
        self.tokens.get(resource_key).map(|t| t.clone())
    }

    /// Evaluate a safe request against the stored token, if any
    pub fn evaluate(&self, resource_key: &str, conditions: &Conditions) -> CacheDecision {
        match self.lookup(resource_key) {
            Some(token) => Self::evaluate_token(token, conditions),
            None => CacheDecision::Proceed,
        }
    }

    /// Evaluate a safe request against a known token
    ///
    /// `If-None-Match` takes precedence; `If-Modified-Since` is only
    /// consulted when it is absent.
    pub fn evaluate_token(token: CacheValidationToken, conditions: &Conditions) -> CacheDecision {
        let fresh = match (&conditions.if_none_match, conditions.if_modified_since) {
            (Some(tags), _) => tags.matches_weak(&token.etag),
            (None, Some(since)) => token.last_modified <= since,
            (None, None) => false,
        };
        if fresh {
            CacheDecision::NotModified(token)
        } else {
            CacheDecision::Proceed
        }
    }

    /// Evaluate write preconditions against the current token
    ///
    /// `current` is `None` when the resource has no representation.
    pub fn evaluate_write(current: Option<&CacheValidationToken>, conditions: &Conditions) -> CacheDecision {
        if let Some(tags) = &conditions.if_match {
            let holds = current.is_some_and(|token| tags.matches_strong(&token.etag));
            if !holds {
                return CacheDecision::PreconditionFailed;
            }
        } else if let (Some(since), Some(token)) = (conditions.if_unmodified_since, current) {
            if token.last_modified > since {
                return CacheDecision::PreconditionFailed;
            }
        }
        CacheDecision::Proceed
    }

    /// Compute and remember the token of a response body
    ///
    /// An unchanged body keeps the last-modified instant it was first seen
    /// with, unless the handler reported one.
    pub fn issue(
        &self,
        resource_key: &str,
        path: &str,
        body: &[u8],
        last_modified: Option<DateTime<Utc>>,
    ) -> CacheValidationToken {
        let now = self.clock.now();
        let etag = entity_tag(body);
        let previous = self.lookup(resource_key).filter(|t| t.etag == etag);
        let last_modified = last_modified
            .or_else(|| previous.map(|t| t.last_modified))
            .unwrap_or(now)
            .trunc_subsecs(0);

        let token = CacheValidationToken {
            resource_key: resource_key.to_string(),
            path: path.to_string(),
            etag,
            last_modified,
            profile: self.profile_for(path).clone(),
            issued_at: now,
        };
        self.tokens.insert(resource_key.to_string(), token.clone());
        if self.tokens.len() > self.max_tokens {
            self.shrink(now);
        }
        token
    }

    /// Drop expired tokens
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| !token.is_expired(now));
        before.saturating_sub(self.tokens.len())
    }

    /// Sweep, then evict the oldest tokens down to nine tenths of capacity
    fn shrink(&self, now: DateTime<Utc>) {
        let mut removed = self.sweep(now);
        let target = self.max_tokens - self.max_tokens / 10;
        if self.tokens.len() > target {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .tokens
                .iter()
                .map(|entry| (entry.issued_at, entry.key().clone()))
                .collect();
            by_age.sort_unstable();
            let excess = by_age.len().saturating_sub(target);
            for (_, key) in by_age.into_iter().take(excess) {
                if self.tokens.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        tracing::debug!(removed, live = self.tokens.len(), "cache validator map shrunk");
    }

    /// Periodically drop expired tokens
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let validator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = validator.sweep(validator.clock.now());
                if removed > 0 {
                    tracing::debug!(removed, live = validator.len(), "swept expired cache validators");
                }
            }
        })
    }

    /// Forget the tokens of `path`, its ancestors and its descendants
    pub fn invalidate(&self, path: &str) -> usize {
        let path = path.trim_end_matches('/');
        let before = self.tokens.len();
        self.tokens.retain(|_, token| !related(&token.path, path));
        let removed = before.saturating_sub(self.tokens.len());
        if removed > 0 {
            tracing::debug!(path, removed, "cache validators invalidated");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn related(a: &str, b: &str) -> bool {
    let a = a.trim_end_matches('/');
    a == b || is_ancestor(a, b) || is_ancestor(b, a)
}

fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn is_identifier(segment: &str) -> bool {
    Uuid::parse_str(segment).is_ok() || segment.starts_with('(')
}

/// Last path segment that is not an identifier
pub fn resource_class(path: &str) -> Option<&str> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .rev()
        .find(|segment| !is_identifier(segment))
}

/// Path whose validators a successful write to `path` invalidates
///
/// A write to a member also changes the collection listing it (and any
/// sibling view of that collection), so a trailing identifier is dropped.
pub fn write_scope(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some((parent, last)) if is_identifier(last) && !parent.is_empty() => parent,
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::time::Duration;

    fn validator() -> (CacheValidator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let mut profiles = HashMap::new();
        profiles.insert(
            "employees".to_string(),
            CacheProfile {
                max_age_secs: 10,
                location: CacheLocation::Public,
                must_revalidate: false,
            },
        );
        (
            CacheValidator::new(CacheProfile::default(), profiles, clock.clone()),
            clock,
        )
    }

    fn if_none_match(tag: &str) -> Conditions {
        Conditions {
            if_none_match: Some(TagCondition::parse(tag)),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_profile_header() {
        assert_eq!(
            CacheProfile::default().cache_control(),
            "private, max-age=65, must-revalidate"
        );
    }

    #[test]
    fn test_resource_class_skips_ids() {
        let id = Uuid::new_v4();
        assert_eq!(resource_class("/api/companies"), Some("companies"));
        assert_eq!(resource_class(&format!("/api/companies/{id}")), Some("companies"));
        assert_eq!(
            resource_class(&format!("/api/companies/{id}/employees/{id}")),
            Some("employees")
        );
        assert_eq!(resource_class("/api/companies/collection/(a,b)"), Some("collection"));
    }

    #[test]
    fn test_same_validator_twice_is_not_modified() {
        let (validator, _) = validator();
        let token = validator.issue("1.0|/api/companies", "/api/companies", b"[]", None);

        let decision = validator.evaluate("1.0|/api/companies", &if_none_match(&token.etag));
        assert_eq!(decision, CacheDecision::NotModified(token));
    }

    #[test]
    fn test_stale_tag_proceeds() {
        let (validator, _) = validator();
        let old = validator.issue("k", "/api/companies", b"[1]", None);
        validator.issue("k", "/api/companies", b"[1,2]", None);

        assert_eq!(validator.evaluate("k", &if_none_match(&old.etag)), CacheDecision::Proceed);
    }

    #[test]
    fn test_weak_and_wildcard_tags_match_for_reads() {
        let (validator, _) = validator();
        let token = validator.issue("k", "/api/companies", b"body", None);

        let weak = format!("W/{}", token.etag);
        assert!(matches!(
            validator.evaluate("k", &if_none_match(&weak)),
            CacheDecision::NotModified(_)
        ));
        assert!(matches!(
            validator.evaluate("k", &if_none_match("*")),
            CacheDecision::NotModified(_)
        ));
    }

    #[test]
    fn test_if_none_match_takes_precedence_over_date() {
        let (validator, clock) = validator();
        let token = validator.issue("k", "/api/companies", b"body", None);

        let conditions = Conditions {
            if_none_match: Some(TagCondition::parse("\"other\"")),
            if_modified_since: Some(clock.now()),
            ..Default::default()
        };
        assert_eq!(validator.evaluate("k", &conditions), CacheDecision::Proceed);

        let conditions = Conditions {
            if_modified_since: Some(token.last_modified),
            ..Default::default()
        };
        assert!(matches!(
            validator.evaluate("k", &conditions),
            CacheDecision::NotModified(_)
        ));
    }

    #[test]
    fn test_unchanged_body_keeps_last_modified() {
        let (validator, clock) = validator();
        let first = validator.issue("k", "/api/companies", b"body", None);
        clock.advance(Duration::from_secs(30));

        let again = validator.issue("k", "/api/companies", b"body", None);
        assert_eq!(again.last_modified, first.last_modified);

        let changed = validator.issue("k", "/api/companies", b"new body", None);
        assert!(changed.last_modified > first.last_modified);
    }

    #[test]
    fn test_write_preconditions() {
        let (validator, clock) = validator();
        let token = validator.issue("k", "/api/companies/1", b"body", None);

        let if_match = |tag: &str| Conditions {
            if_match: Some(TagCondition::parse(tag)),
            ..Default::default()
        };
        assert_eq!(
            CacheValidator::evaluate_write(Some(&token), &if_match(&token.etag)),
            CacheDecision::Proceed
        );
        assert_eq!(
            CacheValidator::evaluate_write(Some(&token), &if_match("\"stale\"")),
            CacheDecision::PreconditionFailed
        );
        assert_eq!(
            CacheValidator::evaluate_write(None, &if_match("*")),
            CacheDecision::PreconditionFailed
        );

        let unmodified_since = |at| Conditions {
            if_unmodified_since: Some(at),
            ..Default::default()
        };
        let earlier = clock.now() - chrono::Duration::seconds(10);
        assert_eq!(
            CacheValidator::evaluate_write(Some(&token), &unmodified_since(earlier)),
            CacheDecision::PreconditionFailed
        );
        assert_eq!(
            CacheValidator::evaluate_write(Some(&token), &unmodified_since(clock.now())),
            CacheDecision::Proceed
        );
    }

    #[test]
    fn test_invalidation_covers_ancestors_and_descendants() {
        let (validator, _) = validator();
        validator.issue("a", "/api/companies", b"1", None);
        validator.issue("b", "/api/companies/1", b"2", None);
        validator.issue("c", "/api/companies/1/employees", b"3", None);
        validator.issue("d", "/api/companies/2", b"4", None);
        validator.issue("e", "/api/companies10", b"5", None);

        assert_eq!(validator.invalidate("/api/companies/1"), 3);
        assert!(validator.lookup("d").is_some());
        assert!(validator.lookup("e").is_some());
    }

    #[test]
    fn test_write_scope_drops_trailing_identifier() {
        let id = Uuid::new_v4();
        assert_eq!(write_scope(&format!("/api/companies/{id}")), "/api/companies");
        assert_eq!(
            write_scope(&format!("/api/companies/{id}/employees/{id}")),
            format!("/api/companies/{id}/employees")
        );
        assert_eq!(write_scope("/api/companies/"), "/api/companies");
    }

    #[test]
    fn test_profile_lookup_by_resource_class() {
        let (validator, _) = validator();
        let id = Uuid::new_v4();
        assert_eq!(
            validator
                .profile_for(&format!("/api/companies/{id}/employees"))
                .max_age_secs,
            10
        );
        assert_eq!(validator.profile_for("/api/companies").max_age_secs, 65);
    }

    #[test]
    fn test_http_date_round_trip_parses() {
        let at = DateTime::from_timestamp(784_111_777, 0).unwrap();
        assert_eq!(format_http_date(at), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(at));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_sweep_drops_tokens_past_max_age_and_grace() {
        let (validator, clock) = validator();
        let id = Uuid::new_v4();
        validator.issue("companies", "/api/companies", b"[]", None);
        let employees = format!("/api/companies/{id}/employees");
        validator.issue("employees", &employees, b"[]", None);

        // employees: max-age 10 s, companies: 65 s
        clock.advance(Duration::from_secs(10) + EXPIRY_GRACE + Duration::from_secs(1));
        assert_eq!(validator.sweep(clock.now()), 1);
        assert!(validator.lookup("employees").is_none());
        assert!(validator.lookup("companies").is_some());

        clock.advance(Duration::from_secs(60));
        assert_eq!(validator.sweep(clock.now()), 1);
        assert!(validator.is_empty());
    }

    #[test]
    fn test_distinct_query_strings_stay_bounded() {
        let (validator, clock) = validator();
        let validator = validator.with_max_tokens(50);

        for i in 0..1_000 {
            clock.advance(Duration::from_millis(10));
            validator.issue(&format!("1.0|/api/companies?x={i}"), "/api/companies", b"[]", None);
            assert!(validator.len() <= 50);
        }
        // the newest representation survives eviction
        assert!(validator.lookup("1.0|/api/companies?x=999").is_some());
        assert!(validator.lookup("1.0|/api/companies?x=0").is_none());
    }
}
