//! Configuration loading and management
//!
//! The service reads one YAML document. Every section and every field has a
//! default, so an empty file is a valid configuration:
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 8080
//! storage:
//!   deadline_ms: 2000
//! rate_limiting:
//!   client_id_header: x-client-id   # set by the gateway in front
//!   general_rules:
//!     - endpoint: "*"
//!       limit: 100
//!       period: 5m
//!   client_rules:
//!     - client_id: reporting
//!       rules:
//!         - { endpoint: "get:/api/companies", limit: 10, period: 1m, window: rolling }
//!   exempt_clients: [internal]
//!   contention: fail_open
//! caching:
//!   default_profile: { max_age_secs: 65, location: private, must_revalidate: true }
//!   profiles:
//!     employees: { max_age_secs: 30 }
//! versioning:
//!   header: api-version
//! ```

use crate::core::error::ConfigError;
use crate::core::headers::DEFAULT_VERSION_HEADER;
use crate::governance::cache::{CacheProfile, DEFAULT_MAX_TOKENS};
use crate::governance::rate_limit::{
    ClientKeyResolver, ClientRateLimitPolicy, ContentionPolicy, PolicySnapshot, RateLimitRule,
};
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Complete configuration of the service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub rate_limiting: RateLimitingConfig,
    pub caching: CachingConfig,
    pub versioning: VersioningConfig,
}

/// Listening address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Deadline of every store call, in milliseconds
    pub deadline_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { deadline_ms: 5_000 }
    }
}

impl StorageConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    /// Header naming the client. Unset keys clients by address only; set
    /// it only when a gateway in front of the service owns the header.
    pub client_id_header: Option<String>,
    /// Key clients by `X-Forwarded-For` / `X-Real-IP` (behind a trusted proxy)
    pub trust_forwarded_headers: bool,
    pub general_rules: Vec<RateLimitRule>,
    pub client_rules: Vec<ClientRateLimitPolicy>,
    pub exempt_clients: Vec<String>,
    pub contention: ContentionPolicy,
    /// Attempts on a locked counter shard before `contention` applies
    pub counter_retries: u32,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id_header: None,
            trust_forwarded_headers: false,
            general_rules: vec![RateLimitRule::new("*", 100, "5m")],
            client_rules: Vec::new(),
            exempt_clients: Vec::new(),
            contention: ContentionPolicy::FailOpen,
            counter_retries: 64,
            sweep_interval_secs: 60,
        }
    }
}

impl RateLimitingConfig {
    /// Compile the configured rules
    pub fn policy_snapshot(&self) -> Result<PolicySnapshot, ConfigError> {
        PolicySnapshot::compile(&self.general_rules, &self.client_rules, &self.exempt_clients).map_err(|e| {
            ConfigError::InvalidValue {
                field: "rate_limiting".to_string(),
                value: e.to_string(),
                message: "rate-limit rules do not compile".to_string(),
            }
        })
    }

    pub fn client_id_header(&self) -> Result<Option<HeaderName>, ConfigError> {
        self.client_id_header
            .as_deref()
            .map(|name| header_name("rate_limiting.client_id_header", name))
            .transpose()
    }

    /// Resolver of the key each request is counted against
    pub fn client_keys(&self) -> Result<ClientKeyResolver, ConfigError> {
        let mut resolver = ClientKeyResolver::new().trust_forwarded_headers(self.trust_forwarded_headers);
        if let Some(name) = self.client_id_header()? {
            resolver = resolver.with_client_id_header(name);
        }
        Ok(resolver)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    pub enabled: bool,
    pub default_profile: CacheProfile,
    /// Profiles keyed by resource class (`companies`, `employees`, ...)
    pub profiles: HashMap<String, CacheProfile>,
    /// Bound of the remembered validator tokens
    pub max_tokens: usize,
    pub sweep_interval_secs: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_profile: CacheProfile::default(),
            profiles: HashMap::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            sweep_interval_secs: 60,
        }
    }
}

impl CachingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Request header carrying the API version
    pub header: String,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_VERSION_HEADER.to_string(),
        }
    }
}

impl VersioningConfig {
    pub fn header_name(&self) -> Result<HeaderName, ConfigError> {
        header_name("versioning.header", &self.header)
    }
}

fn header_name(field: &str, value: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::try_from(value.trim().to_ascii_lowercase()).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => ConfigError::IoError {
                message: e.to_string(),
            },
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            file: Some(path.display().to_string()),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            file: None,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.deadline_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.deadline_ms".to_string(),
                value: "0".to_string(),
                message: "store calls need a positive deadline".to_string(),
            });
        }
        self.rate_limiting.policy_snapshot()?;
        self.rate_limiting.client_id_header()?;
        self.versioning.header_name()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::cache::CacheLocation;
    use crate::governance::rate_limit::WindowKind;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.rate_limiting.general_rules, vec![RateLimitRule::new("*", 100, "5m")]);
        assert_eq!(config.caching.default_profile.max_age_secs, 65);
        assert_eq!(config.caching.default_profile.location, CacheLocation::Private);
        assert!(config.caching.default_profile.must_revalidate);
        assert_eq!(config.versioning.header, "api-version");
        assert_eq!(config.storage.deadline(), Duration::from_secs(5));
        assert_eq!(config.rate_limiting.client_id_header, None);
        assert!(!config.rate_limiting.trust_forwarded_headers);
    }

    #[test]
    fn test_client_keys_ignore_headers_by_default() {
        use axum::http::{HeaderMap, HeaderValue};

        let mut headers = HeaderMap::new();
        headers.insert("x-client-id", HeaderValue::from_static("internal"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));

        let keys = AppConfig::default().rate_limiting.client_keys().unwrap();
        assert_eq!(keys.resolve(&headers, None), "anonymous");

        let config = AppConfig::from_yaml_str(
            "rate_limiting:\n  client_id_header: X-Client-Id\n  trust_forwarded_headers: true\n",
        )
        .unwrap();
        let keys = config.rate_limiting.client_keys().unwrap();
        assert_eq!(keys.resolve(&headers, None), "internal");
        headers.remove("x-client-id");
        assert_eq!(keys.resolve(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = AppConfig::from_yaml_str(
            r#"
server:
  port: 8080
rate_limiting:
  contention: fail_closed
  general_rules:
    - endpoint: "get:/api/companies"
      limit: 10
      period: 1m
      window: rolling
caching:
  profiles:
    employees:
      max_age_secs: 30
"#,
        )
        .unwrap();

        assert_eq!(config.server.address(), "127.0.0.1:8080");
        assert_eq!(config.rate_limiting.contention, ContentionPolicy::FailClosed);
        assert_eq!(config.rate_limiting.general_rules[0].window, WindowKind::Rolling);
        assert!(config.rate_limiting.enabled);
        let employees = &config.caching.profiles["employees"];
        assert_eq!(employees.max_age_secs, 30);
        assert!(employees.must_revalidate);
    }

    #[test]
    fn test_invalid_rule_is_rejected() {
        let err = AppConfig::from_yaml_str(
            "rate_limiting:\n  general_rules:\n    - { endpoint: '*', limit: 5, period: forever }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let err = AppConfig::from_yaml_str("versioning:\n  header: 'not a header'\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "versioning.header"));
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        let err = AppConfig::from_yaml_str("server: [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { file: None, .. }));
    }

    #[test]
    fn test_yaml_serialization() {
        let config = AppConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(AppConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
