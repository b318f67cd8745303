//! Header-based API versioning
//!
//! Each API version binds to its own handler (in practice an axum `Router`).
//! The version comes from a request header; when it is missing the lowest
//! registered version answers.

use crate::core::error::UnsupportedVersionError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// `major.minor` API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a version (expected major[.minor])")]
pub struct VersionParseError(pub String);

impl FromStr for ApiVersion {
    type Err = VersionParseError;

    /// Accepts `2`, `2.0` and `v2.0`
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionParseError(raw.to_string());
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix(['v', 'V'])
            .unwrap_or(trimmed);

        let (major, minor) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, "0"),
        };
        let number = |part: &str| {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };

        Ok(Self {
            major: number(major)?,
            minor: number(minor)?,
        })
    }
}

/// Request extension recording the version a request was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVersion(pub ApiVersion);

/// Version bindings, fixed at startup
#[derive(Debug, Clone)]
pub struct VersionRouter<H> {
    bindings: BTreeMap<ApiVersion, H>,
}

impl<H> Default for VersionRouter<H> {
    fn default() -> Self {
        Self {
            bindings: BTreeMap::new(),
        }
    }
}

impl<H> VersionRouter<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `version`, replacing any previous binding
    pub fn register(mut self, version: ApiVersion, handler: H) -> Self {
        self.bindings.insert(version, handler);
        self
    }

    /// Lowest registered version, served when the client names none
    pub fn default_version(&self) -> Option<ApiVersion> {
        self.bindings.keys().next().copied()
    }

    pub fn handler(&self, version: ApiVersion) -> Option<&H> {
        self.bindings.get(&version)
    }

    pub fn supported(&self) -> Vec<String> {
        self.bindings.keys().map(ApiVersion::to_string).collect()
    }

    pub fn bindings(&self) -> impl Iterator<Item = (ApiVersion, &H)> {
        self.bindings.iter().map(|(v, h)| (*v, h))
    }

    /// Select the binding for the requested version header value
    pub fn resolve(&self, requested: Option<&str>) -> Result<(ApiVersion, &H), UnsupportedVersionError> {
        let unsupported = |requested: &str| UnsupportedVersionError {
            requested: requested.to_string(),
            supported: self.supported(),
        };

        let version = match requested.map(str::trim).filter(|r| !r.is_empty()) {
            Some(raw) => raw.parse::<ApiVersion>().map_err(|_| unsupported(raw))?,
            None => self.default_version().ok_or_else(|| unsupported(""))?,
        };

        self.bindings
            .get(&version)
            .map(|handler| (version, handler))
            .ok_or_else(|| unsupported(requested.unwrap_or_default().trim()))
    }
}
