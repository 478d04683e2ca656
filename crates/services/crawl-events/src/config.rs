use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::{Result, StreamError};

/// Default API origin (local backend)
pub const CRAWL_DEFAULT_BASE: &str = "http://127.0.0.1:8000";
/// Environment variable overriding the API origin
pub const ENV_BASE_URL: &str = "CRAWL_API_BASE";
/// Default header carrying the tenant (team) scope
pub const HDR_TEAM_ID: &str = "x-team-id";

/// Helper to read and normalize an env var (trim + filter empty).
pub(crate) fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Configuration for the streaming client
///
/// Deserializable so it can be embedded in a larger config file; missing
/// fields fall back to [`StreamConfig::default`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    base_url: String,
    tenant_header: String,
    #[serde(deserialize_with = "duration_secs::deserialize")]
    connect_timeout: Duration,
    user_agent: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: env_trimmed(ENV_BASE_URL).unwrap_or_else(|| CRAWL_DEFAULT_BASE.into()),
            tenant_header: HDR_TEAM_ID.into(),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

impl StreamConfig {
    /// Creates a new configuration with default settings
    ///
    /// Reads `CRAWL_API_BASE` for the origin (defaults to `http://127.0.0.1:8000`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin relative resources are resolved against
    #[must_use]
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }

    /// Sets the header name used for the tenant id
    #[must_use]
    pub fn with_tenant_header(mut self, name: impl Into<String>) -> Self {
        self.tenant_header = name.into();
        self
    }

    /// Sets the connect timeout
    ///
    /// Only the connection phase is bounded; an open stream never times out.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets a custom `User-Agent`
    #[must_use]
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Returns the configured origin
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the tenant header name
    #[must_use]
    pub fn tenant_header(&self) -> &str {
        &self.tenant_header
    }

    /// Returns the connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the custom `User-Agent`, if any
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Parses the origin into a base URL.
    ///
    /// The returned URL always ends with `/` so that relative resources are
    /// appended to its path instead of replacing the last segment.
    pub fn base(&self) -> Result<Url> {
        let trimmed = self.base_url.trim();
        let mut base = Url::parse(trimmed)?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(StreamError::Config(format!(
                "base URL must be an http(s) origin, got {trimmed}"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.base()?;
        if self.tenant_header.trim().is_empty() {
            return Err(StreamError::Config("tenant header name is empty".into()));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
