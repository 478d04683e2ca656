//! Credentials attached to a stream request.
//!
//! Credentials are captured once into a [`CredentialSnapshot`] before a
//! subscription starts. A running subscription never refreshes them.

use secrecy::{ExposeSecret, SecretString};

use crate::config::env_trimmed;
use crate::error::{Result, StreamError};

/// Environment variable holding the bearer token
pub const ENV_TOKEN: &str = "CRAWL_API_TOKEN";
/// Environment variable holding the tenant (team) id
pub const ENV_TEAM_ID: &str = "CRAWL_TEAM_ID";

/// Source of the session credentials.
///
/// Implement this for whatever holds the caller's session (a login store, a
/// keychain, a config file).
pub trait CredentialProvider: Send + Sync {
    /// Returns the bearer token, if a session is active.
    fn token(&self) -> Option<String>;

    /// Returns the current tenant id, if one is selected.
    fn tenant_id(&self) -> Option<String>;
}

/// Token and tenant captured at subscribe time.
///
/// `Debug` redacts the token.
#[derive(Clone, Debug)]
pub struct CredentialSnapshot {
    token: SecretString,
    tenant_id: Option<String>,
}

impl CredentialSnapshot {
    /// Creates a snapshot from explicit values.
    ///
    /// Fails if the token is empty or whitespace-only. An empty tenant id is
    /// treated as absent.
    pub fn new(token: impl Into<String>, tenant_id: Option<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(StreamError::MissingCredential("bearer token"));
        }
        Ok(Self {
            token: SecretString::from(token),
            tenant_id: tenant_id
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    /// Reads the provider once and freezes the result.
    pub fn capture(provider: &dyn CredentialProvider) -> Result<Self> {
        let token = provider
            .token()
            .ok_or(StreamError::MissingCredential("bearer token"))?;
        Self::new(token, provider.tenant_id())
    }

    /// Returns the bearer token.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Returns the tenant id, if any.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// Fixed credentials, handy for services and tests.
#[derive(Clone, Debug)]
pub struct StaticCredentials {
    token: SecretString,
    tenant_id: Option<String>,
}

impl StaticCredentials {
    /// Creates a provider returning `token` and no tenant.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            tenant_id: None,
        }
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        Some(self.token.expose_secret().to_string())
    }

    fn tenant_id(&self) -> Option<String> {
        self.tenant_id.clone()
    }
}

/// Reads `CRAWL_API_TOKEN` and `CRAWL_TEAM_ID` on every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn token(&self) -> Option<String> {
        env_trimmed(ENV_TOKEN)
    }

    fn tenant_id(&self) -> Option<String> {
        env_trimmed(ENV_TEAM_ID)
    }
}
