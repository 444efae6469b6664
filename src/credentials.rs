//! API credential bundles and the pool they are drawn from.
//!
//! Bundles are loaded once per process from configuration. Each call to
//! [`CredentialPool::next`] picks a bundle uniformly at random and
//! independently of earlier draws, which spreads per-identity rate-limit
//! consumption without any shared counter.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upstream service a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Twitter / X
    Twitter,
    /// Flickr
    Flickr,
    /// Tumblr
    Tumblr,
    /// Instagram
    Instagram,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Twitter => "twitter",
            Self::Flickr => "flickr",
            Self::Tumblr => "tumblr",
            Self::Instagram => "instagram",
        };
        f.write_str(name)
    }
}

/// One registered application identity.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialBundle {
    /// Name identifying this bundle in logs and snapshots
    pub worker_name: String,
    /// Consumer / API key
    #[serde(default)]
    pub key: String,
    /// Consumer secret
    #[serde(default)]
    pub secret: String,
    /// Access or bearer token
    #[serde(default)]
    pub token: String,
    /// Access token secret
    #[serde(default)]
    pub token_secret: String,
}

impl CredentialBundle {
    /// Creates a bundle with only a worker name and key.
    #[must_use]
    pub fn with_key(worker_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            key: key.into(),
            secret: String::new(),
            token: String::new(),
            token_secret: String::new(),
        }
    }

    /// Sets the access token.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }
}

// Secrets never reach log output.
impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("worker_name", &self.worker_name)
            .field("key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("token", &"<redacted>")
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

/// A fixed, read-only set of credential bundles for one service.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    bundles: Vec<CredentialBundle>,
}

impl CredentialPool {
    /// Creates a pool from bundles.
    #[must_use]
    pub fn new(bundles: Vec<CredentialBundle>) -> Self {
        Self { bundles }
    }

    /// Draws a bundle uniformly at random, or `None` for an empty pool.
    #[must_use]
    pub fn next(&self) -> Option<&CredentialBundle> {
        if self.bundles.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.bundles.len());
        self.bundles.get(index)
    }

    /// Number of bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Worker names, in registration order. Safe to persist.
    #[must_use]
    pub fn worker_names(&self) -> Vec<String> {
        self.bundles.iter().map(|b| b.worker_name.clone()).collect()
    }
}

/// Credential pools keyed by service.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pools: BTreeMap<Service, CredentialPool>,
}

impl Credentials {
    /// Registers the bundles for a service, replacing any existing pool.
    pub fn insert(&mut self, service: Service, bundles: Vec<CredentialBundle>) {
        self.pools.insert(service, CredentialPool::new(bundles));
    }

    /// Returns the pool for a service; empty when none were configured.
    #[must_use]
    pub fn pool(&self, service: Service) -> CredentialPool {
        self.pools.get(&service).cloned().unwrap_or_default()
    }
}
