//! Per-domain delivery configuration
//!
//! Allows customizing delivery behavior for specific recipient domains:
//! - MX server override for testing
//! - TLS requirements for compliance
//! - Connection limits for performance tuning
//! - Rate limiting to avoid blacklisting

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Configuration for a specific domain
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainConfig {
    /// Override MX server lookup with a specific host:port
    ///
    /// Use for testing to route messages to a local SMTP server:
    /// ```ron
    /// domains: {
    ///     "test.example.com": (
    ///         mx_override: "localhost:1025",
    ///     ),
    /// }
    /// ```
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mx_override: Option<String>,

    /// Require TLS for delivery to this domain
    ///
    /// Delivery will fail if TLS cannot be negotiated.
    #[serde(default)]
    pub require_tls: bool,

    /// Maximum concurrent connections to this domain
    ///
    /// Prevents overwhelming recipient servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Rate limit (messages per minute) for this domain
    ///
    /// Prevents being flagged as spam or hitting recipient quotas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Per-domain override for accepting invalid TLS certificates
    ///
    /// Falls back to the processor's global `accept_invalid_certs` setting
    /// when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_invalid_certs: Option<bool>,
}

impl DomainConfig {
    /// Check if this domain has an MX override configured
    #[must_use]
    pub const fn has_mx_override(&self) -> bool {
        self.mx_override.is_some()
    }

    /// Get the MX override server address if configured
    #[must_use]
    pub fn mx_override_address(&self) -> Option<&str> {
        self.mx_override.as_deref()
    }
}

/// Global smart-host override: when configured, every outbound delivery
/// with no per-domain [`DomainConfig::mx_override`] connects here instead of
/// resolving the recipient domain's MX records, optionally authenticating
/// with AUTH PLAIN/LOGIN first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartHostConfig {
    /// `host:port` of the relay. Port defaults to 25 if omitted.
    pub address: String,

    /// AUTH PLAIN/LOGIN credentials, if the relay requires authentication.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Which AUTH mechanism to use when credentials are set.
    #[serde(default)]
    pub auth_mechanism: SmartHostAuthMechanism,
}

/// AUTH mechanism to speak to a configured smart-host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmartHostAuthMechanism {
    #[default]
    Plain,
    Login,
}

impl SmartHostConfig {
    /// Splits `address` into `(host, port)`, defaulting the port to 25.
    #[must_use]
    pub fn host_port(&self) -> (String, u16) {
        self.address.split_once(':').map_or_else(
            || (self.address.clone(), 25),
            |(h, p)| (h.to_string(), p.parse().unwrap_or(25)),
        )
    }

    /// `Some((username, password))` when this relay is configured to
    /// authenticate.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

/// Registry of per-domain configurations
///
/// Backed by a `parking_lot::RwLock` so the control socket's
/// `DnsCommand::SetOverride`/`RemoveOverride` can mutate it through a
/// shared `Arc<DeliveryProcessor>` without a restart.
#[derive(Debug, Default)]
pub struct DomainConfigRegistry {
    domains: RwLock<HashMap<String, DomainConfig>>,
}

impl Clone for DomainConfigRegistry {
    fn clone(&self) -> Self {
        Self {
            domains: RwLock::new(self.domains.read().clone()),
        }
    }
}

impl Serialize for DomainConfigRegistry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.domains.read().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DomainConfigRegistry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self {
            domains: RwLock::new(HashMap::deserialize(deserializer)?),
        })
    }
}

impl DomainConfigRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
        }
    }

    /// Get a clone of the configuration for a specific domain
    ///
    /// Returns `None` if no configuration exists, in which case default behavior applies.
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<DomainConfig> {
        self.domains.read().get(domain).cloned()
    }

    /// Add or update configuration for a domain
    pub fn insert(&self, domain: String, config: DomainConfig) {
        self.domains.write().insert(domain, config);
    }

    /// Remove configuration for a domain, returning it if it existed
    pub fn remove(&self, domain: &str) -> Option<DomainConfig> {
        self.domains.write().remove(domain)
    }

    /// Set (or replace) just the MX override for a domain, preserving any
    /// other configuration already present.
    pub fn set_mx_override(&self, domain: String, mx_server: String) {
        self.domains.write().entry(domain).or_default().mx_override = Some(mx_server);
    }

    /// Clear the MX override for a domain, leaving other configuration intact.
    ///
    /// Returns `true` if an override was present and removed.
    pub fn clear_mx_override(&self, domain: &str) -> bool {
        self.domains
            .write()
            .get_mut(domain)
            .is_some_and(|config| config.mx_override.take().is_some())
    }

    /// Snapshot of all domains that currently have an MX override configured,
    /// as `(domain, mx_server)` pairs.
    #[must_use]
    pub fn mx_overrides(&self) -> Vec<(String, String)> {
        self.domains
            .read()
            .iter()
            .filter_map(|(domain, config)| {
                config
                    .mx_override
                    .as_ref()
                    .map(|mx| (domain.clone(), mx.clone()))
            })
            .collect()
    }

    /// Check if a domain has any custom configuration
    #[must_use]
    pub fn has_config(&self, domain: &str) -> bool {
        self.domains.read().contains_key(domain)
    }

    /// Get the number of configured domains
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.read().is_empty()
    }
}
