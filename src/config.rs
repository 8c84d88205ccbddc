//! Top-level configuration, composing every sub-crate's config into the
//! shape a single deployment file describes.

use serde::Deserialize;

fn default_control_socket() -> String {
    sendcore_control::DEFAULT_CONTROL_SOCKET.to_string()
}

fn default_initial_rollout_percent() -> u8 {
    100
}

fn default_health_config() -> sendcore_health::HealthConfig {
    toml::from_str("").expect("HealthConfig fields all carry defaults")
}

fn default_metrics_config() -> sendcore_metrics::MetricsConfig {
    toml::from_str("").expect("MetricsConfig fields all carry defaults")
}

fn default_database_url() -> String {
    "sqlite://sendcore.db?mode=rwc".to_string()
}

/// Durable relational backend the tenant registry, reputation engine,
/// suppression list, and DKIM keystore persist through. Any URL scheme
/// `sea-orm` dispatches on is accepted; sqlite is the zero-config default,
/// postgres is the production target.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Control socket configuration: where it listens and how it authenticates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_socket")]
    pub socket_path: String,
    #[serde(default)]
    pub auth: sendcore_control::ControlAuthConfig,
}

/// Seeds for the DKIM keystore: domains this instance is internal to (and
/// therefore signs outbound mail for without a per-tenant opt-in) plus the
/// set of sender domains considered verified at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DkimSeedConfig {
    #[serde(default)]
    pub internal_domains: Vec<String>,
    #[serde(default)]
    pub verified_domains: Vec<String>,
    #[serde(default)]
    pub keystore: sendcore_dkim::KeystoreConfig,
}

/// The full configuration for a running instance: one SMTP front door, one
/// spool, one delivery processor, and the tenant/policy/control/observability
/// layers wired around them.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub smtp: sendcore_smtp::Server,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub spool: sendcore_store::SpoolConfig,

    #[serde(default)]
    pub delivery: sendcore_scheduler::DeliveryProcessor,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default = "default_health_config")]
    pub health: sendcore_health::HealthConfig,

    #[serde(default = "default_metrics_config")]
    pub metrics: sendcore_metrics::MetricsConfig,

    #[serde(default)]
    pub dkim: DkimSeedConfig,

    #[serde(default)]
    pub tenants: Vec<sendcore_tenant::TenantConfig>,

    #[serde(default)]
    pub rollback: sendcore_rollback::RollbackConfig,

    /// Rollout percent the auto-rollback controller starts at. 100 means
    /// every admission is accepted until the controller first intervenes.
    #[serde(default = "default_initial_rollout_percent")]
    pub initial_rollout_percent: u8,

    /// How often (seconds) the rollback controller samples delivery outcomes
    /// and re-evaluates the trigger table.
    #[serde(default = "default_rollback_eval_interval_secs")]
    pub rollback_eval_interval_secs: u64,
}

fn default_rollback_eval_interval_secs() -> u64 {
    120
}

/// Locates the configuration file: `SENDCORE_CONFIG` env var, then
/// `./sendcore.config.toml`, then `/etc/sendcore/sendcore.config.toml`.
#[must_use]
pub fn find_config_file() -> Option<std::path::PathBuf> {
    if let Ok(path) = std::env::var("SENDCORE_CONFIG") {
        return Some(path.into());
    }
    for candidate in ["./sendcore.config.toml", "/etc/sendcore/sendcore.config.toml"] {
        let path = std::path::PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}
