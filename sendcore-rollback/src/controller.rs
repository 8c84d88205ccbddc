//! Periodic health evaluation and cohort rollout gating.
//!
//! # Trigger Evaluation
//!
//! Triggers are evaluated critical-first; the first one that fires wins and
//! no further triggers are checked for that call:
//!
//! ```text
//! success rate < 90%                       -> critical -> rollout = 0
//! p50 latency > 5000 ms                    -> critical -> rollout = 0
//! errors_v2 > 3 x errors_baseline           -> critical -> rollout = 0
//! simultaneous critical errors > 5          -> critical -> rollout = 0
//! success rate < 95%                       -> warning  -> rollout halved (floor 5, then 0)
//! p50 latency > 2000 ms                    -> warning  -> rollout halved
//! error trend rising AND errors > 10       -> warning  -> rollout halved
//! ```
//!
//! The controller never reads the in-flight delivery path; it only writes
//! `rollout_percent`, which `sendcore-tenant`'s admission pipeline may
//! consult when gating a rolled-out cohort.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const AUDIT_LOG_CAPACITY: usize = 50;

/// Thresholds for the periodic health check. Defaults match the standard
/// trigger table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    #[serde(default = "default_critical_success_rate")]
    pub critical_success_rate: f64,
    #[serde(default = "default_critical_p50_latency_ms")]
    pub critical_p50_latency_ms: f64,
    #[serde(default = "default_error_ratio_multiplier")]
    pub error_ratio_multiplier: f64,
    #[serde(default = "default_max_simultaneous_critical_errors")]
    pub max_simultaneous_critical_errors: u64,
    #[serde(default = "default_warning_success_rate")]
    pub warning_success_rate: f64,
    #[serde(default = "default_warning_p50_latency_ms")]
    pub warning_p50_latency_ms: f64,
    #[serde(default = "default_warning_error_count")]
    pub warning_error_count: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            critical_success_rate: default_critical_success_rate(),
            critical_p50_latency_ms: default_critical_p50_latency_ms(),
            error_ratio_multiplier: default_error_ratio_multiplier(),
            max_simultaneous_critical_errors: default_max_simultaneous_critical_errors(),
            warning_success_rate: default_warning_success_rate(),
            warning_p50_latency_ms: default_warning_p50_latency_ms(),
            warning_error_count: default_warning_error_count(),
        }
    }
}

const fn default_critical_success_rate() -> f64 {
    0.90
}
const fn default_critical_p50_latency_ms() -> f64 {
    5000.0
}
const fn default_error_ratio_multiplier() -> f64 {
    3.0
}
const fn default_max_simultaneous_critical_errors() -> u64 {
    5
}
const fn default_warning_success_rate() -> f64 {
    0.95
}
const fn default_warning_p50_latency_ms() -> f64 {
    2000.0
}
const fn default_warning_error_count() -> u64 {
    10
}

/// Outcome metrics fed in from the 2-minute sampling window (or the
/// 10-minute aggregate window; the same evaluation applies to both).
#[derive(Debug, Clone, Copy)]
pub struct HealthMetrics {
    pub success_rate: f64,
    pub p50_latency_ms: f64,
    pub errors_v2: u64,
    pub errors_baseline: u64,
    pub simultaneous_critical_errors: u64,
    pub error_trend_rising: bool,
    pub errors: u64,
}

/// Severity of a fired trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Warning,
}

/// One entry in the bounded audit ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: i64,
    pub prior_rollout_percent: u8,
    pub new_rollout_percent: u8,
    pub trigger: Option<&'static str>,
    pub severity: Option<Severity>,
}

#[derive(Debug)]
struct ControllerState {
    rollout_percent: u8,
    audit_log: VecDeque<AuditEntry>,
}

impl ControllerState {
    fn push_audit(&mut self, entry: AuditEntry) {
        if self.audit_log.len() == AUDIT_LOG_CAPACITY {
            self.audit_log.pop_front();
        }
        self.audit_log.push_back(entry);
    }
}

/// Finds the first fired trigger, critical triggers checked before warning
/// ones, and returns its severity, name, and the rollout percent it demands.
fn fire_trigger(
    config: &RollbackConfig,
    metrics: &HealthMetrics,
    current_rollout: u8,
) -> Option<(Severity, &'static str, u8)> {
    if metrics.success_rate < config.critical_success_rate {
        return Some((Severity::Critical, "success rate below critical floor", 0));
    }
    if metrics.p50_latency_ms > config.critical_p50_latency_ms {
        return Some((Severity::Critical, "p50 latency above critical ceiling", 0));
    }
    if metrics.errors_baseline > 0
        && metrics.errors_v2 as f64 > config.error_ratio_multiplier * metrics.errors_baseline as f64
    {
        return Some((Severity::Critical, "errors_v2 exceeds baseline ratio", 0));
    }
    if metrics.simultaneous_critical_errors > config.max_simultaneous_critical_errors {
        return Some((
            Severity::Critical,
            "too many simultaneous critical errors",
            0,
        ));
    }

    if metrics.success_rate < config.warning_success_rate {
        return Some((
            Severity::Warning,
            "success rate below warning floor",
            halve(current_rollout),
        ));
    }
    if metrics.p50_latency_ms > config.warning_p50_latency_ms {
        return Some((
            Severity::Warning,
            "p50 latency above warning ceiling",
            halve(current_rollout),
        ));
    }
    if metrics.error_trend_rising && metrics.errors > config.warning_error_count {
        return Some((
            Severity::Warning,
            "error trend rising past warning threshold",
            halve(current_rollout),
        ));
    }

    None
}

/// Halves a rollout percent with a floor at 5; a halving triggered at or
/// below the floor drops straight to 0.
fn halve(current: u8) -> u8 {
    if current == 0 {
        0
    } else if current <= 5 {
        0
    } else {
        (current / 2).max(5)
    }
}

/// Evaluates outcome metrics against the trigger table and, atomically,
/// records both the prior and new rollout state in the audit log.
///
/// A single mutex-guarded state transitioned by one `record_*`-shaped entry
/// point, with every transition logged via `tracing`.
#[derive(Debug)]
pub struct RollbackController {
    config: RollbackConfig,
    state: Mutex<ControllerState>,
}

impl RollbackController {
    #[must_use]
    pub fn new(config: RollbackConfig, initial_rollout_percent: u8) -> Self {
        Self {
            config,
            state: Mutex::new(ControllerState {
                rollout_percent: initial_rollout_percent,
                audit_log: VecDeque::with_capacity(AUDIT_LOG_CAPACITY),
            }),
        }
    }

    /// Current rollout percent. Admission consults this when gating the
    /// rolled-out cohort; the controller itself never reads admission state.
    #[must_use]
    pub fn rollout_percent(&self) -> u8 {
        self.state.lock().rollout_percent
    }

    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.state.lock().audit_log.iter().cloned().collect()
    }

    /// Runs one evaluation pass. Returns the fired trigger, if any.
    pub fn evaluate(&self, metrics: &HealthMetrics, now: i64) -> Option<(Severity, &'static str)> {
        let mut state = self.state.lock();
        let prior = state.rollout_percent;

        let Some((severity, trigger, new_percent)) = fire_trigger(&self.config, metrics, prior)
        else {
            return None;
        };

        state.rollout_percent = new_percent;
        state.push_audit(AuditEntry {
            timestamp: now,
            prior_rollout_percent: prior,
            new_rollout_percent: new_percent,
            trigger: Some(trigger),
            severity: Some(severity),
        });

        match severity {
            Severity::Critical => {
                tracing::warn!(trigger, prior, new_percent, "rollback controller: full rollback");
            }
            Severity::Warning => {
                tracing::info!(trigger, prior, new_percent, "rollback controller: rollout halved");
            }
        }

        Some((severity, trigger))
    }
}
