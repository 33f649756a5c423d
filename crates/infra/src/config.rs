//! Kernel configuration: plain numeric policy data, injected at construction.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! `POLITY_DATABASE_URL` overrides `store.database_url` when set.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use polity_analytics::Thresholds;
use polity_budget::{FlexClass, StepSizePolicy};
use polity_delegation::DelegationPolicy;

pub const DATABASE_URL_ENV: &str = "POLITY_DATABASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub delegation: DelegationConfig,

    #[serde(default)]
    pub concentration: ConcentrationConfig,

    #[serde(default)]
    pub tick: TickConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl KernelConfig {
    /// Load configuration from a JSON file, then apply env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.store.apply_env_overrides();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds()?;

        if self.delegation.max_ttl_days <= 0 {
            return Err(ConfigError::Invalid(format!(
                "delegation.max_ttl_days must be positive (got {})",
                self.delegation.max_ttl_days
            )));
        }
        for (class, ceiling) in &self.budget.step_size {
            if *ceiling <= Decimal::ZERO || *ceiling > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "budget.step_size.{} must be in (0, 1] (got {ceiling})",
                    class.as_str()
                )));
            }
        }
        if self.tick.interval_secs == 0 {
            return Err(ConfigError::Invalid("tick.interval_secs must be positive".to_string()));
        }
        if let Some(escalation) = &self.concentration.escalation {
            if escalation.code.trim().is_empty() {
                return Err(ConfigError::Invalid("concentration.escalation.code cannot be empty".to_string()));
            }
        }
        if self.store.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("store.database_url cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Thresholds::new(self.concentration.warn_gini, self.concentration.halt_gini)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn step_size_policy(&self) -> StepSizePolicy {
        StepSizePolicy::new(self.budget.step_size.clone())
    }

    pub fn delegation_policy(&self) -> DelegationPolicy {
        DelegationPolicy::with_max_ttl_days(self.delegation.max_ttl_days)
    }

    pub fn escalation_code(&self) -> Option<&str> {
        self.concentration.escalation.as_ref().map(|e| e.code.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Ceiling on `|change| / current_amount` per flex class.
    #[serde(default = "default_step_size")]
    pub step_size: BTreeMap<FlexClass, Decimal>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            step_size: default_step_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationConfig {
    #[serde(default = "default_max_ttl_days")]
    pub max_ttl_days: i64,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_ttl_days: default_max_ttl_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationConfig {
    #[serde(default = "default_warn_gini")]
    pub warn_gini: f64,

    #[serde(default = "default_halt_gini")]
    pub halt_gini: f64,

    /// Raised alongside every halt when set.
    #[serde(default)]
    pub escalation: Option<EscalationConfig>,
}

impl Default for ConcentrationConfig {
    fn default() -> Self {
        Self {
            warn_gini: default_warn_gini(),
            halt_gini: default_halt_gini(),
            escalation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub interval_secs: u64,
}

impl TickConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_tick_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl StoreConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(DATABASE_URL_ENV) {
            self.database_url = val;
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

fn default_step_size() -> BTreeMap<FlexClass, Decimal> {
    StepSizePolicy::default().ceilings().clone()
}

fn default_max_ttl_days() -> i64 {
    365
}

fn default_warn_gini() -> f64 {
    0.5
}

fn default_halt_gini() -> f64 {
    0.7
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_database_url() -> String {
    "sqlite://polity.db".to_string()
}
