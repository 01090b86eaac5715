pub mod cadence;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

pub use cadence::{ConfigError, ScanCadence};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub rules: RulesConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub statement_logging: bool,
}

/// Transition thresholds. The promotion triggers sit below the fan-out cap
/// so a relink never has to exceed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    pub am_promotion_threshold: usize,
    pub dm_promotion_threshold: usize,
    pub demotion_trigger_threshold: usize,
    pub demotion_recovery_cap: usize,
    pub demotion_grace_days: i64,
    pub fan_out_cap: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            am_promotion_threshold: 10,
            dm_promotion_threshold: 2,
            demotion_trigger_threshold: 2,
            demotion_recovery_cap: 10,
            demotion_grace_days: 15,
            fan_out_cap: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub am_promotion: ScanCadence,
    pub dm_promotion: ScanCadence,
    pub demotion: ScanCadence,
    pub recovery_cancels_demotion: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            am_promotion: ScanCadence::daily(0, 0),
            dm_promotion: ScanCadence::daily(23, 55),
            demotion: ScanCadence::daily(0, 30),
            recovery_cancels_demotion: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_STATEMENT_LOGGING") {
            self.database.statement_logging = v.parse().unwrap_or(self.database.statement_logging);
        }

        // Rule overrides
        if let Ok(v) = env::var("RULES_AM_PROMOTION_THRESHOLD") {
            self.rules.am_promotion_threshold = v.parse().unwrap_or(self.rules.am_promotion_threshold);
        }
        if let Ok(v) = env::var("RULES_DM_PROMOTION_THRESHOLD") {
            self.rules.dm_promotion_threshold = v.parse().unwrap_or(self.rules.dm_promotion_threshold);
        }
        if let Ok(v) = env::var("RULES_DEMOTION_TRIGGER_THRESHOLD") {
            self.rules.demotion_trigger_threshold =
                v.parse().unwrap_or(self.rules.demotion_trigger_threshold);
        }
        if let Ok(v) = env::var("RULES_DEMOTION_RECOVERY_CAP") {
            self.rules.demotion_recovery_cap = v.parse().unwrap_or(self.rules.demotion_recovery_cap);
        }
        if let Ok(v) = env::var("RULES_DEMOTION_GRACE_DAYS") {
            self.rules.demotion_grace_days = v.parse().unwrap_or(self.rules.demotion_grace_days);
        }
        if let Ok(v) = env::var("RULES_FAN_OUT_CAP") {
            self.rules.fan_out_cap = v.parse().unwrap_or(self.rules.fan_out_cap);
        }

        // Scheduler overrides
        override_cadence("SCHEDULER_AM_PROMOTION", &mut self.scheduler.am_promotion);
        override_cadence("SCHEDULER_DM_PROMOTION", &mut self.scheduler.dm_promotion);
        override_cadence("SCHEDULER_DEMOTION", &mut self.scheduler.demotion);
        if let Ok(v) = env::var("SCHEDULER_RECOVERY_CANCELS_DEMOTION") {
            self.scheduler.recovery_cancels_demotion =
                v.parse().unwrap_or(self.scheduler.recovery_cancels_demotion);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 5,
                connection_timeout: 30,
                statement_logging: true,
            },
            rules: RulesConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 10,
                statement_logging: true,
            },
            rules: RulesConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 5,
                statement_logging: false,
            },
            rules: RulesConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn override_cadence(var: &str, slot: &mut ScanCadence) {
    if let Ok(v) = env::var(var) {
        match v.parse() {
            Ok(cadence) => *slot = cadence,
            Err(err) => warn!("Ignoring {}: {}", var, err),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.database.statement_logging);
        assert_eq!(config.rules, RulesConfig::default());
        assert_eq!(config.scheduler.dm_promotion, ScanCadence::daily(23, 55));
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.database.statement_logging);
        assert_eq!(config.rules.am_promotion_threshold, 10);
        assert_eq!(config.rules.dm_promotion_threshold, 2);
        assert_eq!(config.rules.demotion_grace_days, 15);
        assert!(config.scheduler.recovery_cancels_demotion);
    }

    #[test]
    fn test_cadence_override_ignores_garbage() {
        let mut cadence = ScanCadence::daily(0, 30);
        env::set_var("TEST_CONFIG_CADENCE_GARBAGE", "sometimes");
        override_cadence("TEST_CONFIG_CADENCE_GARBAGE", &mut cadence);
        assert_eq!(cadence, ScanCadence::daily(0, 30));

        env::set_var("TEST_CONFIG_CADENCE_VALID", "every@300");
        override_cadence("TEST_CONFIG_CADENCE_VALID", &mut cadence);
        assert_eq!(cadence, ScanCadence::Every(300));
    }
}
