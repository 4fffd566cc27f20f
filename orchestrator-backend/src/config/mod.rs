//! Configuration management module for the orchestrator backend.
//!
//! This module provides centralized configuration management with support for:
//! - CLI argument parsing
//! - Environment-driven log filtering
//! - Configuration validation
//! - Builder pattern for configuration construction

pub mod app_config;
pub mod cli;
pub mod pool_config;
pub mod zenoh_config;

pub use app_config::{AppConfig, AppConfigBuilder, LogLevel, StorageBackend};
pub use cli::CliConfig;
pub use pool_config::{AdmissionPolicy, ExecutionMode, PoolConfig, RecoveryPolicy};
pub use zenoh_config::ZenohConfigManager;

use anyhow::Result;
use orchestrator_shared::ZenohConfig;

/// Main configuration manager that combines all configuration sources
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub app: AppConfig,
    pub pool: PoolConfig,
    pub zenoh: ZenohConfig,
}

impl ConfigManager {
    /// Creates a new configuration manager from CLI arguments and environment
    pub fn from_cli_and_env() -> Result<Self> {
        let cli_config = CliConfig::from_args()?;
        Self::from_cli(&cli_config)
    }

    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        cli_config.validate()?;

        Ok(Self {
            app: AppConfig::from_cli(cli_config)?,
            pool: PoolConfig::from_cli(cli_config)?,
            zenoh: ZenohConfigManager::from_cli(cli_config)?,
        })
    }

    /// Validates the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;
        self.pool.validate()?;
        self.zenoh
            .validate()
            .map_err(|e| anyhow::anyhow!("Zenoh configuration error: {}", e))?;
        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        self.app.init_logging()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_manager_validation() {
        let config_manager = ConfigManager::from_cli(&CliConfig::default()).unwrap();
        assert!(config_manager.validate().is_ok());
        assert_eq!(config_manager.pool, PoolConfig::default());
    }

    #[test]
    fn test_config_manager_from_matches() {
        let matches = CliConfig::build_cli()
            .try_get_matches_from([
                "orchestrator-backend",
                "--max-concurrency",
                "2",
                "--admission-policy",
                "reject",
                "--shutdown-timeout",
                "1500ms",
                "--scenario-timeout",
                "2m",
            ])
            .unwrap();
        let cli_config = CliConfig::from_matches(&matches).unwrap();

        let config_manager = ConfigManager::from_cli(&cli_config).unwrap();
        assert_eq!(config_manager.pool.max_concurrency, 2);
        assert_eq!(config_manager.pool.admission_policy, AdmissionPolicy::Reject);
        assert_eq!(config_manager.pool.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(
            config_manager.pool.scenario_timeout,
            Some(Duration::from_secs(120))
        );
        assert!(config_manager.validate().is_ok());
    }

    #[test]
    fn test_config_manager_rejects_bad_durations() {
        let cli_config = CliConfig {
            shutdown_timeout: "soon".to_string(),
            ..CliConfig::default()
        };
        assert!(ConfigManager::from_cli(&cli_config).is_err());
    }

    #[test]
    fn test_config_manager_rejects_zero_concurrency() {
        let cli_config = CliConfig {
            max_concurrency: 0,
            ..CliConfig::default()
        };
        let config_manager = ConfigManager::from_cli(&cli_config).unwrap();
        assert!(config_manager.validate().is_err());
    }
}
