//! Worker pool configuration.

use anyhow::Result;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use orchestrator_shared::script::parse_duration;

use super::cli::CliConfig;

/// What `submit` does when every slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Wait for a slot to free up
    #[default]
    Block,
    /// Fail fast with `PoolSaturated`
    Reject,
}

/// When `submit` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Right after admission
    #[default]
    Async,
    /// After the worker recorded its final status
    Sync,
}

/// Start-up handling of records left `running` by a previous process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    #[default]
    Fail,
    Ignore,
}

macro_rules! keyword_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(anyhow::anyhow!(
                        "Invalid {} '{}'. Expected one of: {}",
                        stringify!($ty),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($ty::$variant => f.write_str($text),)+
                }
            }
        }
    };
}

keyword_enum!(AdmissionPolicy { Block => "block", Reject => "reject" });
keyword_enum!(ExecutionMode { Async => "async", Sync => "sync" });
keyword_enum!(RecoveryPolicy { Fail => "fail", Ignore => "ignore" });

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    pub admission_policy: AdmissionPolicy,
    pub mode: ExecutionMode,
    /// How long `shutdown` waits before cancelling in-flight scenarios
    pub shutdown_timeout: Duration,
    /// Per-scenario execution limit, none by default
    pub scenario_timeout: Option<Duration>,
    pub recover_stuck: RecoveryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            admission_policy: AdmissionPolicy::Block,
            mode: ExecutionMode::Async,
            shutdown_timeout: Duration::from_secs(30),
            scenario_timeout: None,
            recover_stuck: RecoveryPolicy::Fail,
        }
    }
}

impl PoolConfig {
    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        let shutdown_timeout =
            parse_duration(&cli_config.shutdown_timeout).map_err(|e| anyhow::anyhow!(e))?;

        let scenario_timeout = cli_config
            .scenario_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?;

        let config = Self {
            max_concurrency: cli_config.max_concurrency,
            admission_policy: cli_config.admission_policy.parse()?,
            mode: cli_config.mode.parse()?,
            shutdown_timeout,
            scenario_timeout,
            recover_stuck: cli_config.recover_stuck.parse()?,
        };
        Ok(config)
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission_policy = policy;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_scenario_timeout(mut self, timeout: Duration) -> Self {
        self.scenario_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(anyhow::anyhow!("max_concurrency must be greater than 0"));
        }

        if self.max_concurrency > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(anyhow::anyhow!(
                "max_concurrency cannot exceed {}",
                tokio::sync::Semaphore::MAX_PERMITS
            ));
        }

        if self.scenario_timeout == Some(Duration::ZERO) {
            return Err(anyhow::anyhow!("scenario_timeout must be greater than 0"));
        }

        Ok(())
    }
}
