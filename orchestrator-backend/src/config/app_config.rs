//! Application configuration management for the orchestrator backend.
//!
//! This module handles application-specific configuration: logging, bus
//! topics, the control surface address and the record storage backend.

use anyhow::Result;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use orchestrator_shared::topics;
use orchestrator_shared::{DEFAULT_DEAD_LETTER_TOPIC, DEFAULT_EVENT_TOPIC, DEFAULT_REQUEST_TOPIC};

use super::cli::CliConfig;

/// Crates whose debug output drowns the orchestrator's own logs
const NOISY_CRATES: &str = "zenoh_transport=warn,zenoh_runtime=warn,zenoh_protocol=warn";

/// Log level enumeration
#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Where scenario records are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Zenoh,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zenoh" => Ok(StorageBackend::Zenoh),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!(
                "Invalid storage backend '{}'. Must be 'zenoh' or 'memory'",
                other
            )),
        }
    }
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub instance_name: String,
    pub log_level: LogLevel,
    /// Raw `RUST_LOG` directives, preferred over `log_level` when set
    pub log_directives: Option<String>,
    pub request_topic: String,
    pub event_topic: String,
    pub dead_letter_topic: String,
    pub http_addr: SocketAddr,
    pub storage: StorageBackend,
    pub dispatch_retry_attempts: u32,
}

impl AppConfig {
    /// Create application configuration from CLI config
    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        let rust_log = env::var("RUST_LOG").ok().filter(|s| !s.is_empty());

        let log_level = if cli_config.verbose {
            LogLevel::Debug
        } else {
            rust_log
                .as_deref()
                .map(Self::parse_log_level)
                .unwrap_or(LogLevel::Info)
        };

        let http_addr = cli_config.http_addr.parse::<SocketAddr>().map_err(|e| {
            anyhow::anyhow!("Invalid --http-addr '{}': {}", cli_config.http_addr, e)
        })?;

        Ok(Self {
            instance_name: cli_config.instance_name.clone(),
            log_level,
            log_directives: if cli_config.verbose { None } else { rust_log },
            request_topic: cli_config.request_topic.clone(),
            event_topic: cli_config.event_topic.clone(),
            dead_letter_topic: cli_config.dead_letter_topic.clone(),
            http_addr,
            storage: cli_config.storage.parse()?,
            dispatch_retry_attempts: cli_config.dispatch_retry_attempts,
        })
    }

    /// Parse log level from string
    fn parse_log_level(level_str: &str) -> LogLevel {
        // Extract the main level from a complex RUST_LOG value
        let main_level = level_str
            .split(',')
            .next()
            .unwrap_or(level_str)
            .split('=')
            .next()
            .unwrap_or(level_str)
            .to_lowercase();

        match main_level.as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    /// Filter directives used by [`AppConfig::init_logging`]
    pub fn log_filter(&self) -> String {
        let base = self
            .log_directives
            .as_deref()
            .unwrap_or(self.log_level.to_filter_string());
        format!("{},{}", base, NOISY_CRATES)
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_new(self.log_filter())
            .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", self.log_filter(), e))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
            .compact()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        tracing::info!("Logging initialized with level: {:?}", self.log_level);
        Ok(())
    }

    /// Validate application configuration
    pub fn validate(&self) -> Result<()> {
        if self.instance_name.is_empty() {
            return Err(anyhow::anyhow!("Instance name cannot be empty"));
        }

        if !self
            .instance_name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow::anyhow!(
                "Instance name can only contain alphanumeric characters, hyphens, and underscores"
            ));
        }

        for (name, topic) in [
            ("request", &self.request_topic),
            ("event", &self.event_topic),
            ("dead-letter", &self.dead_letter_topic),
        ] {
            topics::validate_topic(topic)
                .map_err(|e| anyhow::anyhow!("Invalid {} topic: {}", name, e))?;
        }

        if self.request_topic == self.event_topic || self.request_topic == self.dead_letter_topic {
            return Err(anyhow::anyhow!(
                "The request topic must differ from the event and dead-letter topics"
            ));
        }

        if self.dispatch_retry_attempts == 0 {
            return Err(anyhow::anyhow!(
                "Dispatch retry attempts must be greater than 0"
            ));
        }

        Ok(())
    }
}

/// Builder pattern for AppConfig
pub struct AppConfigBuilder {
    instance_name: Option<String>,
    log_level: Option<LogLevel>,
    request_topic: Option<String>,
    event_topic: Option<String>,
    dead_letter_topic: Option<String>,
    http_addr: Option<SocketAddr>,
    storage: Option<StorageBackend>,
    dispatch_retry_attempts: Option<u32>,
}

impl AppConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            instance_name: None,
            log_level: None,
            request_topic: None,
            event_topic: None,
            dead_letter_topic: None,
            http_addr: None,
            storage: None,
            dispatch_retry_attempts: None,
        }
    }

    pub fn instance_name<S: Into<String>>(mut self, name: S) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn request_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.request_topic = Some(topic.into());
        self
    }

    pub fn event_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.event_topic = Some(topic.into());
        self
    }

    pub fn dead_letter_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    pub fn http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    pub fn storage(mut self, storage: StorageBackend) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn dispatch_retry_attempts(mut self, attempts: u32) -> Self {
        self.dispatch_retry_attempts = Some(attempts);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig> {
        let config = AppConfig {
            instance_name: self
                .instance_name
                .ok_or_else(|| anyhow::anyhow!("Instance name is required"))?,
            log_level: self.log_level.unwrap_or(LogLevel::Info),
            log_directives: None,
            request_topic: self
                .request_topic
                .unwrap_or_else(|| DEFAULT_REQUEST_TOPIC.to_string()),
            event_topic: self
                .event_topic
                .unwrap_or_else(|| DEFAULT_EVENT_TOPIC.to_string()),
            dead_letter_topic: self
                .dead_letter_topic
                .unwrap_or_else(|| DEFAULT_DEAD_LETTER_TOPIC.to_string()),
            http_addr: self
                .http_addr
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080))),
            storage: self.storage.unwrap_or(StorageBackend::Zenoh),
            dispatch_retry_attempts: self.dispatch_retry_attempts.unwrap_or(5),
        };

        config.validate()?;
        Ok(config)
    }
}

impl Default for AppConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(AppConfig::parse_log_level("info"), LogLevel::Info);
        assert_eq!(AppConfig::parse_log_level("debug"), LogLevel::Debug);
        assert_eq!(AppConfig::parse_log_level("warn"), LogLevel::Warn);
        assert_eq!(AppConfig::parse_log_level("error"), LogLevel::Error);
        assert_eq!(AppConfig::parse_log_level("trace"), LogLevel::Trace);
        assert_eq!(AppConfig::parse_log_level("invalid"), LogLevel::Info);
    }

    #[test]
    fn test_log_level_complex_parsing() {
        assert_eq!(
            AppConfig::parse_log_level("debug,zenoh_transport=warn"),
            LogLevel::Debug
        );
    }

    #[test]
    fn test_log_filter_silences_zenoh_internals() {
        let mut config = AppConfigBuilder::new()
            .instance_name("test")
            .log_level(LogLevel::Debug)
            .build()
            .unwrap();
        assert_eq!(
            config.log_filter(),
            "debug,zenoh_transport=warn,zenoh_runtime=warn,zenoh_protocol=warn"
        );
        assert!(EnvFilter::try_new(config.log_filter()).is_ok());

        config.log_directives = Some("orchestrator_backend=trace".to_string());
        assert!(config.log_filter().starts_with("orchestrator_backend=trace,"));
    }

    #[test]
    fn test_app_config_from_cli_verbose() {
        let cli_config = CliConfig {
            verbose: true,
            instance_name: "edge".to_string(),
            storage: "memory".to_string(),
            http_addr: "127.0.0.1:9000".to_string(),
            ..CliConfig::default()
        };

        let app_config = AppConfig::from_cli(&cli_config).unwrap();
        assert_eq!(app_config.instance_name, "edge");
        assert_eq!(app_config.log_level, LogLevel::Debug);
        assert!(app_config.log_directives.is_none());
        assert_eq!(app_config.storage, StorageBackend::Memory);
        assert_eq!(app_config.http_addr.port(), 9000);
        assert!(app_config.validate().is_ok());
    }

    #[test]
    fn test_app_config_rejects_bad_http_addr() {
        let cli_config = CliConfig {
            http_addr: "localhost".to_string(),
            ..CliConfig::default()
        };
        assert!(AppConfig::from_cli(&cli_config).is_err());
    }

    #[test]
    fn test_app_config_validation() {
        let base = AppConfigBuilder::new().instance_name("valid-name").build().unwrap();
        assert!(base.validate().is_ok());

        let mut config = base.clone();
        config.instance_name = "with space".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.event_topic = "scenario/**/bad//".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.event_topic = config.request_topic.clone();
        assert!(config.validate().is_err());

        let mut config = base;
        config.dispatch_retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_builder_defaults() {
        let config = AppConfigBuilder::new().instance_name("test").build().unwrap();

        assert_eq!(config.instance_name, "test");
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.request_topic, "scenario/run");
        assert_eq!(config.event_topic, "scenario");
        assert_eq!(config.dead_letter_topic, "scenario/dead-letter");
        assert_eq!(config.http_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.storage, StorageBackend::Zenoh);
        assert_eq!(config.dispatch_retry_attempts, 5);
    }

    #[test]
    fn test_app_config_builder_missing_required() {
        assert!(AppConfigBuilder::new().build().is_err());
    }
}
