//! CLI argument parsing for the orchestrator backend.
//!
//! This module handles command line argument parsing using clap and provides
//! a structured representation of CLI configuration that the other
//! configuration components are built from.

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

use orchestrator_shared::{DEFAULT_DEAD_LETTER_TOPIC, DEFAULT_EVENT_TOPIC, DEFAULT_REQUEST_TOPIC};

/// CLI configuration structure containing all parsed command line arguments
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub verbose: bool,
    pub instance_name: String,
    pub zenoh_mode: String,
    pub zenoh_connect: Option<String>,
    pub zenoh_listen: Option<String>,
    pub no_multicast: bool,
    pub max_concurrency: usize,
    pub admission_policy: String,
    pub mode: String,
    pub shutdown_timeout: String,
    pub scenario_timeout: Option<String>,
    pub request_topic: String,
    pub event_topic: String,
    pub dead_letter_topic: String,
    pub http_addr: String,
    pub storage: String,
    pub recover_stuck: String,
    pub dispatch_retry_attempts: u32,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            instance_name: "default".to_string(),
            zenoh_mode: "peer".to_string(),
            zenoh_connect: None,
            zenoh_listen: None,
            no_multicast: false,
            max_concurrency: 4,
            admission_policy: "block".to_string(),
            mode: "async".to_string(),
            shutdown_timeout: "30s".to_string(),
            scenario_timeout: None,
            request_topic: DEFAULT_REQUEST_TOPIC.to_string(),
            event_topic: DEFAULT_EVENT_TOPIC.to_string(),
            dead_letter_topic: DEFAULT_DEAD_LETTER_TOPIC.to_string(),
            http_addr: "0.0.0.0:8080".to_string(),
            storage: "zenoh".to_string(),
            recover_stuck: "fail".to_string(),
            dispatch_retry_attempts: 5,
        }
    }
}

fn required_string(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing value for --{}", id))
}

impl CliConfig {
    /// Parse CLI arguments and create CliConfig
    pub fn from_args() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Create CliConfig from pre-parsed ArgMatches (useful for testing)
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let max_concurrency = *matches
            .get_one::<usize>("max-concurrency")
            .ok_or_else(|| anyhow::anyhow!("Missing value for --max-concurrency"))?;
        let dispatch_retry_attempts = *matches
            .get_one::<u32>("dispatch-retry-attempts")
            .ok_or_else(|| anyhow::anyhow!("Missing value for --dispatch-retry-attempts"))?;

        Ok(Self {
            verbose: matches.get_flag("verbose"),
            instance_name: required_string(matches, "name")?,
            zenoh_mode: required_string(matches, "zenoh-mode")?,
            zenoh_connect: matches.get_one::<String>("zenoh-connect").cloned(),
            zenoh_listen: matches.get_one::<String>("zenoh-listen").cloned(),
            no_multicast: matches.get_flag("no-multicast"),
            max_concurrency,
            admission_policy: required_string(matches, "admission-policy")?,
            mode: required_string(matches, "mode")?,
            shutdown_timeout: required_string(matches, "shutdown-timeout")?,
            scenario_timeout: matches.get_one::<String>("scenario-timeout").cloned(),
            request_topic: required_string(matches, "request-topic")?,
            event_topic: required_string(matches, "event-topic")?,
            dead_letter_topic: required_string(matches, "dead-letter-topic")?,
            http_addr: required_string(matches, "http-addr")?,
            storage: required_string(matches, "storage")?,
            recover_stuck: required_string(matches, "recover-stuck")?,
            dispatch_retry_attempts,
        })
    }

    /// Build the clap Command structure
    pub fn build_cli() -> Command {
        Command::new("orchestrator-backend")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Scenario orchestrator - bounded worker pool on a Zenoh bus")
            .long_about("Consumes scenario-run requests from a Zenoh key expression, executes them \
                       in a concurrency-bounded worker pool, persists every status transition and \
                       publishes a lifecycle event for each of them.")
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(clap::ArgAction::SetTrue)
                    .help("Enable verbose logging")
                    .long_help("Enable verbose debug logging, including admission, worker outcomes \
                              and every published lifecycle event."),
            )
            .arg(
                Arg::new("name")
                    .short('n')
                    .long("name")
                    .value_name("INSTANCE_NAME")
                    .help("Unique name for this orchestrator instance")
                    .long_help("Unique name for this orchestrator instance. It scopes the health \
                              liveliness token and the storage prefix of scenario records.")
                    .default_value("default"),
            )
            .arg(
                Arg::new("zenoh-mode")
                    .long("zenoh-mode")
                    .value_name("MODE")
                    .help("Zenoh session mode: peer or client")
                    .value_parser(["peer", "client"])
                    .default_value("peer"),
            )
            .arg(
                Arg::new("zenoh-connect")
                    .long("zenoh-connect")
                    .value_name("ENDPOINTS")
                    .help("Zenoh connect endpoints (comma-separated)")
                    .long_help("Comma-separated list of Zenoh endpoints to connect to. \
                              Examples: tcp/192.168.1.1:7447, tls/secure.host:7448"),
            )
            .arg(
                Arg::new("zenoh-listen")
                    .long("zenoh-listen")
                    .value_name("ENDPOINTS")
                    .help("Zenoh listen endpoints (comma-separated)")
                    .long_help("Comma-separated list of Zenoh endpoints to listen on. \
                              Example: tcp/0.0.0.0:7447"),
            )
            .arg(
                Arg::new("no-multicast")
                    .long("no-multicast")
                    .action(clap::ArgAction::SetTrue)
                    .help("Disable multicast scouting for peer discovery"),
            )
            .arg(
                Arg::new("max-concurrency")
                    .long("max-concurrency")
                    .value_name("N")
                    .help("Maximum number of scenarios executing at once")
                    .value_parser(clap::value_parser!(usize))
                    .default_value("4"),
            )
            .arg(
                Arg::new("admission-policy")
                    .long("admission-policy")
                    .value_name("POLICY")
                    .help("Behaviour when the pool is full: block or reject")
                    .long_help("'block' makes a submission wait for a free slot, which pushes back \
                              on the request subscriber. 'reject' refuses it immediately; the \
                              dispatcher then retries with backoff and dead-letters on exhaustion.")
                    .value_parser(["block", "reject"])
                    .default_value("block"),
            )
            .arg(
                Arg::new("mode")
                    .long("mode")
                    .value_name("MODE")
                    .help("Submission mode: async or sync")
                    .long_help("'async' acknowledges a request once it is admitted. 'sync' waits \
                              for the scenario to finish, processing one request at a time.")
                    .value_parser(["async", "sync"])
                    .default_value("async"),
            )
            .arg(
                Arg::new("shutdown-timeout")
                    .long("shutdown-timeout")
                    .value_name("DURATION")
                    .help("Grace period for in-flight scenarios on shutdown (e.g. 30s)")
                    .default_value("30s"),
            )
            .arg(
                Arg::new("scenario-timeout")
                    .long("scenario-timeout")
                    .value_name("DURATION")
                    .help("Cancel any scenario running longer than this (e.g. 10m)"),
            )
            .arg(
                Arg::new("request-topic")
                    .long("request-topic")
                    .value_name("KEY_EXPR")
                    .help("Key expression scenario-run requests arrive on")
                    .default_value(DEFAULT_REQUEST_TOPIC),
            )
            .arg(
                Arg::new("event-topic")
                    .long("event-topic")
                    .value_name("KEY_EXPR")
                    .help("Key expression lifecycle events are published on")
                    .default_value(DEFAULT_EVENT_TOPIC),
            )
            .arg(
                Arg::new("dead-letter-topic")
                    .long("dead-letter-topic")
                    .value_name("KEY_EXPR")
                    .help("Key expression for requests that could not be admitted")
                    .default_value(DEFAULT_DEAD_LETTER_TOPIC),
            )
            .arg(
                Arg::new("http-addr")
                    .long("http-addr")
                    .value_name("ADDR")
                    .help("Listen address of the HTTP control surface")
                    .default_value("0.0.0.0:8080"),
            )
            .arg(
                Arg::new("storage")
                    .long("storage")
                    .value_name("BACKEND")
                    .help("Scenario record storage: zenoh or memory")
                    .long_help("'zenoh' stores records under orchestrator/storage/<name>/scenarios, \
                              durable when a Zenoh storage covers that prefix. 'memory' keeps them \
                              in the process, for development.")
                    .value_parser(["zenoh", "memory"])
                    .default_value("zenoh"),
            )
            .arg(
                Arg::new("recover-stuck")
                    .long("recover-stuck")
                    .value_name("POLICY")
                    .help("Start-up handling of records left running: fail or ignore")
                    .value_parser(["fail", "ignore"])
                    .default_value("fail"),
            )
            .arg(
                Arg::new("dispatch-retry-attempts")
                    .long("dispatch-retry-attempts")
                    .value_name("N")
                    .help("Attempts for a request refused because the pool is saturated")
                    .value_parser(clap::value_parser!(u32).range(1..))
                    .default_value("5"),
            )
    }

    /// Validate CLI configuration
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

        match self.zenoh_mode.to_lowercase().as_str() {
            "peer" | "client" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid zenoh mode '{}'. Must be 'peer' or 'client'",
                    self.zenoh_mode
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_default_values() {
        let matches = CliConfig::build_cli()
            .try_get_matches_from(["orchestrator-backend"])
            .unwrap();

        let config = CliConfig::from_matches(&matches).unwrap();

        assert!(!config.verbose);
        assert!(!config.no_multicast);
        assert_eq!(config.instance_name, "default");
        assert_eq!(config.zenoh_mode, "peer");
        assert!(config.zenoh_connect.is_none());
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.admission_policy, "block");
        assert_eq!(config.mode, "async");
        assert_eq!(config.shutdown_timeout, "30s");
        assert!(config.scenario_timeout.is_none());
        assert_eq!(config.request_topic, "scenario/run");
        assert_eq!(config.event_topic, "scenario");
        assert_eq!(config.dead_letter_topic, "scenario/dead-letter");
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.storage, "zenoh");
        assert_eq!(config.recover_stuck, "fail");
        assert_eq!(config.dispatch_retry_attempts, 5);
    }

    #[test]
    fn test_cli_defaults_match_default_impl() {
        let matches = CliConfig::build_cli()
            .try_get_matches_from(["orchestrator-backend"])
            .unwrap();
        let parsed = CliConfig::from_matches(&matches).unwrap();
        let default = CliConfig::default();

        assert_eq!(parsed.instance_name, default.instance_name);
        assert_eq!(parsed.max_concurrency, default.max_concurrency);
        assert_eq!(parsed.shutdown_timeout, default.shutdown_timeout);
        assert_eq!(parsed.http_addr, default.http_addr);
        assert_eq!(parsed.dispatch_retry_attempts, default.dispatch_retry_attempts);
    }

    #[test]
    fn test_cli_config_custom_values() {
        let matches = CliConfig::build_cli()
            .try_get_matches_from([
                "orchestrator-backend",
                "--verbose",
                "--name",
                "edge-01",
                "--zenoh-mode",
                "client",
                "--zenoh-connect",
                "tcp/192.168.1.1:7447,tcp/192.168.1.2:7447",
                "--max-concurrency",
                "16",
                "--admission-policy",
                "reject",
                "--mode",
                "sync",
                "--shutdown-timeout",
                "5s",
                "--scenario-timeout",
                "10m",
                "--event-topic",
                "lab/scenario",
                "--storage",
                "memory",
                "--recover-stuck",
                "ignore",
                "--dispatch-retry-attempts",
                "2",
            ])
            .unwrap();

        let config = CliConfig::from_matches(&matches).unwrap();

        assert!(config.verbose);
        assert_eq!(config.instance_name, "edge-01");
        assert_eq!(config.zenoh_mode, "client");
        assert_eq!(
            config.zenoh_connect,
            Some("tcp/192.168.1.1:7447,tcp/192.168.1.2:7447".to_string())
        );
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.admission_policy, "reject");
        assert_eq!(config.mode, "sync");
        assert_eq!(config.shutdown_timeout, "5s");
        assert_eq!(config.scenario_timeout.as_deref(), Some("10m"));
        assert_eq!(config.event_topic, "lab/scenario");
        assert_eq!(config.storage, "memory");
        assert_eq!(config.recover_stuck, "ignore");
        assert_eq!(config.dispatch_retry_attempts, 2);
    }

    #[test]
    fn test_cli_rejects_unknown_policy_values() {
        for args in [
            ["orchestrator-backend", "--admission-policy", "drop"],
            ["orchestrator-backend", "--mode", "eventually"],
            ["orchestrator-backend", "--max-concurrency", "many"],
            ["orchestrator-backend", "--dispatch-retry-attempts", "0"],
        ] {
            assert!(CliConfig::build_cli().try_get_matches_from(args).is_err());
        }
    }

    #[test]
    fn test_cli_config_validation() {
        assert!(CliConfig::default().validate().is_ok());

        let config = CliConfig {
            instance_name: "".to_string(),
            ..CliConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CliConfig {
            instance_name: "lab/west".to_string(),
            ..CliConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CliConfig {
            zenoh_mode: "router".to_string(),
            ..CliConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
