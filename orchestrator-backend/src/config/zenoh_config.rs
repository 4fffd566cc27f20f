//! Zenoh configuration management for the orchestrator backend.
//!
//! This module turns the CLI endpoint options into a [`ZenohConfig`] and
//! reports validation problems in operator-friendly terms.

use anyhow::Result;
use orchestrator_shared::errors::ZenohConfigError;
use orchestrator_shared::{ZenohConfig, ZenohMode};

use super::cli::CliConfig;

/// Zenoh configuration manager
pub struct ZenohConfigManager;

impl ZenohConfigManager {
    /// Create Zenoh configuration from CLI config
    pub fn from_cli(cli_config: &CliConfig) -> Result<ZenohConfig> {
        let mut zenoh_config = match cli_config.zenoh_mode.to_lowercase().as_str() {
            "peer" => ZenohConfig::new_peer(),
            "client" => ZenohConfig::new_client(),
            other => {
                return Err(ZenohConfigError::InvalidMode {
                    mode: other.to_string(),
                }
                .into());
            }
        };

        for endpoint in Self::split_endpoints(cli_config.zenoh_connect.as_deref()) {
            zenoh_config = zenoh_config.add_connect_endpoint(endpoint);
        }

        for endpoint in Self::split_endpoints(cli_config.zenoh_listen.as_deref()) {
            zenoh_config = zenoh_config.add_listen_endpoint(endpoint);
        }

        if cli_config.no_multicast {
            zenoh_config = zenoh_config.disable_multicast_scouting();
        }

        Ok(zenoh_config)
    }

    fn split_endpoints(list: Option<&str>) -> impl Iterator<Item = &str> {
        list.into_iter()
            .flat_map(|list| list.split(','))
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }

    /// Validate and handle zenoh configuration errors with detailed reporting
    pub fn validate_and_report(zenoh_config: &ZenohConfig) -> Result<()> {
        if let Err(e) = zenoh_config.validate() {
            let error_message = match e {
                ZenohConfigError::InvalidEndpoint { endpoint, reason } => {
                    format!("Invalid endpoint '{}' - {}", endpoint, reason)
                }
                ZenohConfigError::InvalidProtocol { protocol, endpoint } => {
                    format!(
                        "Unsupported protocol '{}' in endpoint '{}'. Supported: tcp, udp, tls, quic",
                        protocol, endpoint
                    )
                }
                ZenohConfigError::ModeEndpointMismatch { mode, reason } => {
                    format!("{:?} mode {}", mode, reason)
                }
                ZenohConfigError::InvalidAddress {
                    address,
                    protocol,
                    reason,
                } => {
                    format!("Invalid {} address '{}' - {}", protocol, address, reason)
                }
                other => format!("Invalid zenoh configuration: {}", other),
            };

            tracing::error!("{}", error_message);
            return Err(anyhow::anyhow!(
                "Zenoh configuration validation failed: {}",
                error_message
            ));
        }

        Ok(())
    }

    /// Whether a peer without endpoints or scouting can reach anybody
    pub fn is_isolated(zenoh_config: &ZenohConfig) -> bool {
        zenoh_config.endpoints.is_empty()
            && zenoh_config
                .properties
                .get("scouting/multicast/enabled")
                .is_some_and(|v| v == "false")
    }
}
