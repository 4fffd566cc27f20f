//! Shared types and message definitions for the scenario orchestrator.
//!
//! This crate contains the data structures exchanged between the orchestrator
//! backend, the processes that submit scenarios, and the consumers of
//! lifecycle events. All bus traffic goes through Zenoh.
//!
//! # Communication Patterns
//!
//! ```text
//! Submitter                        Orchestrator                      Consumers
//!    │ ── Pub: ScenarioRunRequest ──► │                                 │
//!    │                                │ ── Pub: LifecycleEvent ───────► │
//!    │                                │ ── Pub: DeadLetter ───────────► │
//!    │                                │ ◄─► Put/Get: ScenarioRecord     │
//!    │                                │     (Zenoh storage)             │
//! ```
//!
//! # Key Components
//!
//! * [`topics`] - Key expressions for the orchestrator channels
//! * [`scenario`] - Scenario records, run requests and lifecycle events
//! * [`script`] - JSON5 step scripts understood by the bundled strategy
//! * [`errors`] - Error taxonomy shared by every component
//! * [`ZenohConfig`] - Zenoh session configuration and validation
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use zenoh::config::WhatAmI;
use zenoh::key_expr::{
    OwnedKeyExpr,
    format::{kedefine, keformat},
};

pub mod errors;
pub mod scenario;
pub mod script;

/// Default key expression carrying inbound scenario-run requests
pub const DEFAULT_REQUEST_TOPIC: &str = "scenario/run";
/// Default key expression lifecycle events are published on
pub const DEFAULT_EVENT_TOPIC: &str = "scenario";
/// Default key expression for requests the dispatcher gave up on
pub const DEFAULT_DEAD_LETTER_TOPIC: &str = "scenario/dead-letter";

/// Milliseconds since the Unix epoch, saturating to zero on clock skew.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Topic key expressions owned by an orchestrator instance
pub mod topics {
    use super::*;

    kedefine!(
        pub health_keys: "orchestrator/${instance:*}/health",
        pub storage_prefix_keys: "orchestrator/storage/${instance:*}/scenarios",
        pub scenario_record_keys: "orchestrator/storage/${instance:*}/scenarios/${id:*}",
    );

    /// Liveliness key expression of an orchestrator instance
    pub fn orchestrator_health(instance: &str) -> OwnedKeyExpr {
        keformat!(health_keys::formatter(), instance = instance).expect(
            "Failed to format health topic - this should never happen with a validated instance name",
        )
    }

    /// Prefix under which the scenario records of an instance are stored
    pub fn scenario_storage_prefix(instance: &str) -> OwnedKeyExpr {
        keformat!(storage_prefix_keys::formatter(), instance = instance).expect(
            "Failed to format storage prefix - this should never happen with a validated instance name",
        )
    }

    /// Storage key of a single scenario record.
    ///
    /// Scenario ids come from submitters, so formatting can fail when the id
    /// is not a valid key chunk (contains `/`, wildcards, or is empty).
    pub fn scenario_record(instance: &str, scenario_id: &str) -> zenoh::Result<OwnedKeyExpr> {
        keformat!(
            scenario_record_keys::formatter(),
            instance = instance,
            id = scenario_id
        )
    }

    /// Checks that a user-supplied key expression is usable as a topic
    pub fn validate_topic(topic: &str) -> Result<(), String> {
        OwnedKeyExpr::try_from(topic.to_string())
            .map(|_| ())
            .map_err(|e| format!("Invalid key expression '{}': {}", topic, e))
    }
}

/// Quality of Service settings for the orchestrator's outbound traffic
pub mod qos {
    use zenoh::qos::{CongestionControl, Priority};

    /// QoS configuration tuple: (congestion_control, priority)
    pub type QosConfig = (CongestionControl, Priority);

    /// Lifecycle events block rather than drop under congestion
    pub const LIFECYCLE_EVENTS: QosConfig = (CongestionControl::Block, Priority::Data);

    /// Dead letters are rare and must not be dropped either
    pub const DEAD_LETTERS: QosConfig = (CongestionControl::Block, Priority::DataLow);

    /// Storage get timeout in milliseconds
    pub const QUERY_TIMEOUT_MS: u64 = 5000;
}

/// Zenoh session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZenohConfig {
    /// Session mode (Peer or Client)
    pub mode: ZenohMode,
    /// Endpoints prefixed with `connect/` or `listen/`
    pub endpoints: Vec<String>,
    /// Additional zenoh configuration properties
    pub properties: HashMap<String, String>,
}

/// Zenoh session modes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ZenohMode {
    /// Peer mode - can connect to and be connected from other nodes
    Peer,
    /// Client mode - only connects to routers or peers
    Client,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self::new_peer()
    }
}

impl ZenohConfig {
    /// Create a new peer mode configuration
    pub fn new_peer() -> Self {
        Self {
            mode: ZenohMode::Peer,
            endpoints: vec![],
            properties: HashMap::new(),
        }
    }

    /// Create a new client mode configuration
    pub fn new_client() -> Self {
        Self {
            mode: ZenohMode::Client,
            endpoints: vec![],
            properties: HashMap::new(),
        }
    }

    /// Disable multicast scouting discovery
    pub fn disable_multicast_scouting(self) -> Self {
        self.add_property("scouting/multicast/enabled", "false")
    }

    /// Add a listen endpoint (peer mode only)
    pub fn add_listen_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoints.push(format!("listen/{}", endpoint));
        self
    }

    /// Add a connect endpoint
    pub fn add_connect_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoints.push(format!("connect/{}", endpoint));
        self
    }

    /// Add a custom property
    pub fn add_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    /// Validate mode/endpoint compatibility, endpoint syntax and known properties
    pub fn validate(&self) -> Result<(), errors::ZenohConfigError> {
        use errors::ZenohConfigError;

        if matches!(self.mode, ZenohMode::Client)
            && self.endpoints.iter().any(|e| e.starts_with("listen/"))
        {
            return Err(ZenohConfigError::client_cannot_listen());
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint) {
                return Err(ZenohConfigError::ValidationError {
                    message: format!("Duplicate endpoint found: '{}'.", endpoint),
                });
            }
            Self::validate_endpoint(endpoint)?;
        }

        self.validate_properties()
    }

    fn validate_endpoint(endpoint: &str) -> Result<(), errors::ZenohConfigError> {
        use errors::ZenohConfigError;

        let locator = endpoint
            .strip_prefix("connect/")
            .or_else(|| endpoint.strip_prefix("listen/"))
            .ok_or_else(|| ZenohConfigError::unsupported_endpoint_format(endpoint))?;

        let (protocol, address) = locator
            .split_once('/')
            .ok_or_else(|| ZenohConfigError::unsupported_endpoint_format(endpoint))?;

        match protocol {
            "tcp" | "udp" | "tls" | "quic" => Self::validate_socket_address(address, protocol),
            _ => Err(ZenohConfigError::InvalidProtocol {
                protocol: protocol.to_string(),
                endpoint: endpoint.to_string(),
            }),
        }
    }

    fn validate_socket_address(addr: &str, protocol: &str) -> Result<(), errors::ZenohConfigError> {
        use errors::ZenohConfigError;

        let socket_addr = addr.parse::<std::net::SocketAddr>().map_err(|e| {
            ZenohConfigError::invalid_address_from_parse_error(addr, protocol, &e)
        })?;

        let reason = if socket_addr.port() == 0 {
            Some("Port 0 is reserved and not allowed")
        } else if matches!(protocol, "tcp" | "tls") && socket_addr.ip().is_multicast() {
            Some("Multicast addresses are not supported for TCP/TLS protocols")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ZenohConfigError::InvalidAddress {
                address: addr.to_string(),
                protocol: protocol.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn validate_properties(&self) -> Result<(), errors::ZenohConfigError> {
        use errors::ZenohConfigError;

        for (key, value) in &self.properties {
            let problem = match key.as_str() {
                "connect/timeout_ms" | "queries/timeout_ms" => match value.parse::<u64>() {
                    Ok(0) => Some("Timeout cannot be 0ms"),
                    Ok(t) if t > 300_000 => Some("Timeout should not exceed 5 minutes (300000ms)"),
                    Ok(_) => None,
                    Err(_) => Some("Timeout value must be a valid number"),
                },
                "scouting/multicast/enabled" if !matches!(value.as_str(), "true" | "false") => {
                    Some("Boolean property must be 'true' or 'false'")
                }
                _ => None,
            };

            if let Some(reason) = problem {
                return Err(ZenohConfigError::PropertyError {
                    key: key.clone(),
                    value: value.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Convert to zenoh::Config
    pub fn to_zenoh_config(&self) -> Result<zenoh::Config, errors::ZenohConfigError> {
        use errors::ZenohConfigError;

        self.validate()?;

        let mut config = zenoh::Config::default();

        let whatami = match self.mode {
            ZenohMode::Peer => WhatAmI::Peer,
            ZenohMode::Client => WhatAmI::Client,
        };
        config
            .set_mode(Some(whatami))
            .map_err(|e| ZenohConfigError::ZenohConfigCreationError {
                reason: format!("Failed to set {:?} mode: {:?}", self.mode, e),
            })?;

        for (direction, key) in [("connect/", "connect/endpoints"), ("listen/", "listen/endpoints")] {
            let endpoints: Vec<&str> = self
                .endpoints
                .iter()
                .filter_map(|e| e.strip_prefix(direction))
                .collect();
            if endpoints.is_empty() {
                continue;
            }

            let json = serde_json::to_string(&endpoints).map_err(|e| {
                ZenohConfigError::ZenohConfigCreationError {
                    reason: format!("Failed to encode {}: {}", key, e),
                }
            })?;
            config
                .insert_json5(key, &json)
                .map_err(|e| ZenohConfigError::ZenohConfigCreationError {
                    reason: format!("Failed to set {}: {}", key, e),
                })?;
        }

        for (key, value) in &self.properties {
            // Booleans and numbers go in bare, everything else as a JSON string
            let json_value = if value == "true" || value == "false" || value.parse::<f64>().is_ok()
            {
                value.clone()
            } else {
                format!("\"{}\"", value)
            };

            config
                .insert_json5(key, &json_value)
                .map_err(|e| ZenohConfigError::PropertyError {
                    key: key.clone(),
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_topic_format() {
        assert_eq!(
            topics::orchestrator_health("edge-01").as_str(),
            "orchestrator/edge-01/health"
        );
    }

    #[test]
    fn test_scenario_record_key() {
        let key = topics::scenario_record("default", "nightly-42").unwrap();
        assert_eq!(
            key.as_str(),
            "orchestrator/storage/default/scenarios/nightly-42"
        );
        assert!(
            key.as_str()
                .starts_with(topics::scenario_storage_prefix("default").as_str())
        );
    }

    #[test]
    fn test_scenario_record_key_rejects_multi_chunk_ids() {
        assert!(topics::scenario_record("default", "a/b").is_err());
        assert!(topics::scenario_record("default", "**").is_err());
    }

    #[test]
    fn test_validate_topic() {
        assert!(topics::validate_topic(DEFAULT_REQUEST_TOPIC).is_ok());
        assert!(topics::validate_topic(DEFAULT_EVENT_TOPIC).is_ok());
        assert!(topics::validate_topic(DEFAULT_DEAD_LETTER_TOPIC).is_ok());
        assert!(topics::validate_topic("scenario//run").is_err());
        assert!(topics::validate_topic("").is_err());
    }

    #[test]
    fn test_zenoh_config_validation_duplicate_endpoints() {
        let config = ZenohConfig::new_peer()
            .add_listen_endpoint("tcp/127.0.0.1:7447")
            .add_listen_endpoint("tcp/127.0.0.1:7447");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate endpoint"));
    }

    #[test]
    fn test_zenoh_config_validation_port_zero() {
        let config = ZenohConfig::new_peer().add_listen_endpoint("tcp/127.0.0.1:0");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Port 0 is reserved"));
    }

    #[test]
    fn test_zenoh_config_validation_multicast_tcp() {
        let config = ZenohConfig::new_peer().add_listen_endpoint("tcp/224.0.0.1:7447");

        let err = config.validate().unwrap_err();
        assert!(
            err.to_string()
                .contains("Multicast addresses are not supported for TCP")
        );
    }

    #[test]
    fn test_zenoh_config_validation_client_listen() {
        let config = ZenohConfig::new_client().add_listen_endpoint("tcp/127.0.0.1:7447");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot have listen endpoints"));
    }

    #[test]
    fn test_zenoh_config_validation_unknown_protocol() {
        let config = ZenohConfig::new_peer().add_connect_endpoint("serial/ttyUSB0");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unsupported protocol"));
    }

    #[test]
    fn test_zenoh_config_validation_properties() {
        let config = ZenohConfig::new_peer().add_property("connect/timeout_ms", "0");
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("Timeout cannot be 0ms")
        );

        let config = ZenohConfig::new_peer().add_property("scouting/multicast/enabled", "maybe");
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("Boolean property must be 'true' or 'false'")
        );
    }

    #[test]
    fn test_zenoh_config_validation_valid_config() {
        let config = ZenohConfig::new_peer()
            .add_listen_endpoint("tcp/127.0.0.1:7447")
            .add_connect_endpoint("tcp/[::1]:7448")
            .add_property("connect/timeout_ms", "5000")
            .disable_multicast_scouting();

        assert!(config.validate().is_ok(), "{:?}", config.validate());
    }
}
