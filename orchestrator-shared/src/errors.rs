use thiserror::Error;

use crate::scenario::ScenarioStatus;

/// Common error type for process-level failures
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Zenoh communication error: {message}")]
    ZenohError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures reported by the worker pool to its callers
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Scenario id must not be empty")]
    InvalidScenarioId,

    #[error("Scenario '{scenario_id}' is already running")]
    AlreadyRunning { scenario_id: String },

    #[error("Worker pool is saturated ({max_concurrency} scenarios in flight)")]
    PoolSaturated { max_concurrency: usize },

    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Inconsistent state for scenario '{scenario_id}': {message}")]
    Consistency {
        scenario_id: String,
        message: String,
    },
}

impl PoolError {
    /// Whether retrying the same submission later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::PoolSaturated { .. })
    }
}

/// Errors from the scenario record store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {message}")]
    Backend { message: String },

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Scenario '{scenario_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        scenario_id: String,
        from: ScenarioStatus,
        to: ScenarioStatus,
    },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            message: message.into(),
        }
    }
}

/// Errors from the outbound event channel
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to publish on '{topic}': {message}")]
    Transport { topic: String, message: String },

    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors a scenario strategy reports back to the pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("Scenario failed: {message}")]
    Failed { message: String },

    #[error("Invalid scenario payload: {message}")]
    InvalidPayload { message: String },

    #[error("Scenario was cancelled")]
    Cancelled,
}

impl StrategyError {
    pub fn failed(message: impl Into<String>) -> Self {
        StrategyError::Failed {
            message: message.into(),
        }
    }
}

/// Zenoh configuration specific errors
#[derive(Error, Debug)]
pub enum ZenohConfigError {
    #[error("Invalid zenoh mode: expected 'peer' or 'client', got '{mode}'")]
    InvalidMode { mode: String },

    #[error("Invalid endpoint format: '{endpoint}' - {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Unsupported protocol: '{protocol}' in endpoint '{endpoint}'")]
    InvalidProtocol { protocol: String, endpoint: String },

    #[error("Invalid address format: '{address}' for protocol '{protocol}' - {reason}")]
    InvalidAddress {
        address: String,
        protocol: String,
        reason: String,
    },

    #[error("Mode-endpoint mismatch: {mode:?} mode {reason}")]
    ModeEndpointMismatch {
        mode: crate::ZenohMode,
        reason: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },

    #[error("Failed to create zenoh config: {reason}")]
    ZenohConfigCreationError { reason: String },

    #[error("Property configuration error: failed to set '{key}' = '{value}': {reason}")]
    PropertyError {
        key: String,
        value: String,
        reason: String,
    },
}

impl ZenohConfigError {
    pub fn invalid_address_from_parse_error(
        address: &str,
        protocol: &str,
        parse_err: &dyn std::error::Error,
    ) -> Self {
        ZenohConfigError::InvalidAddress {
            address: address.to_string(),
            protocol: protocol.to_string(),
            reason: parse_err.to_string(),
        }
    }

    pub fn client_cannot_listen() -> Self {
        ZenohConfigError::ModeEndpointMismatch {
            mode: crate::ZenohMode::Client,
            reason: "cannot have listen endpoints. Clients can only connect to other nodes"
                .to_string(),
        }
    }

    pub fn unsupported_endpoint_format(endpoint: &str) -> Self {
        ZenohConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "expected format like 'connect/tcp/127.0.0.1:7447' or 'listen/tcp/0.0.0.0:7447'"
                .to_string(),
        }
    }
}

/// Result type aliases for convenience
pub type OrchestratorResult<T> = anyhow::Result<T>;
pub type PoolResult<T> = Result<T, PoolError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type ZenohConfigResult<T> = Result<T, ZenohConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_messages() {
        let err = PoolError::AlreadyRunning {
            scenario_id: "s1".to_string(),
        };
        assert_eq!(err.to_string(), "Scenario 's1' is already running");

        let err = PoolError::PoolSaturated { max_concurrency: 3 };
        assert!(err.to_string().contains("3 scenarios in flight"));
    }

    #[test]
    fn test_only_saturation_is_transient() {
        assert!(PoolError::PoolSaturated { max_concurrency: 1 }.is_transient());
        assert!(!PoolError::ShuttingDown.is_transient());
        assert!(!PoolError::InvalidScenarioId.is_transient());
        assert!(
            !PoolError::AlreadyRunning {
                scenario_id: "x".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_storage_error_converts_into_pool_error() {
        let err: PoolError = StorageError::backend("disk full").into();
        assert!(matches!(err, PoolError::Persistence(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = StorageError::InvalidTransition {
            scenario_id: "s1".into(),
            from: ScenarioStatus::Succeeded,
            to: ScenarioStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Scenario 's1' cannot move from succeeded to running"
        );
    }
}
