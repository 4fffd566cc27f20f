//! Scenario records, run requests and lifecycle events.
//!
//! A scenario is a unit of work submitted on the bus under an id chosen by
//! the submitter. The orchestrator persists one [`ScenarioRecord`] per id and
//! announces every status change as a [`LifecycleEvent`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for scenarios, assigned by the submitter
pub type ScenarioId = String;

/// Status of a scenario as persisted in the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    /// Submitted but not yet admitted by the pool
    Pending,
    /// Admitted and owned by a worker
    Running,
    /// The strategy completed without error
    Succeeded,
    /// The strategy returned an error or panicked
    Failed,
    /// Execution was cancelled by shutdown or timeout
    Cancelled,
}

impl ScenarioStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScenarioStatus::Succeeded | ScenarioStatus::Failed | ScenarioStatus::Cancelled
        )
    }

    /// Whether a record may move from `self` to `next`.
    ///
    /// Terminal records may be re-admitted, which starts a fresh run.
    pub fn can_transition_to(self, next: ScenarioStatus) -> bool {
        use ScenarioStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Succeeded | Failed | Cancelled) => true,
            (Succeeded | Failed | Cancelled, Running) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioStatus::Pending => "pending",
            ScenarioStatus::Running => "running",
            ScenarioStatus::Succeeded => "succeeded",
            ScenarioStatus::Failed => "failed",
            ScenarioStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ScenarioStatus::Pending),
            "running" => Ok(ScenarioStatus::Running),
            "succeeded" => Ok(ScenarioStatus::Succeeded),
            "failed" => Ok(ScenarioStatus::Failed),
            "cancelled" => Ok(ScenarioStatus::Cancelled),
            other => Err(format!("Unknown scenario status '{}'", other)),
        }
    }
}

/// Persisted state of one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub id: ScenarioId,
    pub status: ScenarioStatus,
    /// Number of times execution began for this id
    #[serde(default)]
    pub attempts: u32,
    /// Last write (Unix timestamp in milliseconds)
    pub updated_at: u64,
}

impl ScenarioRecord {
    pub fn new(id: impl Into<ScenarioId>, status: ScenarioStatus) -> Self {
        Self {
            id: id.into(),
            status,
            attempts: 0,
            updated_at: crate::now_millis(),
        }
    }

    /// Applies a status write the way every repository does: entering
    /// `running` counts as a new attempt.
    pub fn apply_status(&mut self, status: ScenarioStatus) {
        if status == ScenarioStatus::Running {
            self.attempts += 1;
        }
        self.status = status;
        self.updated_at = crate::now_millis();
    }
}

/// Inbound request asking the orchestrator to run a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRunRequest {
    pub scenario_id: ScenarioId,
    /// Opaque to the orchestrator, handed to the strategy as bytes
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ScenarioRunRequest {
    pub fn new(scenario_id: impl Into<ScenarioId>, payload: serde_json::Value) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            payload,
        }
    }

    /// Payload bytes as the strategy sees them.
    ///
    /// JSON strings are passed through verbatim, `null` becomes an empty
    /// payload and any other value is re-encoded as JSON.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            serde_json::Value::Null => Vec::new(),
            serde_json::Value::String(s) => s.as_bytes().to_vec(),
            other => serde_json::to_vec(other).unwrap_or_default(),
        }
    }
}

/// Outbound notification of one status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub scenario_id: ScenarioId,
    pub old_status: ScenarioStatus,
    pub new_status: ScenarioStatus,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl LifecycleEvent {
    pub fn new(scenario_id: impl Into<ScenarioId>, old: ScenarioStatus, new: ScenarioStatus) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            old_status: old,
            new_status: new,
            timestamp: crate::now_millis(),
        }
    }
}

/// A request the dispatcher gave up on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Decoded request, when decoding succeeded
    pub request: Option<ScenarioRunRequest>,
    /// Raw sample text, kept when the request could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub reason: String,
    pub timestamp: u64,
}

/// Where an active scenario currently is inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivePhase {
    /// Registered, waiting for a slot
    Queued,
    /// Holding a slot
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveScenario {
    pub scenario_id: ScenarioId,
    pub phase: ActivePhase,
    /// When the scenario entered its current phase (Unix ms)
    pub since_ms: u64,
}

/// Snapshot served by the control surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatusResponse {
    pub occupancy: usize,
    pub max_concurrency: usize,
    pub shutting_down: bool,
    pub active: Vec<ActiveScenario>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScenarioStatus::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Cancelled).unwrap(), "\"cancelled\"");
        let status: ScenarioStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(status, Succeeded);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Running".parse::<ScenarioStatus>().unwrap(), Running);
        assert!("done".parse::<ScenarioStatus>().is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Running));

        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Running.can_transition_to(Running));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!Pending.is_terminal());
        assert!(!Running.is_terminal());
        assert!(Succeeded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn test_apply_status_counts_attempts() {
        let mut record = ScenarioRecord::new("s1", Pending);
        record.apply_status(Running);
        record.apply_status(Failed);
        record.apply_status(Running);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.status, Running);
    }

    #[test]
    fn test_request_without_payload() {
        let request: ScenarioRunRequest =
            serde_json::from_str(r#"{"scenario_id":"a"}"#).unwrap();
        assert_eq!(request.scenario_id, "a");
        assert!(request.payload_bytes().is_empty());
    }

    #[test]
    fn test_request_payload_bytes() {
        let request = ScenarioRunRequest::new("a", serde_json::json!("raw text"));
        assert_eq!(request.payload_bytes(), b"raw text");

        let request = ScenarioRunRequest::new("a", serde_json::json!({"steps": []}));
        assert_eq!(request.payload_bytes(), br#"{"steps":[]}"#);
    }

    #[test]
    fn test_lifecycle_event_wire_format() {
        let event = LifecycleEvent {
            scenario_id: "a".into(),
            old_status: Running,
            new_status: Succeeded,
            timestamp: 42,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "scenario_id": "a",
                "old_status": "running",
                "new_status": "succeeded",
                "timestamp": 42
            })
        );
    }
}
