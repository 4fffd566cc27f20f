//! JSON5 step scripts.
//!
//! The bundled strategy treats a scenario payload as a short script of timed
//! steps, for example:
//!
//! ```json5
//! {
//!     steps: [
//!         { duration: "200ms", description: "warm up" },
//!         { duration: "1s", description: "load", fail: "backend unavailable" },
//!     ],
//! }
//! ```
//!
//! Durations use `duration-string` syntax (`50ms`, `5s`, `1m`).

use duration_string::DurationString;
use serde::Deserialize;
use std::time::Duration;

/// Parse a duration string like "50ms", "5s", "1m", "1h" into milliseconds
pub fn parse_duration_string(s: &str) -> Result<u64, String> {
    parse_duration(s).map(|d| d.as_millis() as u64)
}

/// Parse a duration string into a [`Duration`]
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let duration: DurationString = s
        .trim()
        .parse()
        .map_err(|e| format!("Invalid duration '{}': {}", s, e))?;
    Ok(duration.into())
}

/// Error type for step script parsing
#[derive(Debug, thiserror::Error)]
pub enum ScriptParseError {
    #[error("JSON5 parse error: {0}")]
    Json5Error(String),

    #[error("Payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("Validation error in step {step}: {message}")]
    StepError { step: usize, message: String },
}

/// Intermediate struct for JSON5 deserialization of a script
#[derive(Debug, Clone, Deserialize)]
struct StepScriptFile {
    #[serde(default)]
    steps: Vec<ScriptStepJson>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptStepJson {
    duration: String,
    #[serde(default)]
    description: String,
    fail: Option<String>,
}

/// A parsed step script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepScript {
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub duration: Duration,
    pub description: String,
    /// When set, the step fails with this message after its duration
    pub fail: Option<String>,
}

impl StepScript {
    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.duration).sum()
    }
}

/// Parse a step script from raw payload bytes.
///
/// An empty (or whitespace-only) payload is a script without steps.
pub fn parse_step_script(payload: &[u8]) -> Result<StepScript, ScriptParseError> {
    let text = std::str::from_utf8(payload)?;
    if text.trim().is_empty() {
        return Ok(StepScript::default());
    }

    let file: StepScriptFile =
        json5::from_str(text).map_err(|e| ScriptParseError::Json5Error(e.to_string()))?;

    let steps = file
        .steps
        .into_iter()
        .enumerate()
        .map(|(step, json)| {
            let duration = parse_duration(&json.duration)
                .map_err(|message| ScriptParseError::StepError { step, message })?;
            Ok(ScriptStep {
                duration,
                description: json.description,
                fail: json.fail,
            })
        })
        .collect::<Result<Vec<_>, ScriptParseError>>()?;

    Ok(StepScript { steps })
}
