//! Live-worker registry.
//!
//! Tracks every scenario id the pool currently owns, from the moment a
//! submission is accepted until its worker has recorded a final status.
//! Holding a [`RegistrationGuard`] is what makes an id "active"; dropping it
//! frees the id for a fresh submission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use orchestrator_shared::now_millis;
use orchestrator_shared::scenario::{ActivePhase, ActiveScenario};

#[derive(Debug, Clone, Copy)]
struct ActiveEntry {
    phase: ActivePhase,
    since_ms: u64,
}

/// Shared map of active scenario ids
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    entries: Arc<Mutex<HashMap<String, ActiveEntry>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are plain data, a panic while holding the lock cannot leave
    // them half-updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `scenario_id`, or returns `None` if it is already active
    pub fn try_register(&self, scenario_id: &str) -> Option<RegistrationGuard> {
        let mut entries = self.lock();
        if entries.contains_key(scenario_id) {
            return None;
        }
        entries.insert(
            scenario_id.to_string(),
            ActiveEntry {
                phase: ActivePhase::Queued,
                since_ms: now_millis(),
            },
        );

        Some(RegistrationGuard {
            registry: self.clone(),
            scenario_id: scenario_id.to_string(),
        })
    }

    pub fn is_active(&self, scenario_id: &str) -> bool {
        self.lock().contains_key(scenario_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Active scenarios sorted by id
    pub fn snapshot(&self) -> Vec<ActiveScenario> {
        let mut active: Vec<ActiveScenario> = self
            .lock()
            .iter()
            .map(|(id, entry)| ActiveScenario {
                scenario_id: id.clone(),
                phase: entry.phase,
                since_ms: entry.since_ms,
            })
            .collect();
        active.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
        active
    }
}

/// Ownership of one active scenario id
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: WorkerRegistry,
    scenario_id: String,
}

impl RegistrationGuard {
    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    /// Records that the scenario obtained a slot
    pub fn mark_running(&self) {
        if let Some(entry) = self.registry.lock().get_mut(&self.scenario_id) {
            entry.phase = ActivePhase::Running;
            entry.since_ms = now_millis();
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.scenario_id);
    }
}
