//! Process-local scenario repository.
//!
//! Used with `--storage memory` and by the test-suite. Every write is kept in
//! a per-id history so tests can assert the exact status sequence.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use orchestrator_shared::errors::StorageError;
use orchestrator_shared::scenario::{ScenarioRecord, ScenarioStatus};

use super::ports::{PortFuture, ScenarioRepository, StatusUpdater};

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, ScenarioRecord>,
    history: HashMap<String, Vec<ScenarioStatus>>,
}

#[derive(Debug, Default)]
pub struct InMemoryScenarioRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryScenarioRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a record as a submitter would before publishing its request
    pub fn seed(&self, record: ScenarioRecord) {
        let mut state = self.lock();
        state
            .history
            .entry(record.id.clone())
            .or_default()
            .push(record.status);
        state.records.insert(record.id.clone(), record);
    }

    /// Every status written for `scenario_id`, oldest first
    pub fn status_history(&self, scenario_id: &str) -> Vec<ScenarioStatus> {
        self.lock()
            .history
            .get(scenario_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record(&self, scenario_id: &str) -> Option<ScenarioRecord> {
        self.lock().records.get(scenario_id).cloned()
    }
}

impl StatusUpdater for InMemoryScenarioRepository {
    fn update_scenario_status<'a>(
        &'a self,
        scenario_id: &'a str,
        status: ScenarioStatus,
    ) -> PortFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut state = self.lock();
            // Unknown ids start as pending, the state a submitter leaves them in
            state
                .records
                .entry(scenario_id.to_string())
                .or_insert_with(|| ScenarioRecord::new(scenario_id, ScenarioStatus::Pending))
                .apply_status(status);
            state
                .history
                .entry(scenario_id.to_string())
                .or_default()
                .push(status);
            Ok(())
        })
    }
}

impl ScenarioRepository for InMemoryScenarioRepository {
    fn load_scenario<'a>(
        &'a self,
        scenario_id: &'a str,
    ) -> PortFuture<'a, Result<Option<ScenarioRecord>, StorageError>> {
        Box::pin(async move { Ok(self.record(scenario_id)) })
    }

    fn list_scenarios_with_status(
        &self,
        status: ScenarioStatus,
    ) -> PortFuture<'_, Result<Vec<ScenarioRecord>, StorageError>> {
        Box::pin(async move {
            let mut records: Vec<ScenarioRecord> = self
                .lock()
                .records
                .values()
                .filter(|r| r.status == status)
                .cloned()
                .collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_id_is_created_on_first_write() {
        let repo = InMemoryScenarioRepository::new();
        repo.update_scenario_status("a", ScenarioStatus::Running)
            .await
            .unwrap();

        let record = repo.load_scenario("a").await.unwrap().unwrap();
        assert_eq!(record.status, ScenarioStatus::Running);
        assert_eq!(record.attempts, 1);
        assert_eq!(repo.status_history("a"), vec![ScenarioStatus::Running]);
    }

    #[tokio::test]
    async fn test_attempts_grow_with_each_run() {
        let repo = InMemoryScenarioRepository::new();
        repo.seed(ScenarioRecord::new("a", ScenarioStatus::Pending));
        for status in [
            ScenarioStatus::Running,
            ScenarioStatus::Failed,
            ScenarioStatus::Running,
            ScenarioStatus::Succeeded,
        ] {
            repo.update_scenario_status("a", status).await.unwrap();
        }

        let record = repo.record("a").unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.status, ScenarioStatus::Succeeded);
        assert_eq!(repo.status_history("a").len(), 5);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let repo = InMemoryScenarioRepository::new();
        repo.seed(ScenarioRecord::new("b", ScenarioStatus::Running));
        repo.seed(ScenarioRecord::new("a", ScenarioStatus::Running));
        repo.seed(ScenarioRecord::new("c", ScenarioStatus::Succeeded));

        let running = repo
            .list_scenarios_with_status(ScenarioStatus::Running)
            .await
            .unwrap();
        let ids: Vec<&str> = running.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(repo.load_scenario("missing").await.unwrap().is_none());
    }
}
