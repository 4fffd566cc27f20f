//! Zenoh-based scenario record storage.
//!
//! Records are stored as JSON under
//! `orchestrator/storage/{instance}/scenarios/{scenario_id}`. Durability comes
//! from a Zenoh storage (for example a `zenohd` storage plugin) subscribed to
//! that prefix. This instance is the only writer for its prefix, so it keeps
//! the records it wrote in a local cache and only queries the bus for ids it
//! has not seen since start-up.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::key_expr::OwnedKeyExpr;

use orchestrator_shared::errors::StorageError;
use orchestrator_shared::scenario::{ScenarioRecord, ScenarioStatus};
use orchestrator_shared::{qos, topics};

use super::ports::{PortFuture, ScenarioRepository, StatusUpdater};

/// Zenoh-backed [`ScenarioRepository`]
pub struct ZenohScenarioStorage {
    session: Session,
    instance: String,
    storage_prefix: OwnedKeyExpr,
    query_timeout: Duration,
    cache: Mutex<HashMap<String, ScenarioRecord>>,
}

impl ZenohScenarioStorage {
    pub fn new(session: Session, instance: &str) -> Self {
        let storage_prefix = topics::scenario_storage_prefix(instance);
        info!(
            "Initializing scenario storage with prefix: {}",
            storage_prefix.as_str()
        );

        Self {
            session,
            instance: instance.to_string(),
            storage_prefix,
            query_timeout: Duration::from_millis(qos::QUERY_TIMEOUT_MS),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, ScenarioRecord>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scenario_key(&self, scenario_id: &str) -> Result<OwnedKeyExpr, StorageError> {
        topics::scenario_record(&self.instance, scenario_id).map_err(|e| {
            StorageError::InvalidKey {
                key: scenario_id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Runs a get on `selector` and decodes every reply as a record
    async fn query_records(&self, selector: &str) -> Result<Vec<ScenarioRecord>, StorageError> {
        let replies = self
            .session
            .get(selector)
            .timeout(self.query_timeout)
            .await
            .map_err(|e| StorageError::backend(format!("Failed to query '{}': {}", selector, e)))?;

        let mut records = Vec::new();
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    match serde_json::from_slice::<ScenarioRecord>(
                        sample.payload().to_bytes().as_ref(),
                    ) {
                        Ok(record) => records.push(record),
                        Err(e) => warn!(
                            "Failed to deserialize scenario record from key '{}': {}",
                            sample.key_expr(),
                            e
                        ),
                    }
                }
                Err(e) => warn!("Error in get reply for '{}': {:?}", selector, e),
            }
        }

        Ok(records)
    }

    async fn fetch_record(&self, scenario_id: &str) -> Result<Option<ScenarioRecord>, StorageError> {
        let cached = self.cache().get(scenario_id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let key = self.scenario_key(scenario_id)?;
        debug!("Retrieving scenario record '{}' from key: {}", scenario_id, key);

        let mut records = self.query_records(key.as_str()).await?;
        if records.len() > 1 {
            warn!(
                "Found {} records for key '{}', keeping the most recent",
                records.len(),
                key
            );
        }
        records.sort_by_key(|r| r.updated_at);
        let record = records.pop();

        if let Some(record) = &record {
            self.cache()
                .entry(scenario_id.to_string())
                .or_insert_with(|| record.clone());
        }
        Ok(record)
    }

    async fn write_status(
        &self,
        scenario_id: &str,
        status: ScenarioStatus,
    ) -> Result<(), StorageError> {
        let key = self.scenario_key(scenario_id)?;

        let mut record = self
            .fetch_record(scenario_id)
            .await?
            .unwrap_or_else(|| ScenarioRecord::new(scenario_id, ScenarioStatus::Pending));
        record.apply_status(status);

        let value = serde_json::to_vec(&record)?;
        debug!(
            "Storing scenario '{}' as {} ({} bytes) at key: {}",
            scenario_id,
            status,
            value.len(),
            key
        );

        self.session
            .put(&key, value)
            .await
            .map_err(|e| {
                StorageError::backend(format!("Failed to store scenario '{}': {}", scenario_id, e))
            })?;

        self.cache().insert(scenario_id.to_string(), record);
        Ok(())
    }
}

impl StatusUpdater for ZenohScenarioStorage {
    fn update_scenario_status<'a>(
        &'a self,
        scenario_id: &'a str,
        status: ScenarioStatus,
    ) -> PortFuture<'a, Result<(), StorageError>> {
        Box::pin(self.write_status(scenario_id, status))
    }
}

impl ScenarioRepository for ZenohScenarioStorage {
    fn load_scenario<'a>(
        &'a self,
        scenario_id: &'a str,
    ) -> PortFuture<'a, Result<Option<ScenarioRecord>, StorageError>> {
        Box::pin(self.fetch_record(scenario_id))
    }

    fn list_scenarios_with_status(
        &self,
        status: ScenarioStatus,
    ) -> PortFuture<'_, Result<Vec<ScenarioRecord>, StorageError>> {
        Box::pin(async move {
            let pattern = format!("{}/*", self.storage_prefix);
            debug!("Listing scenario records with pattern: {}", pattern);

            let mut by_id: HashMap<String, ScenarioRecord> = HashMap::new();
            for record in self.query_records(&pattern).await? {
                match by_id.get(&record.id) {
                    Some(existing) if existing.updated_at >= record.updated_at => {}
                    _ => {
                        by_id.insert(record.id.clone(), record);
                    }
                }
            }
            // Local writes are authoritative
            let cached: Vec<ScenarioRecord> = self.cache().values().cloned().collect();
            for record in cached {
                by_id.insert(record.id.clone(), record);
            }

            let mut records: Vec<ScenarioRecord> = by_id
                .into_values()
                .filter(|r| r.status == status)
                .collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_shared::ZenohConfig;

    async fn isolated_session() -> Session {
        let config = ZenohConfig::new_peer()
            .disable_multicast_scouting()
            .to_zenoh_config()
            .unwrap();
        zenoh::open(config).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_then_load_uses_local_record() {
        let session = isolated_session().await;
        let storage = ZenohScenarioStorage::new(session.clone(), "test");

        storage
            .update_scenario_status("s1", ScenarioStatus::Running)
            .await
            .unwrap();
        storage
            .update_scenario_status("s1", ScenarioStatus::Succeeded)
            .await
            .unwrap();

        let record = storage.load_scenario("s1").await.unwrap().unwrap();
        assert_eq!(record.status, ScenarioStatus::Succeeded);
        assert_eq!(record.attempts, 1);

        let succeeded = storage
            .list_scenarios_with_status(ScenarioStatus::Succeeded)
            .await
            .unwrap();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].id, "s1");

        session.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ids_that_are_not_key_chunks_are_rejected() {
        let session = isolated_session().await;
        let storage = ZenohScenarioStorage::new(session.clone(), "test");

        let err = storage
            .update_scenario_status("a/b", ScenarioStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));

        session.close().await.unwrap();
    }
}
