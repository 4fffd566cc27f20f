//! Start-up sweep for scenarios left `running` by a previous process.
//!
//! A single orchestrator instance owns its records, so a `running` record
//! found before any submission was accepted cannot have a live worker.

use tracing::{info, instrument, warn};

use orchestrator_shared::errors::PoolResult;
use orchestrator_shared::scenario::ScenarioStatus;

use super::pool::ScenarioPool;
use crate::config::RecoveryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records found in `running`
    pub stuck: usize,
    /// Ids transitioned to `failed`
    pub failed: Vec<String>,
}

impl ScenarioPool {
    /// Resolves stuck `running` records according to `policy`.
    ///
    /// Must run before the dispatcher starts feeding the pool. Records the
    /// pool is currently executing are left alone.
    #[instrument(skip(self))]
    pub async fn recover_stuck(&self, policy: RecoveryPolicy) -> PoolResult<RecoveryReport> {
        let stuck = self
            .inner
            .repository
            .list_scenarios_with_status(ScenarioStatus::Running)
            .await?;

        let mut report = RecoveryReport {
            stuck: stuck.len(),
            failed: Vec::new(),
        };
        if stuck.is_empty() {
            return Ok(report);
        }

        match policy {
            RecoveryPolicy::Ignore => {
                warn!(
                    "Leaving {} scenario(s) in running state from a previous run",
                    stuck.len()
                );
            }
            RecoveryPolicy::Fail => {
                for record in stuck {
                    if self.is_active(&record.id) {
                        continue;
                    }
                    warn!(
                        scenario_id = %record.id,
                        attempts = record.attempts,
                        "Marking scenario left running by a previous process as failed"
                    );
                    self.record_transition(
                        &record.id,
                        ScenarioStatus::Running,
                        ScenarioStatus::Failed,
                    )
                    .await;
                    report.failed.push(record.id);
                }
                info!("Recovered {} stuck scenario(s)", report.failed.len());
            }
        }

        Ok(report)
    }
}
