//! Bounded-concurrency scenario execution engine.
//!
//! Every admitted scenario runs in its own tokio task holding one semaphore
//! permit (a *slot*). The pool persists each status transition through the
//! repository and queues the matching lifecycle event, and it guarantees that
//! an id is executed by at most one worker at a time.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use orchestrator_shared::errors::{PoolError, PoolResult};
use orchestrator_shared::scenario::{
    ActiveScenario, LifecycleEvent, PoolStatusResponse, ScenarioStatus,
};

use super::ports::{ExecutionContext, ScenarioRepository, ScenarioStrategy, StatusErrorHandler};
use super::publisher::LifecycleEmitter;
use super::registry::{RegistrationGuard, WorkerRegistry};
use crate::config::{AdmissionPolicy, ExecutionMode, PoolConfig};

/// What a call to [`ScenarioPool::shutdown`] observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Active scenarios when shutdown started (queued ones included)
    pub in_flight: usize,
    /// Whether every worker finished before the deadline
    pub drained: bool,
    /// Whether remaining workers had to be asked to cancel
    pub cancellation_signalled: bool,
    /// Lifecycle events abandoned because the publisher did not drain in time
    pub dropped_events: usize,
}

/// Time the event queue always gets to drain, even past the deadline, so the
/// transitions recorded by cancelled workers still go out.
const MIN_EVENT_FLUSH: Duration = Duration::from_millis(250);

pub(super) struct PoolInner {
    config: PoolConfig,
    slots: Arc<Semaphore>,
    registry: WorkerRegistry,
    pub(super) repository: Arc<dyn ScenarioRepository>,
    strategy: Arc<dyn ScenarioStrategy>,
    events: LifecycleEmitter,
    on_status_error: StatusErrorHandler,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Handle to the worker pool; cheap to clone
#[derive(Clone)]
pub struct ScenarioPool {
    pub(super) inner: Arc<PoolInner>,
}

impl ScenarioPool {
    pub fn new(
        config: PoolConfig,
        repository: Arc<dyn ScenarioRepository>,
        events: LifecycleEmitter,
        strategy: Arc<dyn ScenarioStrategy>,
        on_status_error: StatusErrorHandler,
    ) -> Self {
        info!(
            "Creating scenario pool: max_concurrency={}, admission={}, mode={}",
            config.max_concurrency, config.admission_policy, config.mode
        );

        Self {
            inner: Arc::new(PoolInner {
                slots: Arc::new(Semaphore::new(config.max_concurrency)),
                config,
                registry: WorkerRegistry::new(),
                repository,
                strategy,
                events,
                on_status_error,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Submits a scenario for execution.
    ///
    /// Returns once the scenario is admitted (or, in sync mode, once it
    /// finished). A scenario that is already queued or running is refused
    /// with [`PoolError::AlreadyRunning`].
    #[instrument(skip(self, payload))]
    pub async fn submit(&self, scenario_id: &str, payload: Vec<u8>) -> PoolResult<()> {
        let inner = &self.inner;

        if scenario_id.is_empty() {
            return Err(PoolError::InvalidScenarioId);
        }

        // Counts as a tracked task so a concurrent shutdown waits for the
        // admission below to either spawn its worker or give up.
        let admission = inner.tracker.token();
        if inner.slots.is_closed() {
            return Err(PoolError::ShuttingDown);
        }

        let registration =
            inner
                .registry
                .try_register(scenario_id)
                .ok_or_else(|| PoolError::AlreadyRunning {
                    scenario_id: scenario_id.to_string(),
                })?;

        let slot = self.acquire_slot().await?;
        registration.mark_running();

        if let Err(e) = inner
            .repository
            .update_scenario_status(scenario_id, ScenarioStatus::Running)
            .await
        {
            (inner.on_status_error)(scenario_id, ScenarioStatus::Running, &e);
            return Err(PoolError::Persistence(e));
        }
        inner.events.emit(LifecycleEvent::new(
            scenario_id,
            ScenarioStatus::Pending,
            ScenarioStatus::Running,
        ));

        debug!("Admitted, occupancy {}/{}", self.occupancy(), self.max_concurrency());

        let lease = WorkerLease {
            registration,
            _slot: slot,
        };
        let worker = run_worker(inner.clone(), lease, payload);
        let handle = inner.tracker.spawn(worker);
        drop(admission);

        if inner.config.mode == ExecutionMode::Sync {
            if let Err(e) = handle.await {
                error!("Worker task failed to complete: {}", e);
            }
        }

        Ok(())
    }

    async fn acquire_slot(&self) -> PoolResult<OwnedSemaphorePermit> {
        let slots = self.inner.slots.clone();
        match self.inner.config.admission_policy {
            AdmissionPolicy::Reject => slots.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => PoolError::PoolSaturated {
                    max_concurrency: self.inner.config.max_concurrency,
                },
                TryAcquireError::Closed => PoolError::ShuttingDown,
            }),
            AdmissionPolicy::Block => slots
                .acquire_owned()
                .await
                .map_err(|_| PoolError::ShuttingDown),
        }
    }

    /// Stops admission and drains in-flight work.
    ///
    /// Workers still running when `deadline` expires are cancelled and
    /// awaited until they recorded their final status. Queued lifecycle
    /// events get the rest of the deadline (at least [`MIN_EVENT_FLUSH`]) to
    /// be published. Calling this again is harmless.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, deadline: Duration) -> PoolResult<ShutdownReport> {
        let inner = &self.inner;
        let started = Instant::now();
        let in_flight = inner.registry.len();
        info!("Shutting down scenario pool with {} active scenario(s)", in_flight);

        inner.slots.close();
        inner.tracker.close();

        let drained = match tokio::time::timeout(deadline, inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "Shutdown deadline of {:?} expired, cancelling {} scenario(s)",
                    deadline,
                    inner.registry.len()
                );
                inner.shutdown.cancel();
                inner.tracker.wait().await;
                false
            }
        };

        let flush_limit = deadline
            .saturating_sub(started.elapsed())
            .max(MIN_EVENT_FLUSH);
        let dropped_events = inner.events.flush(flush_limit).await;
        info!("Scenario pool stopped");

        Ok(ShutdownReport {
            in_flight,
            drained,
            cancellation_signalled: !drained,
            dropped_events,
        })
    }

    /// Number of slots currently held
    pub fn occupancy(&self) -> usize {
        self.inner
            .config
            .max_concurrency
            .saturating_sub(self.inner.slots.available_permits())
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.config.max_concurrency
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.slots.is_closed()
    }

    pub fn active_scenarios(&self) -> Vec<ActiveScenario> {
        self.inner.registry.snapshot()
    }

    /// Whether `scenario_id` is queued or running in this pool
    pub fn is_active(&self, scenario_id: &str) -> bool {
        self.inner.registry.is_active(scenario_id)
    }

    pub fn status(&self) -> PoolStatusResponse {
        PoolStatusResponse {
            occupancy: self.occupancy(),
            max_concurrency: self.max_concurrency(),
            shutting_down: self.is_shutting_down(),
            active: self.active_scenarios(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Persists `to` and queues the matching event.
    ///
    /// A failed write goes to the status-error handler; the event is emitted
    /// either way.
    pub(super) async fn record_transition(
        &self,
        scenario_id: &str,
        from: ScenarioStatus,
        to: ScenarioStatus,
    ) {
        self.inner.record_transition(scenario_id, from, to).await
    }
}

impl PoolInner {
    async fn record_transition(&self, scenario_id: &str, from: ScenarioStatus, to: ScenarioStatus) {
        if let Err(e) = self.repository.update_scenario_status(scenario_id, to).await {
            (self.on_status_error)(scenario_id, to, &e);
        }
        self.events.emit(LifecycleEvent::new(scenario_id, from, to));
    }
}

/// What a worker owns until it has recorded its final status.
///
/// Fields drop in declaration order: the id is freed, then the slot.
struct WorkerLease {
    registration: RegistrationGuard,
    _slot: OwnedSemaphorePermit,
}

#[instrument(skip_all, fields(scenario_id = %lease.registration.scenario_id()))]
async fn run_worker(inner: Arc<PoolInner>, lease: WorkerLease, payload: Vec<u8>) {
    let scenario_id = lease.registration.scenario_id();

    let attempt = match inner.repository.load_scenario(scenario_id).await {
        Ok(Some(record)) if record.status == ScenarioStatus::Running => record.attempts,
        Ok(Some(record)) => {
            let err = PoolError::Consistency {
                scenario_id: scenario_id.to_string(),
                message: format!("expected status running, found {}", record.status),
            };
            error!("Aborting run: {}", err);
            return;
        }
        Ok(None) => {
            let err = PoolError::Consistency {
                scenario_id: scenario_id.to_string(),
                message: "record disappeared after admission".to_string(),
            };
            error!("Aborting run: {}", err);
            return;
        }
        // A failed read is a storage problem rather than an inconsistency, so
        // the record is not left running.
        Err(e) => {
            error!("Failed to load scenario record: {}", e);
            inner
                .record_transition(scenario_id, ScenarioStatus::Running, ScenarioStatus::Failed)
                .await;
            return;
        }
    };

    let cancel = inner.shutdown.child_token();
    let ctx = ExecutionContext::new(scenario_id, attempt, cancel.clone());
    let execution = AssertUnwindSafe(inner.strategy.execute(ctx, &payload)).catch_unwind();
    tokio::pin!(execution);

    let outcome = match inner.config.scenario_timeout {
        None => execution.await,
        Some(limit) => match tokio::time::timeout(limit, &mut execution).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Scenario exceeded its {:?} timeout, cancelling", limit);
                cancel.cancel();
                execution.await
            }
        },
    };

    let final_status = match outcome {
        Ok(Ok(())) => {
            info!("Scenario succeeded");
            ScenarioStatus::Succeeded
        }
        Ok(Err(e)) if cancel.is_cancelled() => {
            info!("Scenario cancelled: {}", e);
            ScenarioStatus::Cancelled
        }
        Ok(Err(e)) => {
            let err = PoolError::Strategy(e);
            error!("Scenario failed: {}", err);
            ScenarioStatus::Failed
        }
        Err(panic) => {
            error!("Scenario strategy panicked: {}", panic_message(panic.as_ref()));
            ScenarioStatus::Failed
        }
    };

    inner
        .record_transition(scenario_id, ScenarioStatus::Running, final_status)
        .await;
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
