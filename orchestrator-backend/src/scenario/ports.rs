//! Collaborator contracts of the scenario pool.
//!
//! The pool only talks to the outside world through these traits: a status
//! store, an event sink and the scenario strategy. Concrete adapters live in
//! [`super::storage`], [`super::memory`], [`super::publisher`] and
//! [`super::strategy`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use orchestrator_shared::errors::{PublishError, StorageError, StrategyError};
use orchestrator_shared::scenario::{ScenarioRecord, ScenarioStatus};

/// Boxed future returned by the collaborator traits
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability to persist one status transition as a single atomic write
pub trait StatusUpdater: Send + Sync {
    fn update_scenario_status<'a>(
        &'a self,
        scenario_id: &'a str,
        status: ScenarioStatus,
    ) -> PortFuture<'a, Result<(), StorageError>>;
}

/// Durable record store for scenarios
pub trait ScenarioRepository: StatusUpdater {
    fn load_scenario<'a>(
        &'a self,
        scenario_id: &'a str,
    ) -> PortFuture<'a, Result<Option<ScenarioRecord>, StorageError>>;

    fn list_scenarios_with_status(
        &self,
        status: ScenarioStatus,
    ) -> PortFuture<'_, Result<Vec<ScenarioRecord>, StorageError>>;
}

/// Outbound channel to the message bus
pub trait EventPublisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: Vec<u8>,
    ) -> PortFuture<'a, Result<(), PublishError>>;
}

/// Context handed to a strategy for one execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub scenario_id: String,
    /// Attempt number as persisted by the repository (1 for the first run)
    pub attempt: u32,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(scenario_id: impl Into<String>, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            attempt,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once shutdown or the scenario timeout asks the run to stop
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Opaque scenario body invoked by the pool
pub trait ScenarioStrategy: Send + Sync {
    fn execute<'a>(
        &'a self,
        ctx: ExecutionContext,
        payload: &'a [u8],
    ) -> PortFuture<'a, Result<(), StrategyError>>;
}

/// Adapts an async closure into a [`ScenarioStrategy`]
pub struct FnStrategy<F>(F);

/// Wraps `f` as a strategy; mostly useful for tests and small embeddings
pub fn strategy_fn<F, Fut>(f: F) -> FnStrategy<F>
where
    F: Fn(ExecutionContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StrategyError>> + Send + 'static,
{
    FnStrategy(f)
}

impl<F, Fut> ScenarioStrategy for FnStrategy<F>
where
    F: Fn(ExecutionContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StrategyError>> + Send + 'static,
{
    fn execute<'a>(
        &'a self,
        ctx: ExecutionContext,
        payload: &'a [u8],
    ) -> PortFuture<'a, Result<(), StrategyError>> {
        Box::pin((self.0)(ctx, payload.to_vec()))
    }
}

/// Callback receiving status writes that failed after admission
pub type StatusErrorHandler = Arc<dyn Fn(&str, ScenarioStatus, &StorageError) + Send + Sync>;

/// Handler that only logs, used when the embedder does not supply one
pub fn log_status_errors() -> StatusErrorHandler {
    Arc::new(|scenario_id, status, err| {
        error!(
            scenario_id = %scenario_id,
            status = %status,
            "Failed to persist scenario status: {}",
            err
        );
    })
}
