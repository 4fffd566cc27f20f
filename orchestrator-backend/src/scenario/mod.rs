//! Scenario execution module.
//!
//! This module provides the bounded worker pool at the core of the
//! orchestrator together with the adapters it talks to: record storage,
//! lifecycle event publishing, the inbound request dispatcher and the
//! bundled step-script strategy.

pub mod dispatcher;
pub mod memory;
pub mod pool;
pub mod ports;
pub mod publisher;
pub mod recovery;
pub mod registry;
pub mod storage;
pub mod strategy;

pub use dispatcher::{DispatchOutcome, RequestHandler, ScenarioDispatcher};
pub use memory::InMemoryScenarioRepository;
pub use pool::{ScenarioPool, ShutdownReport};
pub use ports::{
    EventPublisher, ExecutionContext, PortFuture, ScenarioRepository, ScenarioStrategy,
    StatusErrorHandler, StatusUpdater, log_status_errors, strategy_fn,
};
pub use publisher::{LifecycleEmitter, ZenohEventPublisher};
pub use recovery::RecoveryReport;
pub use registry::WorkerRegistry;
pub use storage::ZenohScenarioStorage;
pub use strategy::StepScriptStrategy;
