use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use zenoh::Session;

use orchestrator_backend::config::{ConfigManager, StorageBackend, ZenohConfigManager};
use orchestrator_backend::control::{self, ControlState};
use orchestrator_backend::scenario::{
    InMemoryScenarioRepository, LifecycleEmitter, ScenarioDispatcher, ScenarioPool,
    ScenarioRepository, StepScriptStrategy, ZenohEventPublisher, ZenohScenarioStorage,
    log_status_errors,
};
use orchestrator_backend::utils::RetryConfig;
use orchestrator_shared::errors::OrchestratorError;
use orchestrator_shared::{qos, topics};

/// How long background tasks get to stop once the pool has drained
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct OrchestratorBackend {
    session: Session,
    _liveliness_token: zenoh::liveliness::LivelinessToken,
    config: ConfigManager,
    pool: ScenarioPool,
    repository: Arc<dyn ScenarioRepository>,
    dispatcher: Arc<ScenarioDispatcher>,
    shutdown: CancellationToken,
}

impl OrchestratorBackend {
    #[instrument(skip(config), fields(instance = %config.app.instance_name))]
    async fn new(config: ConfigManager) -> Result<Self> {
        let zenoh_config =
            config
                .zenoh
                .to_zenoh_config()
                .map_err(|e| OrchestratorError::ZenohError {
                    message: format!("Zenoh configuration error: {}", e),
                })?;

        let session = zenoh::open(zenoh_config)
            .await
            .map_err(|e| OrchestratorError::ZenohError {
                message: format!("Failed to open Zenoh session: {}", e),
            })?;
        info!(
            "Zenoh session opened with mode: {:?}, endpoints: {:?}",
            config.zenoh.mode, config.zenoh.endpoints
        );

        let health_topic = topics::orchestrator_health(&config.app.instance_name);
        let liveliness_token = session
            .liveliness()
            .declare_token(&health_topic)
            .await
            .map_err(|e| OrchestratorError::ZenohError {
                message: format!("Failed to declare liveliness: {}", e),
            })?;
        info!(
            "Orchestrator '{}' health liveliness declared on topic: {}",
            config.app.instance_name,
            health_topic.as_str()
        );

        let repository: Arc<dyn ScenarioRepository> = match config.app.storage {
            StorageBackend::Zenoh => Arc::new(ZenohScenarioStorage::new(
                session.clone(),
                &config.app.instance_name,
            )),
            StorageBackend::Memory => {
                warn!("Using in-memory scenario storage, records will not survive a restart");
                Arc::new(InMemoryScenarioRepository::new())
            }
        };

        let events = LifecycleEmitter::new(
            Arc::new(ZenohEventPublisher::new(
                session.clone(),
                qos::LIFECYCLE_EVENTS,
            )),
            config.app.event_topic.clone(),
        );

        let pool = ScenarioPool::new(
            config.pool.clone(),
            repository.clone(),
            events,
            Arc::new(StepScriptStrategy::new()),
            log_status_errors(),
        );

        let dispatcher = Arc::new(ScenarioDispatcher::new(
            Arc::new(pool.clone()),
            Arc::new(ZenohEventPublisher::new(session.clone(), qos::DEAD_LETTERS)),
            config.app.dead_letter_topic.clone(),
            RetryConfig::default().with_max_attempts(config.app.dispatch_retry_attempts),
        ));

        Ok(Self {
            session,
            _liveliness_token: liveliness_token,
            config,
            pool,
            repository,
            dispatcher,
            shutdown: CancellationToken::new(),
        })
    }

    async fn run(self) -> Result<()> {
        let report = self
            .pool
            .recover_stuck(self.config.pool.recover_stuck)
            .await
            .context("Start-up recovery sweep failed")?;
        if report.stuck > 0 {
            info!(
                "Recovery sweep found {} stuck scenario(s), failed {}",
                report.stuck,
                report.failed.len()
            );
        }

        let mut dispatcher_task = {
            let dispatcher = self.dispatcher.clone();
            let session = self.session.clone();
            let topic = self.config.app.request_topic.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { dispatcher.run_subscriber(&session, &topic, shutdown).await })
        };

        let mut http_task = tokio::spawn(control::serve(
            self.config.app.http_addr,
            ControlState {
                pool: self.pool.clone(),
                repository: self.repository.clone(),
                shutdown: self.shutdown.clone(),
            },
            self.shutdown.clone(),
        ));

        info!(
            "Orchestrator '{}' ready: requests on '{}', events on '{}'",
            self.config.app.instance_name,
            self.config.app.request_topic,
            self.config.app.event_topic
        );

        tokio::select! {
            () = shutdown_signal() => {}
            () = self.shutdown.cancelled() => {
                info!("Shutdown requested through the control surface");
            }
            result = &mut dispatcher_task => {
                error!("Request dispatcher stopped unexpectedly: {:?}", result);
            }
            result = &mut http_task => {
                error!("Control surface stopped unexpectedly: {:?}", result);
            }
        }
        self.shutdown.cancel();

        let report = self.pool.shutdown(self.config.pool.shutdown_timeout).await?;
        info!(
            "Pool drained: in_flight={}, drained={}, cancelled={}",
            report.in_flight, report.drained, report.cancellation_signalled
        );
        if report.dropped_events > 0 {
            warn!("{} lifecycle event(s) were not published before exit", report.dropped_events);
        }

        for (name, task) in [("dispatcher", dispatcher_task), ("control surface", http_task)] {
            if task.is_finished() {
                continue;
            }
            if tokio::time::timeout(TASK_STOP_TIMEOUT, task).await.is_err() {
                warn!("Timed out waiting for the {} to stop", name);
            }
        }

        self.session
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
        info!("Orchestrator stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_manager = ConfigManager::from_cli_and_env()?;
    config_manager.validate()?;
    config_manager.init_logging()?;

    ZenohConfigManager::validate_and_report(&config_manager.zenoh)?;
    if ZenohConfigManager::is_isolated(&config_manager.zenoh) {
        warn!("Multicast scouting is disabled and no endpoints are configured");
    }

    info!(
        "Starting orchestrator-backend '{}' (max_concurrency={}, admission={}, mode={})",
        config_manager.app.instance_name,
        config_manager.pool.max_concurrency,
        config_manager.pool.admission_policy,
        config_manager.pool.mode
    );

    let backend = OrchestratorBackend::new(config_manager).await?;
    backend.run().await
}
