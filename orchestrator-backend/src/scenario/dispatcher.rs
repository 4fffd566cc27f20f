//! Inbound scenario-run requests.
//!
//! The dispatcher decodes requests from the bus and hands them to a
//! [`RequestHandler`] one at a time, so a pool waiting for a free slot
//! pushes back on the subscriber. Transient refusals are retried; anything
//! the dispatcher gives up on is republished as a [`DeadLetter`].

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zenoh::Session;

use orchestrator_shared::errors::{PoolError, PoolResult};
use orchestrator_shared::now_millis;
use orchestrator_shared::scenario::{DeadLetter, ScenarioRunRequest};

use super::pool::ScenarioPool;
use super::ports::{EventPublisher, PortFuture};
use crate::utils::{RetryConfig, retry_async};

/// Contract the core implements for the dispatcher
pub trait RequestHandler: Send + Sync {
    fn handle<'a>(&'a self, request: &'a ScenarioRunRequest) -> PortFuture<'a, PoolResult<()>>;
}

impl RequestHandler for ScenarioPool {
    fn handle<'a>(&'a self, request: &'a ScenarioRunRequest) -> PortFuture<'a, PoolResult<()>> {
        Box::pin(self.submit(&request.scenario_id, request.payload_bytes()))
    }
}

/// What happened to one inbound sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Admitted,
    /// Redelivery of a scenario that is still active
    Duplicate,
    /// Refused because the pool is stopping; left for the next instance
    ShuttingDown,
    DeadLettered { reason: String },
}

pub struct ScenarioDispatcher {
    handler: Arc<dyn RequestHandler>,
    dead_letters: Arc<dyn EventPublisher>,
    dead_letter_topic: String,
    retry: RetryConfig,
}

impl ScenarioDispatcher {
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        dead_letters: Arc<dyn EventPublisher>,
        dead_letter_topic: String,
        retry: RetryConfig,
    ) -> Self {
        Self {
            handler,
            dead_letters,
            dead_letter_topic,
            retry,
        }
    }

    /// Processes one raw request payload
    pub async fn dispatch(&self, raw: &[u8]) -> DispatchOutcome {
        let request: ScenarioRunRequest = match serde_json::from_slice(raw) {
            Ok(request) => request,
            Err(e) => {
                let reason = format!("Undecodable scenario request: {}", e);
                warn!("{}", reason);
                self.dead_letter(None, Some(String::from_utf8_lossy(raw).into_owned()), &reason)
                    .await;
                return DispatchOutcome::DeadLettered { reason };
            }
        };

        self.dispatch_request(request).await
    }

    #[instrument(skip(self, request), fields(scenario_id = %request.scenario_id))]
    pub async fn dispatch_request(&self, request: ScenarioRunRequest) -> DispatchOutcome {
        let result = retry_async(
            || self.handler.handle(&request),
            &self.retry,
            PoolError::is_transient,
            "submit scenario",
        )
        .await;

        match result {
            Ok(()) => {
                debug!("Scenario request admitted");
                DispatchOutcome::Admitted
            }
            Err(PoolError::AlreadyRunning { .. }) => {
                debug!("Duplicate delivery for an active scenario, acknowledging");
                DispatchOutcome::Duplicate
            }
            Err(PoolError::ShuttingDown) => {
                info!("Pool is shutting down, not admitting scenario request");
                DispatchOutcome::ShuttingDown
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Giving up on scenario request: {}", reason);
                self.dead_letter(Some(request), None, &reason).await;
                DispatchOutcome::DeadLettered { reason }
            }
        }
    }

    async fn dead_letter(&self, request: Option<ScenarioRunRequest>, raw: Option<String>, reason: &str) {
        let letter = DeadLetter {
            request,
            raw,
            reason: reason.to_string(),
            timestamp: now_millis(),
        };

        let payload = match serde_json::to_vec(&letter) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode dead letter: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .dead_letters
            .publish(&self.dead_letter_topic, payload)
            .await
        {
            error!("Failed to publish dead letter: {}", e);
        }
    }

    /// Consumes requests from `request_topic` until `shutdown` fires
    #[instrument(skip(self, session, shutdown))]
    pub async fn run_subscriber(
        &self,
        session: &Session,
        request_topic: &str,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let subscriber = session
            .declare_subscriber(request_topic)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to declare request subscriber: {}", e))?;

        info!("Scenario request subscriber started on topic: {}", request_topic);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stopping scenario request subscriber");
                    break;
                }
                sample = subscriber.recv_async() => match sample {
                    Ok(sample) => {
                        let payload = sample.payload().to_bytes();
                        let outcome = self.dispatch(&payload).await;
                        debug!(?outcome, "Processed request from {}", sample.key_expr());
                    }
                    Err(e) => {
                        warn!("Request subscriber closed: {}", e);
                        break;
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_shared::errors::PublishError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Refuses the first `saturated_for` calls with `PoolSaturated`
    struct SaturatedHandler {
        saturated_for: u32,
        calls: AtomicU32,
    }

    impl RequestHandler for SaturatedHandler {
        fn handle<'a>(&'a self, _request: &'a ScenarioRunRequest) -> PortFuture<'a, PoolResult<()>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.saturated_for {
                    Err(PoolError::PoolSaturated { max_concurrency: 1 })
                } else {
                    Ok(())
                }
            })
        }
    }

    #[derive(Default)]
    struct Letters(Mutex<Vec<(String, DeadLetter)>>);

    impl EventPublisher for Letters {
        fn publish<'a>(
            &'a self,
            topic: &'a str,
            payload: Vec<u8>,
        ) -> PortFuture<'a, Result<(), PublishError>> {
            Box::pin(async move {
                let letter: DeadLetter = serde_json::from_slice(&payload)?;
                self.0.lock().unwrap().push((topic.to_string(), letter));
                Ok(())
            })
        }
    }

    fn dispatcher(saturated_for: u32, attempts: u32) -> (ScenarioDispatcher, Arc<SaturatedHandler>, Arc<Letters>) {
        let handler = Arc::new(SaturatedHandler {
            saturated_for,
            calls: AtomicU32::new(0),
        });
        let letters = Arc::new(Letters::default());
        let dispatcher = ScenarioDispatcher::new(
            handler.clone(),
            letters.clone(),
            "scenario/dead-letter".to_string(),
            RetryConfig::default()
                .with_max_attempts(attempts)
                .with_initial_delay(Duration::from_millis(1)),
        );
        (dispatcher, handler, letters)
    }

    #[tokio::test]
    async fn test_saturation_is_retried() {
        let (dispatcher, handler, letters) = dispatcher(2, 5);
        let outcome = dispatcher.dispatch(br#"{"scenario_id":"a"}"#).await;

        assert_eq!(outcome, DispatchOutcome::Admitted);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(letters.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_dead_lettered() {
        let (dispatcher, handler, letters) = dispatcher(10, 3);
        let outcome = dispatcher
            .dispatch(br#"{"scenario_id":"a","payload":"x"}"#)
            .await;

        assert!(matches!(outcome, DispatchOutcome::DeadLettered { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        let letters = letters.0.lock().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].0, "scenario/dead-letter");
        let request = letters[0].1.request.as_ref().unwrap();
        assert_eq!(request.scenario_id, "a");
        assert!(letters[0].1.reason.contains("saturated"));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dead_lettered_with_raw_text() {
        let (dispatcher, handler, letters) = dispatcher(0, 3);
        let outcome = dispatcher.dispatch(b"{not json").await;

        assert!(matches!(outcome, DispatchOutcome::DeadLettered { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let letters = letters.0.lock().unwrap();
        assert!(letters[0].1.request.is_none());
        assert_eq!(letters[0].1.raw.as_deref(), Some("{not json"));
    }

    struct StoppingHandler;

    impl RequestHandler for StoppingHandler {
        fn handle<'a>(&'a self, _request: &'a ScenarioRunRequest) -> PortFuture<'a, PoolResult<()>> {
            Box::pin(async { Err(PoolError::ShuttingDown) })
        }
    }

    #[tokio::test]
    async fn test_shutdown_refusal_is_not_dead_lettered() {
        let letters = Arc::new(Letters::default());
        let dispatcher = ScenarioDispatcher::new(
            Arc::new(StoppingHandler),
            letters.clone(),
            "scenario/dead-letter".to_string(),
            RetryConfig::default().with_initial_delay(Duration::from_millis(1)),
        );

        let outcome = dispatcher.dispatch(br#"{"scenario_id":"a"}"#).await;

        assert_eq!(outcome, DispatchOutcome::ShuttingDown);
        assert!(letters.0.lock().unwrap().is_empty());
    }
}
