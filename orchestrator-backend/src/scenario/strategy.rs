//! Bundled scenario strategy: timed step scripts.

use tokio::time::sleep;
use tracing::{debug, info, instrument};

use orchestrator_shared::errors::StrategyError;
use orchestrator_shared::script::parse_step_script;

use super::ports::{ExecutionContext, PortFuture, ScenarioStrategy};

/// Runs a JSON5 step script, sleeping through each step.
///
/// A step with `fail` set fails the run once its duration has elapsed. An
/// empty payload is a no-op run.
#[derive(Debug, Clone, Default)]
pub struct StepScriptStrategy;

impl StepScriptStrategy {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, ctx, payload), fields(scenario_id = %ctx.scenario_id, attempt = ctx.attempt))]
    async fn run(&self, ctx: ExecutionContext, payload: &[u8]) -> Result<(), StrategyError> {
        let script = parse_step_script(payload).map_err(|e| StrategyError::InvalidPayload {
            message: e.to_string(),
        })?;

        info!(
            "Running {} step(s), about {:?}",
            script.steps.len(),
            script.total_duration()
        );

        for (index, step) in script.steps.iter().enumerate() {
            debug!("Step {}: {} ({:?})", index + 1, step.description, step.duration);

            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Cancelled during step {}", index + 1);
                    return Err(StrategyError::Cancelled);
                }
                _ = sleep(step.duration) => {}
            }

            if let Some(message) = &step.fail {
                return Err(StrategyError::failed(format!(
                    "step {} ({}): {}",
                    index + 1,
                    step.description,
                    message
                )));
            }
        }

        Ok(())
    }
}

impl ScenarioStrategy for StepScriptStrategy {
    fn execute<'a>(
        &'a self,
        ctx: ExecutionContext,
        payload: &'a [u8],
    ) -> PortFuture<'a, Result<(), StrategyError>> {
        Box::pin(self.run(ctx, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx(token: &CancellationToken) -> ExecutionContext {
        ExecutionContext::new("script", 1, token.child_token())
    }

    #[tokio::test]
    async fn test_empty_payload_succeeds() {
        let token = CancellationToken::new();
        assert!(StepScriptStrategy::new().execute(ctx(&token), b"").await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_step() {
        let token = CancellationToken::new();
        let payload = br#"{steps: [{duration: "5ms", description: "ok"}, {duration: "5ms", description: "bad", fail: "boom"}]}"#;

        let err = StepScriptStrategy::new()
            .execute(ctx(&token), payload)
            .await
            .unwrap_err();
        match err {
            StrategyError::Failed { message } => {
                assert!(message.contains("step 2"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let token = CancellationToken::new();
        let err = StepScriptStrategy::new()
            .execute(ctx(&token), b"not a script")
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_long_step() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = StepScriptStrategy::new()
            .execute(ctx(&token), br#"{steps: [{duration: "1m"}]}"#)
            .await
            .unwrap_err();

        assert_eq!(err, StrategyError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
