//! Lifecycle event publishing.
//!
//! Workers never await the bus: they push events into an unbounded queue and
//! a single background task serializes and publishes them in order. A
//! publish failure is logged and the event is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zenoh::Session;

use orchestrator_shared::errors::PublishError;
use orchestrator_shared::qos::QosConfig;
use orchestrator_shared::scenario::LifecycleEvent;

use super::ports::{EventPublisher, PortFuture};

/// Publishes raw payloads on Zenoh key expressions
#[derive(Clone)]
pub struct ZenohEventPublisher {
    session: Session,
    qos: QosConfig,
}

impl ZenohEventPublisher {
    pub fn new(session: Session, qos: QosConfig) -> Self {
        Self { session, qos }
    }
}

impl EventPublisher for ZenohEventPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: Vec<u8>,
    ) -> PortFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let (congestion_control, priority) = self.qos;
            self.session
                .put(topic, payload)
                .congestion_control(congestion_control)
                .priority(priority)
                .await
                .map_err(|e| PublishError::Transport {
                    topic: topic.to_string(),
                    message: e.to_string(),
                })
        })
    }
}

/// Ordered, non-blocking emission of lifecycle events
pub struct LifecycleEmitter {
    sender: Mutex<Option<mpsc::UnboundedSender<LifecycleEvent>>>,
    drain: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    /// Events queued but not yet handed to the publisher
    pending: Arc<AtomicUsize>,
}

impl LifecycleEmitter {
    /// Spawns the drain task; must be called inside a tokio runtime
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: String) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<LifecycleEvent>();
        let pending = Arc::new(AtomicUsize::new(0));

        let in_queue = pending.clone();
        let drain = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let payload = match serde_json::to_vec(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        in_queue.fetch_sub(1, Ordering::SeqCst);
                        warn!(scenario_id = %event.scenario_id, "Failed to encode lifecycle event: {}", e);
                        continue;
                    }
                };

                let result = publisher.publish(&topic, payload).await;
                in_queue.fetch_sub(1, Ordering::SeqCst);
                match result {
                    Ok(()) => debug!(
                        scenario_id = %event.scenario_id,
                        "Published {} -> {} on {}",
                        event.old_status, event.new_status, topic
                    ),
                    Err(e) => warn!(
                        scenario_id = %event.scenario_id,
                        "Dropping lifecycle event {} -> {}: {}",
                        event.old_status, event.new_status, e
                    ),
                }
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            drain: tokio::sync::Mutex::new(Some(drain)),
            pending,
        }
    }

    /// Queues an event; never blocks
    pub fn emit(&self, event: LifecycleEvent) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                if sender.send(event).is_err() {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    warn!("Lifecycle event queue is closed");
                }
            }
            None => warn!(
                scenario_id = %event.scenario_id,
                "Lifecycle event emitted after flush, dropping {} -> {}",
                event.old_status, event.new_status
            ),
        }
    }

    /// Closes the queue and waits up to `limit` until every queued event was
    /// handed to the publisher. A publisher still blocked after `limit` is
    /// abandoned; the return value is the number of events dropped that way.
    /// Later calls return immediately.
    pub async fn flush(&self, limit: Duration) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(mut handle) = self.drain.lock().await.take() else {
            return 0;
        };

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(())) => 0,
            Ok(Err(e)) => {
                let dropped = self.pending.swap(0, Ordering::SeqCst);
                warn!("Lifecycle event publisher task failed, {} event(s) lost: {}", dropped, e);
                dropped
            }
            Err(_) => {
                handle.abort();
                let dropped = self.pending.swap(0, Ordering::SeqCst);
                warn!(
                    "Lifecycle event publisher did not drain within {:?}, dropping {} event(s)",
                    limit, dropped
                );
                dropped
            }
        }
    }

    /// Events emitted but not yet handed to the publisher
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_shared::scenario::ScenarioStatus;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct Recorder {
        published: AsyncMutex<Vec<(String, LifecycleEvent)>>,
    }

    impl EventPublisher for Recorder {
        fn publish<'a>(
            &'a self,
            topic: &'a str,
            payload: Vec<u8>,
        ) -> PortFuture<'a, Result<(), PublishError>> {
            Box::pin(async move {
                let event: LifecycleEvent = serde_json::from_slice(&payload)?;
                if event.scenario_id == "unlucky" {
                    return Err(PublishError::Transport {
                        topic: topic.to_string(),
                        message: "link down".to_string(),
                    });
                }
                self.published.lock().await.push((topic.to_string(), event));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_flush_publishes_in_order() {
        let recorder = Arc::new(Recorder::default());
        let emitter = LifecycleEmitter::new(recorder.clone(), "scenario".to_string());

        for id in ["a", "unlucky", "b"] {
            emitter.emit(LifecycleEvent::new(
                id,
                ScenarioStatus::Pending,
                ScenarioStatus::Running,
            ));
        }
        assert_eq!(emitter.flush(Duration::from_secs(1)).await, 0);
        assert_eq!(emitter.pending(), 0);

        let published = recorder.published.lock().await;
        let ids: Vec<&str> = published.iter().map(|(_, e)| e.scenario_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(published.iter().all(|(topic, _)| topic == "scenario"));
    }

    #[tokio::test]
    async fn test_emit_after_flush_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let emitter = LifecycleEmitter::new(recorder.clone(), "scenario".to_string());
        emitter.flush(Duration::from_secs(1)).await;
        assert_eq!(emitter.flush(Duration::from_secs(1)).await, 0);

        emitter.emit(LifecycleEvent::new(
            "late",
            ScenarioStatus::Running,
            ScenarioStatus::Cancelled,
        ));
        assert!(recorder.published.lock().await.is_empty());
    }

    struct Stalled;

    impl EventPublisher for Stalled {
        fn publish<'a>(
            &'a self,
            _topic: &'a str,
            _payload: Vec<u8>,
        ) -> PortFuture<'a, Result<(), PublishError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn test_flush_abandons_stalled_publisher() {
        let emitter = LifecycleEmitter::new(Arc::new(Stalled), "scenario".to_string());
        for id in ["a", "b"] {
            emitter.emit(LifecycleEvent::new(
                id,
                ScenarioStatus::Pending,
                ScenarioStatus::Running,
            ));
        }

        let dropped = tokio::time::timeout(
            Duration::from_secs(2),
            emitter.flush(Duration::from_millis(50)),
        )
        .await
        .expect("flush ignored its time limit");

        assert_eq!(dropped, 2);
        assert_eq!(emitter.pending(), 0);
    }
}
