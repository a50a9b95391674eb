//! Per-event retry pipeline
//!
//! Drives one envelope to a terminal state: consumed, rejected (poison),
//! or dead-lettered. Backoff sleeps are plain awaits, so a pipeline run
//! parks its tokio task without blocking other events; the binary runs one
//! pipeline task per in-flight event.

use serde_json::Value;
use tracing::{error, info, warn};

use taskbeat_core::{CapabilityError, ConsumeOutcome};
use taskbeat_schemas::EventEnvelope;

use crate::dispatch::ConsumerRegistry;
use crate::dlq::DeadLetterRouter;
use crate::retry::{EventClass, RetryDecision, RetryPolicy};

/// Terminal state of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The consumer finished (processed, duplicate, or skipped)
    Consumed(ConsumeOutcome),

    /// Dropped after a non-retryable failure; the consumer has already
    /// marked the event processed, so redelivery is a no-op
    Rejected(&'static str),

    /// Retries exhausted; the event now lives on its DLQ topic
    DeadLettered,
}

pub struct EventPipeline {
    registry: ConsumerRegistry,
    dlq: DeadLetterRouter,
}

impl EventPipeline {
    pub fn new(registry: ConsumerRegistry, dlq: DeadLetterRouter) -> Self {
        Self { registry, dlq }
    }

    /// Run `envelope` to a terminal state
    ///
    /// Errors only when the final dead-letter publish fails; the caller
    /// must then leave the event unacknowledged so the broker redelivers.
    pub async fn process(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<PipelineOutcome, CapabilityError> {
        let class = EventClass::for_event_type(envelope.event_type);
        let policy = RetryPolicy::for_class(class);
        let mut attempt: u32 = 1;

        loop {
            match self.registry.dispatch(envelope).await {
                Ok(outcome) => {
                    info!(
                        event_id = %envelope.event_id,
                        event_type = %envelope.event_type,
                        attempt,
                        ?outcome,
                        "event consumed"
                    );
                    return Ok(PipelineOutcome::Consumed(outcome));
                }
                Err(err) if !err.is_retryable() => {
                    error!(
                        event_id = %envelope.event_id,
                        event_type = %envelope.event_type,
                        error = %err,
                        error_type = err.error_type(),
                        "non-retryable failure, dropping event"
                    );
                    return Ok(PipelineOutcome::Rejected(err.error_type()));
                }
                Err(err) => match policy.on_failure(attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            event_id = %envelope.event_id,
                            event_type = %envelope.event_type,
                            attempt,
                            max_attempts = policy.max_attempts,
                            delay_secs = delay.as_secs(),
                            error = %err,
                            "transient failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::DeadLetterAfter(delay) => {
                        warn!(
                            event_id = %envelope.event_id,
                            event_type = %envelope.event_type,
                            attempt,
                            delay_secs = delay.as_secs(),
                            error = %err,
                            "final attempt failed, backing off before dead-letter"
                        );
                        tokio::time::sleep(delay).await;
                        let event = envelope_json(envelope)?;
                        self.dlq
                            .route(class, envelope.partition_key(), event, &err, attempt)
                            .await?;
                        return Ok(PipelineOutcome::DeadLettered);
                    }
                },
            }
        }
    }
}

fn envelope_json(envelope: &EventEnvelope) -> Result<Value, CapabilityError> {
    serde_json::to_value(envelope)
        .map_err(|e| CapabilityError::permanent(format!("envelope serialization: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventConsumer;
    use crate::memory::{InMemoryTransport, RecordingAlerter};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use taskbeat_core::ConsumeError;
    use taskbeat_schemas::{EventType, TaskCompletedPayload, DLQ_TASK_EVENTS};

    struct FlakyConsumer {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl EventConsumer for FlakyConsumer {
        fn event_types(&self) -> &'static [EventType] {
            &[EventType::TaskCompleted]
        }

        async fn handle(&self, _: &EventEnvelope) -> Result<ConsumeOutcome, ConsumeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(ConsumeOutcome::Processed)
            } else {
                Err(ConsumeError::Transient("store unavailable".to_string()))
            }
        }
    }

    fn pipeline_with(
        consumer: Arc<FlakyConsumer>,
    ) -> (EventPipeline, Arc<InMemoryTransport>, Arc<RecordingAlerter>) {
        let transport = Arc::new(InMemoryTransport::new());
        let alerts = Arc::new(RecordingAlerter::new());
        let mut registry = ConsumerRegistry::new();
        registry.register(consumer);
        (
            EventPipeline::new(registry, DeadLetterRouter::new(transport.clone(), alerts.clone())),
            transport,
            alerts,
        )
    }

    fn completed_envelope() -> EventEnvelope {
        EventEnvelope::new(
            "user-1",
            42,
            TaskCompletedPayload::new(
                "water plants",
                Utc.with_ymd_and_hms(2025, 12, 29, 10, 0, 0).unwrap(),
            ),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_succeed() {
        let consumer = Arc::new(FlakyConsumer {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let (pipeline, _, _) = pipeline_with(consumer.clone());

        let started = tokio::time::Instant::now();
        let outcome = pipeline.process(&completed_envelope()).await.unwrap();

        assert_eq!(outcome, PipelineOutcome::Consumed(ConsumeOutcome::Processed));
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 3);
        // First two backoffs of the task.completed schedule: 30s + 300s.
        assert_eq!(started.elapsed().as_secs(), 330);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_dead_letter() {
        let consumer = Arc::new(FlakyConsumer {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        });
        let (pipeline, transport, alerts) = pipeline_with(consumer.clone());
        let envelope = completed_envelope();

        let started = tokio::time::Instant::now();
        let outcome = pipeline.process(&envelope).await.unwrap();

        assert_eq!(outcome, PipelineOutcome::DeadLettered);
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 3);
        // All three table delays are slept, the last one before the DLQ.
        assert_eq!(started.elapsed().as_secs(), 30 + 300 + 1800);

        let dead = transport.published(DLQ_TASK_EVENTS);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message["event_id"], envelope.event_id.to_string());
        assert_eq!(dead[0].message["dlq_metadata"]["retry_count"], 3);
        assert_eq!(alerts.alert_count(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_rejected_without_retry() {
        struct PoisonConsumer;

        #[async_trait]
        impl EventConsumer for PoisonConsumer {
            fn event_types(&self) -> &'static [EventType] {
                &[EventType::TaskCompleted]
            }

            async fn handle(&self, _: &EventEnvelope) -> Result<ConsumeOutcome, ConsumeError> {
                Err(ConsumeError::Validation("empty user_id".to_string()))
            }
        }

        let transport = Arc::new(InMemoryTransport::new());
        let alerts = Arc::new(RecordingAlerter::new());
        let mut registry = ConsumerRegistry::new();
        registry.register(Arc::new(PoisonConsumer));
        let pipeline =
            EventPipeline::new(registry, DeadLetterRouter::new(transport.clone(), alerts));

        let outcome = pipeline.process(&completed_envelope()).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Rejected("validation"));
        assert_eq!(transport.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dlq_publish_failure_propagates() {
        let consumer = Arc::new(FlakyConsumer {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        });
        let (pipeline, transport, _) = pipeline_with(consumer);
        transport.fail_always();

        let result = pipeline.process(&completed_envelope()).await;
        assert!(result.is_err());
    }
}
