//! Recurring-occurrence consumer
//!
//! Consumes `task.completed`: when the completed task carries a recurrence
//! pattern, materializes the next occurrence as a fresh task. Fixed order
//! per event: validate, dedupe, branch, compute, materialize, commit the
//! idempotency mark. The mark always comes after the effect, so a crash in
//! between replays the event and the task store's uniqueness constraint
//! absorbs the second create.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use taskbeat_core::{
    calculate_next, ConsumeError, ConsumeOutcome, IdempotencyStore, NewTask, TaskMaterializer,
};
use taskbeat_schemas::{EventEnvelope, EventType, TaskCompletedPayload};

use crate::dispatch::EventConsumer;
use crate::idempotency::IdempotencyGuard;
use crate::retry::{EventClass, RetryPolicy};

pub struct RecurringTaskConsumer {
    guard: IdempotencyGuard,
    tasks: Arc<dyn TaskMaterializer>,
    policy: RetryPolicy,
}

impl RecurringTaskConsumer {
    pub fn new(store: Arc<dyn IdempotencyStore>, tasks: Arc<dyn TaskMaterializer>) -> Self {
        Self {
            guard: IdempotencyGuard::new(store),
            tasks,
            policy: RetryPolicy::for_class(EventClass::TaskCompleted),
        }
    }

    /// Mark processed with the class retention; used on terminal paths
    /// where a retry can never change the outcome. Best-effort: if the
    /// mark fails the event is redelivered and lands on this path again.
    async fn mark_terminal(&self, envelope: &EventEnvelope) {
        if let Err(err) = self
            .guard
            .mark_processed(envelope.event_id, Some(self.policy.retention()))
            .await
        {
            warn!(
                event_id = %envelope.event_id,
                error = %err,
                "failed to mark terminal event processed"
            );
        }
    }

    /// Next occurrence strictly after `payload`'s anchor date
    ///
    /// The anchor is the original due date when present, else the
    /// completion time: a task completed early or late still recurs on its
    /// own cadence.
    fn next_occurrence(
        payload: &TaskCompletedPayload,
        pattern: &str,
    ) -> Result<Option<DateTime<Utc>>, ConsumeError> {
        if let Some(hint) = payload.next_occurrence {
            // The hint is still subject to the inclusive end boundary; a
            // hint past it means the series has ended.
            if payload.recurring_end_date.is_some_and(|end| hint > end) {
                return Ok(None);
            }
            return Ok(Some(hint));
        }
        let anchor = payload.due_date.unwrap_or(payload.completed_at).naive_utc();
        let end = payload.recurring_end_date.map(|d| d.naive_utc());
        let next = calculate_next(pattern, anchor, end)?;
        Ok(next.map(|n| Utc.from_utc_datetime(&n)))
    }
}

#[async_trait]
impl EventConsumer for RecurringTaskConsumer {
    fn event_types(&self) -> &'static [EventType] {
        &[EventType::TaskCompleted]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<ConsumeOutcome, ConsumeError> {
        // 1. Validate.
        let payload = envelope.payload.as_task_completed().ok_or_else(|| {
            ConsumeError::Validation("payload does not match task.completed".to_string())
        })?;
        if envelope.user_id.trim().is_empty() {
            self.mark_terminal(envelope).await;
            return Err(ConsumeError::Validation("empty user_id".to_string()));
        }
        if envelope.task_id <= 0 {
            self.mark_terminal(envelope).await;
            return Err(ConsumeError::Validation(format!(
                "non-positive task_id {}",
                envelope.task_id
            )));
        }

        // 2. Dedupe. A store failure here is transient and retried; we
        // never guess.
        if self.guard.already_processed(envelope.event_id).await? {
            info!(event_id = %envelope.event_id, "duplicate task.completed, skipping");
            return Ok(ConsumeOutcome::Duplicate);
        }

        // 3. Branch: non-recurring tasks produce nothing.
        let Some(pattern) = payload.recurring_pattern.as_deref() else {
            self.mark_terminal(envelope).await;
            return Ok(ConsumeOutcome::Skipped("non-recurring"));
        };

        // 4. Compute the next occurrence (or take the producer's hint).
        let next = match Self::next_occurrence(payload, pattern) {
            Ok(Some(next)) => next,
            Ok(None) => {
                // Recurrence ended; the series is complete.
                self.mark_terminal(envelope).await;
                return Ok(ConsumeOutcome::Skipped("recurrence-ended"));
            }
            Err(err) => {
                // Bad pattern data; retrying cannot fix it, so mark first
                // to stop the redelivery loop, then surface for alerting.
                self.mark_terminal(envelope).await;
                return Err(err);
            }
        };

        // Occurrence after the next, carried on the new task as the hint
        // its own completion event will use. Pattern errors were caught
        // above, so a quiet None is only a series that ends at `next`.
        let end = payload.recurring_end_date.map(|d| d.naive_utc());
        let following = calculate_next(pattern, next.naive_utc(), end)
            .ok()
            .flatten()
            .map(|n| Utc.from_utc_datetime(&n));

        // 5. Materialize. A transient failure leaves the event unmarked so
        // the retry pipeline runs the whole handler again.
        let new_task = NewTask {
            title: payload.title.clone(),
            user_id: envelope.user_id.clone(),
            due_date: next,
            recurring_pattern: Some(pattern.to_string()),
            recurring_end_date: payload.recurring_end_date,
            next_occurrence: following,
            parent_task_id: Some(envelope.task_id),
            completed: false,
        };
        let created_id = match self.tasks.create_task(new_task).await {
            Ok(id) => id,
            Err(err) if err.is_transient() => return Err(err.into()),
            Err(err) => {
                self.mark_terminal(envelope).await;
                return Err(err.into());
            }
        };

        // 6. Commit the idempotency mark.
        self.guard
            .mark_processed(envelope.event_id, Some(self.policy.retention()))
            .await?;

        info!(
            event_id = %envelope.event_id,
            parent_task_id = envelope.task_id,
            created_task_id = created_id,
            next_due = %next,
            "materialized next occurrence"
        );
        Ok(ConsumeOutcome::Processed)
    }
}
