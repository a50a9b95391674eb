//! Reminder consumer
//!
//! Two halves of reminder handling:
//! - `reminder.scheduled` events register a one-shot job named after the
//!   task; replaying the event replaces the job rather than duplicating it.
//! - When the job fires, delivery runs its own bounded retry loop against
//!   the channel's sender, dead-lettering (and alerting the user) once the
//!   schedule is exhausted.
//!
//! Cancellation is name-based: completing a task before its reminder fires
//! deletes the job by its deterministic name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use taskbeat_core::{
    CapabilityError, ConsumeError, ConsumeOutcome, IdempotencyStore, JobScheduler, JobSpec,
    ReminderNotifier, ReminderTracker,
};
use taskbeat_schemas::{EventEnvelope, EventType, NotificationChannel, ReminderScheduledPayload};

use crate::dispatch::EventConsumer;
use crate::dlq::DeadLetterRouter;
use crate::idempotency::IdempotencyGuard;
use crate::retry::{EventClass, RetryDecision, RetryPolicy};

/// Deterministic job name for a task's reminder
pub fn reminder_job_name(task_id: i64) -> String {
    format!("reminder-task-{task_id}")
}

/// Payload stored with the job and handed back when it fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderJobData {
    pub user_id: String,
    pub task_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub channel: NotificationChannel,
    pub deliver_to: String,
}

impl ReminderJobData {
    fn from_event(envelope: &EventEnvelope, payload: &ReminderScheduledPayload) -> Self {
        Self {
            user_id: envelope.user_id.clone(),
            task_id: envelope.task_id,
            title: payload.title.clone(),
            description: payload.description.clone(),
            due_date: payload.due_date,
            channel: payload.channel,
            deliver_to: payload.deliver_to.clone(),
        }
    }
}

/// Terminal state of one delivery run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    DeadLettered { attempts: u32 },
}

pub struct ReminderConsumer {
    guard: IdempotencyGuard,
    scheduler: Arc<dyn JobScheduler>,
    senders: HashMap<NotificationChannel, Arc<dyn ReminderNotifier>>,
    tracker: Arc<dyn ReminderTracker>,
    dlq: DeadLetterRouter,
    policy: RetryPolicy,
}

impl ReminderConsumer {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        scheduler: Arc<dyn JobScheduler>,
        senders: HashMap<NotificationChannel, Arc<dyn ReminderNotifier>>,
        tracker: Arc<dyn ReminderTracker>,
        dlq: DeadLetterRouter,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(store),
            scheduler,
            senders,
            tracker,
            dlq,
            policy: RetryPolicy::for_class(EventClass::ReminderDue),
        }
    }

    /// Mark processed with the class retention on terminal paths where a
    /// retry can never change the outcome. Best-effort: a failed mark
    /// redelivers the event onto this same path.
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

    /// Deliver a fired reminder, retrying per the `reminder.due` schedule
    ///
    /// On success the task store's reminder bookkeeping is updated
    /// best-effort. On exhaustion the job data is dead-lettered and the
    /// user gets a lower-urgency failure notice. Errors only when the
    /// dead-letter publish itself fails.
    pub async fn on_job_fired(
        &self,
        data: &ReminderJobData,
    ) -> Result<DeliveryOutcome, CapabilityError> {
        let sender = match self.senders.get(&data.channel) {
            Some(sender) => sender,
            None => {
                // Wiring gap, not a delivery failure: dead-letter straight
                // away so the reminder is not silently lost.
                let err =
                    ConsumeError::Permanent(format!("no sender for channel {}", data.channel));
                return self.dead_letter(data, &err, 0).await;
            }
        };

        let mut attempt: u32 = 1;
        loop {
            let result = sender
                .send_reminder(
                    &data.deliver_to,
                    &data.title,
                    data.description.as_deref(),
                    data.due_date,
                    data.task_id,
                )
                .await;

            match result {
                Ok(()) => {
                    if let Err(err) = self
                        .tracker
                        .mark_reminder_sent(&data.user_id, data.task_id)
                        .await
                    {
                        warn!(
                            task_id = data.task_id,
                            error = %err,
                            "reminder delivered but bookkeeping failed"
                        );
                    }
                    info!(
                        task_id = data.task_id,
                        channel = %data.channel,
                        attempt,
                        "reminder delivered"
                    );
                    return Ok(DeliveryOutcome::Delivered { attempts: attempt });
                }
                Err(err) if !err.is_transient() => {
                    // Bad address or rejected content; more attempts
                    // cannot help.
                    return self.dead_letter(data, &err.into(), attempt).await;
                }
                Err(err) => match self.policy.on_failure(attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            task_id = data.task_id,
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            delay_secs = delay.as_secs(),
                            error = %err,
                            "reminder delivery failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::DeadLetterAfter(delay) => {
                        warn!(
                            task_id = data.task_id,
                            attempt,
                            delay_secs = delay.as_secs(),
                            error = %err,
                            "final delivery attempt failed, backing off before dead-letter"
                        );
                        tokio::time::sleep(delay).await;
                        return self.dead_letter(data, &err.into(), attempt).await;
                    }
                },
            }
        }
    }

    async fn dead_letter(
        &self,
        data: &ReminderJobData,
        err: &ConsumeError,
        attempts: u32,
    ) -> Result<DeliveryOutcome, CapabilityError> {
        let record = serde_json::to_value(data)
            .map_err(|e| CapabilityError::permanent(format!("job data serialization: {e}")))?;
        self.dlq
            .route(EventClass::ReminderDue, &data.user_id, record, err, attempts)
            .await?;

        // Tell the user their reminder never made it; best-effort.
        if let Some(sender) = self.senders.get(&data.channel) {
            if let Err(alert_err) = sender
                .send_failure_alert(&data.deliver_to, &data.title, data.task_id)
                .await
            {
                warn!(
                    task_id = data.task_id,
                    error = %alert_err,
                    "failed to send delivery-failure notice"
                );
            }
        }

        Ok(DeliveryOutcome::DeadLettered { attempts })
    }

    /// Delete the task's pending reminder job if it has not fired yet
    ///
    /// Returns whether a deletion was issued. Failures are logged, never
    /// escalated: the notification consumer tolerates a job firing on a
    /// task that is already done.
    pub async fn cancel_if_pending(
        &self,
        task_id: i64,
        completed_at: DateTime<Utc>,
        reminder_at: DateTime<Utc>,
        reminder_sent: bool,
    ) -> bool {
        if reminder_sent || completed_at >= reminder_at {
            return false;
        }
        match self.scheduler.delete_job(&reminder_job_name(task_id)).await {
            Ok(()) => {
                info!(task_id, "cancelled pending reminder");
                true
            }
            Err(err) => {
                warn!(
                    task_id,
                    error = %err,
                    "failed to cancel pending reminder; it may fire on a completed task"
                );
                false
            }
        }
    }
}

#[async_trait]
impl EventConsumer for ReminderConsumer {
    fn event_types(&self) -> &'static [EventType] {
        &[EventType::ReminderScheduled]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<ConsumeOutcome, ConsumeError> {
        let payload = envelope.payload.as_reminder_scheduled().ok_or_else(|| {
            ConsumeError::Validation("payload does not match reminder.scheduled".to_string())
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
        if payload.deliver_to.trim().is_empty() {
            self.mark_terminal(envelope).await;
            return Err(ConsumeError::Validation("empty deliver_to".to_string()));
        }

        if self.guard.already_processed(envelope.event_id).await? {
            info!(event_id = %envelope.event_id, "duplicate reminder.scheduled, skipping");
            return Ok(ConsumeOutcome::Duplicate);
        }

        // Registration is idempotent by job name, so even the crash window
        // between schedule and mark only re-registers the same job.
        let data = ReminderJobData::from_event(envelope, payload);
        let data = serde_json::to_value(&data)
            .map_err(|e| ConsumeError::Permanent(format!("job data serialization: {e}")))?;
        let spec = JobSpec::one_shot(reminder_job_name(envelope.task_id), payload.reminder_at, data)
            .with_ttl(self.policy.retention());

        self.scheduler.schedule_job(spec).await?;

        self.guard
            .mark_processed(envelope.event_id, Some(self.policy.retention()))
            .await?;

        info!(
            event_id = %envelope.event_id,
            task_id = envelope.task_id,
            reminder_at = %payload.reminder_at,
            channel = %payload.channel,
            "reminder job registered"
        );
        Ok(ConsumeOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemoryIdempotencyStore, InMemoryJobScheduler, InMemoryTransport, RecordingAlerter,
        RecordingNotifier, RecordingTracker,
    };
    use chrono::TimeZone;
    use taskbeat_schemas::DLQ_REMINDERS;

    struct Harness {
        consumer: ReminderConsumer,
        store: Arc<InMemoryIdempotencyStore>,
        scheduler: Arc<InMemoryJobScheduler>,
        notifier: Arc<RecordingNotifier>,
        tracker: Arc<RecordingTracker>,
        transport: Arc<InMemoryTransport>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let scheduler = Arc::new(InMemoryJobScheduler::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let tracker = Arc::new(RecordingTracker::new());
        let transport = Arc::new(InMemoryTransport::new());
        let alerts = Arc::new(RecordingAlerter::new());

        let mut senders: HashMap<NotificationChannel, Arc<dyn ReminderNotifier>> = HashMap::new();
        senders.insert(NotificationChannel::Email, notifier.clone());
        senders.insert(NotificationChannel::Push, notifier.clone());

        Harness {
            consumer: ReminderConsumer::new(
                store.clone(),
                scheduler.clone(),
                senders,
                tracker.clone(),
                DeadLetterRouter::new(transport.clone(), alerts),
            ),
            store,
            scheduler,
            notifier,
            tracker,
            transport,
        }
    }

    fn scheduled_envelope() -> EventEnvelope {
        let due = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        EventEnvelope::new(
            "user-1",
            7,
            ReminderScheduledPayload::new(
                "standup",
                due - chrono::Duration::hours(2),
                NotificationChannel::Email,
                "u@example.com",
                due,
            )
            .with_description("daily standup"),
        )
    }

    fn job_data() -> ReminderJobData {
        ReminderJobData {
            user_id: "user-1".to_string(),
            task_id: 7,
            title: "standup".to_string(),
            description: Some("daily standup".to_string()),
            due_date: Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap(),
            channel: NotificationChannel::Email,
            deliver_to: "u@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scheduling_registers_a_named_one_shot_job() {
        let h = harness();
        let envelope = scheduled_envelope();

        let outcome = h.consumer.handle(&envelope).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Processed);

        let job = h.scheduler.job("reminder-task-7").unwrap();
        assert!(job.is_one_shot());
        assert_eq!(
            job.due_time,
            Some(Utc.with_ymd_and_hms(2026, 1, 5, 7, 0, 0).unwrap())
        );
        assert_eq!(job.data["deliver_to"], "u@example.com");
        assert_eq!(job.data["channel"], "email");

        // Replay: duplicate, still one job.
        assert_eq!(
            h.consumer.handle(&envelope).await.unwrap(),
            ConsumeOutcome::Duplicate
        );
        assert_eq!(h.scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_failure_leaves_event_retryable() {
        let h = harness();
        h.scheduler.fail_next(1);
        let envelope = scheduled_envelope();

        let err = h.consumer.handle(&envelope).await.unwrap_err();
        assert!(err.is_retryable());

        // Retry lands the registration.
        assert_eq!(
            h.consumer.handle(&envelope).await.unwrap(),
            ConsumeOutcome::Processed
        );
        assert_eq!(h.scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn test_delivery_marks_reminder_sent_best_effort() {
        let h = harness();
        let outcome = h.consumer.on_job_fired(&job_data()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(h.notifier.sent_count(), 1);
        assert_eq!(h.notifier.sent()[0].to, "u@example.com");
        assert_eq!(h.tracker.sent(), vec![("user-1".to_string(), 7)]);
    }

    #[tokio::test]
    async fn test_bookkeeping_failure_does_not_fail_delivery() {
        let h = harness();
        h.tracker.fail_next(1);

        let outcome = h.consumer.on_job_fired(&job_data()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert!(h.tracker.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_retries_through_the_full_schedule() {
        let h = harness();
        h.notifier.fail_always();

        let started = tokio::time::Instant::now();
        let outcome = h.consumer.on_job_fired(&job_data()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::DeadLettered { attempts: 10 });
        assert_eq!(h.notifier.attempt_count(), 10);
        // Every table delay is slept, the 512s one before the hand-off:
        // 1+2+...+512 seconds, roughly seventeen minutes.
        assert_eq!(started.elapsed().as_secs(), 1023);

        let dead = h.transport.published(DLQ_REMINDERS);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].partition_key, "user-1");
        assert_eq!(dead[0].message["task_id"], 7);
        assert_eq!(dead[0].message["dlq_metadata"]["retry_count"], 10);
        assert_eq!(dead[0].message["dlq_metadata"]["retention_days"], 7);

        assert_eq!(h.notifier.failure_alert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_recovers_mid_schedule() {
        let h = harness();
        h.notifier.fail_next(3);

        let outcome = h.consumer.on_job_fired(&job_data()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 4 });
        assert_eq!(h.notifier.sent_count(), 1);
        assert!(h.transport.published(DLQ_REMINDERS).is_empty());
    }

    #[tokio::test]
    async fn test_blank_user_id_and_nonpositive_task_id_are_rejected() {
        let h = harness();
        let due = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let payload = ReminderScheduledPayload::new(
            "standup",
            due - chrono::Duration::hours(2),
            NotificationChannel::Email,
            "u@example.com",
            due,
        );

        let envelope = EventEnvelope::new("   ", 7, payload.clone());
        let err = h.consumer.handle(&envelope).await.unwrap_err();
        assert_eq!(err.error_type(), "validation");

        let envelope = EventEnvelope::new("user-1", -5, payload);
        let err = h.consumer.handle(&envelope).await.unwrap_err();
        assert_eq!(err.error_type(), "validation");

        // No job registered for either reject.
        assert_eq!(h.scheduler.job_count(), 0);
        assert!(h.scheduler.job("reminder-task--5").is_none());

        // Poison protection: both rejects are marked processed.
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_deliver_to_is_rejected_and_marked() {
        let h = harness();
        let due = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let envelope = EventEnvelope::new(
            "user-1",
            7,
            ReminderScheduledPayload::new(
                "standup",
                due - chrono::Duration::hours(2),
                NotificationChannel::Email,
                " ",
                due,
            ),
        );

        let err = h.consumer.handle(&envelope).await.unwrap_err();
        assert_eq!(err.error_type(), "validation");
        assert_eq!(h.scheduler.job_count(), 0);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_rules() {
        let h = harness();
        h.consumer.handle(&scheduled_envelope()).await.unwrap();
        assert_eq!(h.scheduler.job_count(), 1);

        let reminder_at = Utc.with_ymd_and_hms(2026, 1, 5, 7, 0, 0).unwrap();

        // Completed after the reminder fired: leave the job alone.
        let cancelled = h
            .consumer
            .cancel_if_pending(7, reminder_at + chrono::Duration::minutes(1), reminder_at, false)
            .await;
        assert!(!cancelled);
        assert_eq!(h.scheduler.job_count(), 1);

        // Already sent: nothing to cancel.
        let cancelled = h
            .consumer
            .cancel_if_pending(7, reminder_at - chrono::Duration::hours(1), reminder_at, true)
            .await;
        assert!(!cancelled);

        // Completed early and unsent: delete the job.
        let cancelled = h
            .consumer
            .cancel_if_pending(7, reminder_at - chrono::Duration::hours(1), reminder_at, false)
            .await;
        assert!(cancelled);
        assert_eq!(h.scheduler.job_count(), 0);
    }
}
