//! Taskbeat worker binary
//!
//! Local harness: wires the consumers to the in-memory capability stack,
//! publishes a couple of demo events over the loopback transport, and
//! consumes until interrupted. Deployments replace the in-memory
//! implementations with broker-backed ones behind the same traits.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

use taskbeat_core::telemetry::{init_telemetry, TelemetryConfig};
use taskbeat_core::ReminderNotifier;
use taskbeat_schemas::{
    NotificationChannel, ReminderScheduledPayload, SchemaRegistry, TaskCompletedPayload,
    TOPIC_REMINDERS, TOPIC_TASK_EVENTS,
};
use taskbeat_worker::memory::{
    InMemoryIdempotencyStore, InMemoryJobScheduler, InMemoryTransport, RecordingAlerter,
    RecordingMaterializer, RecordingNotifier, RecordingTracker,
};
use taskbeat_worker::{
    ConsumerRegistry, DeadLetterRouter, EventPipeline, EventPublisher, RecurringTaskConsumer,
    ReminderConsumer, WorkerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut telemetry = TelemetryConfig::from_env();
    if telemetry.service_name == "taskbeat" {
        telemetry.service_name = "taskbeat-worker".to_string();
    }
    init_telemetry(&telemetry);

    let config = WorkerConfig::from_env();
    info!(
        worker_id = %config.worker_id,
        max_concurrent_events = config.max_concurrent_events,
        "starting taskbeat worker"
    );

    // In-memory capability stack for local runs.
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let scheduler = Arc::new(InMemoryJobScheduler::new());
    let tasks = Arc::new(RecordingMaterializer::new());
    let tracker = Arc::new(RecordingTracker::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let alerts = Arc::new(RecordingAlerter::new());

    let dlq = DeadLetterRouter::new(transport.clone(), alerts);

    let mut senders: HashMap<NotificationChannel, Arc<dyn ReminderNotifier>> = HashMap::new();
    senders.insert(NotificationChannel::Email, notifier.clone());
    senders.insert(NotificationChannel::Push, notifier);

    let mut registry = ConsumerRegistry::new();
    registry.register(Arc::new(RecurringTaskConsumer::new(
        store.clone(),
        tasks.clone(),
    )));
    registry.register(Arc::new(ReminderConsumer::new(
        store,
        scheduler,
        senders,
        tracker,
        dlq.clone(),
    )));

    let pipeline = Arc::new(EventPipeline::new(registry, dlq));
    let schemas = SchemaRegistry::new();
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_events));
    let mut rx = transport.subscribe();

    publish_demo_events(&transport).await?;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(msg) if msg.topic == TOPIC_TASK_EVENTS || msg.topic == TOPIC_REMINDERS => {
                    let envelope = match schemas.validate(&msg.message) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            warn!(topic = %msg.topic, error = %err, "rejected event");
                            continue;
                        }
                    };
                    let permit = semaphore.clone().acquire_owned().await?;
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        match pipeline.process(&envelope).await {
                            Ok(outcome) => {
                                info!(event_id = %envelope.event_id, ?outcome, "pipeline finished")
                            }
                            Err(err) => {
                                error!(event_id = %envelope.event_id, error = %err, "dead-letter publish failed")
                            }
                        }
                    });
                }
                // Dead-letter topics are not consumed here.
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transport receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    info!(
        tasks_created = tasks.created_count(),
        "taskbeat worker stopped"
    );
    Ok(())
}

/// Seed the loopback transport so a bare `cargo run` has something to chew on
async fn publish_demo_events(transport: &Arc<InMemoryTransport>) -> Result<()> {
    let publisher = EventPublisher::new(transport.clone());
    let now = Utc::now();

    publisher
        .publish(
            "demo-user",
            1,
            TaskCompletedPayload::new("water plants", now)
                .with_due_date(now)
                .with_recurrence("DAILY"),
        )
        .await?;

    publisher
        .publish(
            "demo-user",
            2,
            ReminderScheduledPayload::new(
                "standup",
                now + Duration::hours(1),
                NotificationChannel::Email,
                "demo@example.com",
                now + Duration::hours(3),
            ),
        )
        .await?;

    info!("published demo events over the loopback transport");
    Ok(())
}
