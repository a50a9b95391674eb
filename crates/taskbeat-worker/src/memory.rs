//! In-memory capability implementations
//!
//! Back the local harness and the test suite. Each implementation records
//! what it was asked to do and supports fault injection via `fail_next`
//! (fail the next N calls with a transient error).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use taskbeat_core::{
    CapabilityError, EventTransport, IdempotencyStore, JobScheduler, JobSpec, NewTask,
    OpsAlerter, ReminderNotifier, ReminderTracker, TaskMaterializer,
};

/// Counter of injected failures shared by all implementations here
#[derive(Default)]
struct FaultInjector {
    remaining: AtomicU32,
    always: AtomicBool,
}

impl FaultInjector {
    fn arm(&self, failures: u32) {
        self.remaining.store(failures, Ordering::SeqCst);
    }

    fn arm_always(&self) {
        self.always.store(true, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<(), CapabilityError> {
        if self.always.load(Ordering::SeqCst) {
            return Err(CapabilityError::transient(format!("{what}: injected failure")));
        }
        let prev = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if prev {
            Err(CapabilityError::transient(format!("{what}: injected failure")))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// One message as it went over the in-memory broker
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub partition_key: String,
    pub message: Value,
}

/// Loopback transport: records every publish and fans it out to
/// subscribers, so the binary can consume its own events in-process
pub struct InMemoryTransport {
    messages: RwLock<Vec<PublishedMessage>>,
    tx: broadcast::Sender<PublishedMessage>,
    faults: FaultInjector,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            messages: RwLock::new(Vec::new()),
            tx,
            faults: FaultInjector::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.tx.subscribe()
    }

    /// All messages published to `topic`, in publish order
    pub fn published(&self, topic: &str) -> Vec<PublishedMessage> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn fail_next(&self, failures: u32) {
        self.faults.arm(failures);
    }

    pub fn fail_always(&self) {
        self.faults.arm_always();
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        message: Value,
    ) -> Result<(), CapabilityError> {
        self.faults.check("transport")?;
        let published = PublishedMessage {
            topic: topic.to_string(),
            partition_key: partition_key.to_string(),
            message,
        };
        self.messages.write().push(published.clone());
        // No subscribers is fine; the record above is the source of truth.
        let _ = self.tx.send(published);
        Ok(())
    }
}

// ============================================================================
// Idempotency store
// ============================================================================

struct StoredValue {
    value: Value,
    expires_at: Option<Instant>,
}

/// TTL-aware key/value store
pub struct InMemoryIdempotencyStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    faults: FaultInjector,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            faults: FaultInjector::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn fail_next(&self, failures: u32) {
        self.faults.arm(failures);
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CapabilityError> {
        self.faults.check("idempotency store")?;
        let entries = self.entries.read();
        Ok(entries.get(key).and_then(|stored| {
            let expired = stored
                .expires_at
                .is_some_and(|expires_at| Instant::now() >= expires_at);
            if expired {
                None
            } else {
                Some(stored.value.clone())
            }
        }))
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CapabilityError> {
        self.faults.check("idempotency store")?;
        let stored = StoredValue {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.write().insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CapabilityError> {
        self.faults.check("idempotency store")?;
        self.entries.write().remove(key);
        Ok(())
    }
}

// ============================================================================
// Job scheduler
// ============================================================================

/// Records job registrations keyed by name (one live job per name)
pub struct InMemoryJobScheduler {
    jobs: RwLock<HashMap<String, JobSpec>>,
    faults: FaultInjector,
}

impl InMemoryJobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            faults: FaultInjector::default(),
        }
    }

    pub fn job(&self, name: &str) -> Option<JobSpec> {
        self.jobs.read().get(name).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn fail_next(&self, failures: u32) {
        self.faults.arm(failures);
    }
}

impl Default for InMemoryJobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn schedule_job(&self, spec: JobSpec) -> Result<(), CapabilityError> {
        self.faults.check("scheduler")?;
        // Re-registering a name replaces the job, matching the scheduler
        // contract the consumers rely on for replays.
        self.jobs.write().insert(spec.name.clone(), spec);
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<(), CapabilityError> {
        self.faults.check("scheduler")?;
        self.jobs.write().remove(name);
        Ok(())
    }
}

// ============================================================================
// Task store
// ============================================================================

/// Records created tasks and assigns sequential ids
///
/// Enforces the `(parent_task_id, due_date)` uniqueness the real task
/// store provides; a duplicate create returns the existing task's id.
pub struct RecordingMaterializer {
    created: RwLock<Vec<(i64, NewTask)>>,
    next_id: AtomicI64,
    faults: FaultInjector,
}

impl RecordingMaterializer {
    pub fn new() -> Self {
        Self {
            created: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(100),
            faults: FaultInjector::default(),
        }
    }

    pub fn created(&self) -> Vec<NewTask> {
        self.created.read().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn created_count(&self) -> usize {
        self.created.read().len()
    }

    pub fn fail_next(&self, failures: u32) {
        self.faults.arm(failures);
    }
}

impl Default for RecordingMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskMaterializer for RecordingMaterializer {
    async fn create_task(&self, task: NewTask) -> Result<i64, CapabilityError> {
        self.faults.check("task store")?;
        let mut created = self.created.write();
        if let Some((id, _)) = created.iter().find(|(_, existing)| {
            existing.parent_task_id == task.parent_task_id && existing.due_date == task.due_date
        }) {
            return Ok(*id);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        created.push((id, task));
        Ok(id)
    }
}

/// Records reminder-sent bookkeeping calls
pub struct RecordingTracker {
    sent: RwLock<Vec<(String, i64)>>,
    faults: FaultInjector,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
            faults: FaultInjector::default(),
        }
    }

    pub fn sent(&self) -> Vec<(String, i64)> {
        self.sent.read().clone()
    }

    pub fn fail_next(&self, failures: u32) {
        self.faults.arm(failures);
    }
}

impl Default for RecordingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReminderTracker for RecordingTracker {
    async fn mark_reminder_sent(
        &self,
        user_id: &str,
        task_id: i64,
    ) -> Result<(), CapabilityError> {
        self.faults.check("reminder tracker")?;
        self.sent.write().push((user_id.to_string(), task_id));
        Ok(())
    }
}

// ============================================================================
// Notification
// ============================================================================

/// One delivered reminder
#[derive(Debug, Clone)]
pub struct SentReminder {
    pub to: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub task_id: i64,
}

/// Records reminder deliveries and failure alerts
pub struct RecordingNotifier {
    sent: RwLock<Vec<SentReminder>>,
    failure_alerts: RwLock<Vec<(String, i64)>>,
    attempts: AtomicU32,
    faults: FaultInjector,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
            failure_alerts: RwLock::new(Vec::new()),
            attempts: AtomicU32::new(0),
            faults: FaultInjector::default(),
        }
    }

    pub fn sent(&self) -> Vec<SentReminder> {
        self.sent.read().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().len()
    }

    /// Total send attempts, including failed ones
    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn failure_alert_count(&self) -> usize {
        self.failure_alerts.read().len()
    }

    pub fn fail_next(&self, failures: u32) {
        self.faults.arm(failures);
    }

    pub fn fail_always(&self) {
        self.faults.arm_always();
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReminderNotifier for RecordingNotifier {
    async fn send_reminder(
        &self,
        to: &str,
        title: &str,
        description: Option<&str>,
        due_date: DateTime<Utc>,
        task_id: i64,
    ) -> Result<(), CapabilityError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.faults.check("notifier")?;
        self.sent.write().push(SentReminder {
            to: to.to_string(),
            title: title.to_string(),
            description: description.map(str::to_string),
            due_date,
            task_id,
        });
        Ok(())
    }

    async fn send_failure_alert(
        &self,
        to: &str,
        _title: &str,
        task_id: i64,
    ) -> Result<(), CapabilityError> {
        self.failure_alerts.write().push((to.to_string(), task_id));
        Ok(())
    }
}

// ============================================================================
// Ops alerting
// ============================================================================

/// Records operator alerts
pub struct RecordingAlerter {
    alerts: RwLock<Vec<(String, Value)>>,
    faults: FaultInjector,
}

impl RecordingAlerter {
    pub fn new() -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
            faults: FaultInjector::default(),
        }
    }

    pub fn alerts(&self) -> Vec<(String, Value)> {
        self.alerts.read().clone()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn fail_next(&self, failures: u32) {
        self.faults.arm(failures);
    }
}

impl Default for RecordingAlerter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpsAlerter for RecordingAlerter {
    async fn emit(&self, summary: &str, detail: Value) -> Result<(), CapabilityError> {
        self.faults.check("alerter")?;
        self.alerts.write().push((summary.to_string(), detail));
        Ok(())
    }
}
