//! In-process implementations of every port, for local runs and tests.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    clients::queue::{next_occurrence, parse_cron, recurring_key},
    domain::policy::NotificationPolicy,
    models::{
        event::NotificationEvent,
        job::{
            CLEAN_KEEP_COMPLETED, CLEAN_KEEP_FAILED, COMPLETED_RETENTION, FAILED_RETENTION,
            JobFailure, JobKind, JobOptions, QueueJob, QueueStats, RecurringJob, STALLED_JOB_ERROR,
        },
        notification::{
            DeliveryCounts, DeliveryUpdate, NewDelivery, NewNotification, Notification,
            NotificationDelivery,
        },
        preference::NotificationPreference,
        status::{DeliveryStatus, JobState},
        template::NotificationTemplate,
        user::{Tenant, User},
    },
    ports::{
        DedupStore, EmailSendResult, EmailTransport, JobQueue, NotificationStore, RealtimeMessage,
        RealtimeTransport, TransactionalEmail,
    },
};

#[derive(Default)]
struct StoreState {
    users: HashMap<String, User>,
    tenants: HashMap<String, Tenant>,
    preferences: Vec<NotificationPreference>,
    templates: HashMap<(String, String), NotificationTemplate>,
    notifications: Vec<Notification>,
    deliveries: Vec<NotificationDelivery>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.state.lock().users.insert(user.id.clone(), user);
    }

    pub fn add_tenant(&self, tenant: Tenant) {
        self.state.lock().tenants.insert(tenant.id.clone(), tenant);
    }

    /// Replaces any row with the same (tenant, user, event type).
    pub fn add_preference(&self, preference: NotificationPreference) {
        let mut state = self.state.lock();
        state.preferences.retain(|p| {
            !(p.tenant_id == preference.tenant_id
                && p.user_id == preference.user_id
                && p.event_type == preference.event_type)
        });
        state.preferences.push(preference);
    }

    pub fn add_template(&self, template: NotificationTemplate) {
        self.state.lock().templates.insert(
            (template.tenant_id.clone(), template.event_type.clone()),
            template,
        );
    }

    /// Makes notification and delivery inserts fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.clone()
    }

    pub fn deliveries(&self) -> Vec<NotificationDelivery> {
        self.state.lock().deliveries.clone()
    }

    pub fn deliveries_for(&self, notification_id: Uuid) -> Vec<NotificationDelivery> {
        self.state
            .lock()
            .deliveries
            .iter()
            .filter(|d| d.notification_id == notification_id)
            .cloned()
            .collect()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("Database write failed: store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn find_active_user(&self, tenant_id: &str, user_id: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .lock()
            .users
            .get(user_id)
            .filter(|u| u.tenant_id == tenant_id && u.active)
            .cloned())
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.state.lock().users.get(user_id).cloned())
    }

    async fn find_active_users_by_role(&self, tenant_id: &str, role: &str) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .state
            .lock()
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id && u.role == role && u.active)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        Ok(self.state.lock().tenants.get(tenant_id).cloned())
    }

    async fn find_preference(
        &self,
        tenant_id: &str,
        user_id: &str,
        event_type: &str,
    ) -> Result<Option<NotificationPreference>> {
        Ok(self
            .state
            .lock()
            .preferences
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.user_id == user_id && p.event_type == event_type)
            .cloned())
    }

    async fn find_preferences(
        &self,
        tenant_id: &str,
        user_id: &str,
        event_types: &[String],
    ) -> Result<Vec<NotificationPreference>> {
        Ok(self
            .state
            .lock()
            .preferences
            .iter()
            .filter(|p| {
                p.tenant_id == tenant_id && p.user_id == user_id && event_types.contains(&p.event_type)
            })
            .cloned()
            .collect())
    }

    async fn find_template(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Option<NotificationTemplate>> {
        Ok(self
            .state
            .lock()
            .templates
            .get(&(tenant_id.to_string(), event_type.to_string()))
            .cloned())
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        self.check_writable()?;

        let notification = notification.into_notification(Uuid::new_v4());
        self.state.lock().notifications.push(notification.clone());
        Ok(notification)
    }

    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<NotificationDelivery> {
        self.check_writable()?;

        let delivery = delivery.into_pending(Uuid::new_v4());
        self.state.lock().deliveries.push(delivery.clone());
        Ok(delivery)
    }

    async fn update_delivery(&self, delivery_id: Uuid, update: DeliveryUpdate) -> Result<()> {
        let mut state = self.state.lock();
        let delivery = state
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_id)
            .ok_or_else(|| anyhow!("Delivery {} not found", delivery_id))?;

        delivery.status = update.status;
        delivery.provider_message_id = update.provider_message_id;
        delivery.error_message = update.error_message;
        delivery.metadata = update.metadata;
        Ok(())
    }

    async fn delivery_counts(&self, tenant_id: &str) -> Result<DeliveryCounts> {
        let state = self.state.lock();
        let recent_cutoff = Utc::now() - chrono::Duration::hours(24);

        let ids: HashSet<Uuid> = state
            .notifications
            .iter()
            .filter(|n| n.tenant_id == tenant_id)
            .map(|n| n.id)
            .collect();
        let deliveries: Vec<&NotificationDelivery> = state
            .deliveries
            .iter()
            .filter(|d| ids.contains(&d.notification_id))
            .collect();
        let delivered: HashSet<Uuid> = deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Sent)
            .map(|d| d.notification_id)
            .collect();
        let count_status = |status: DeliveryStatus| {
            deliveries.iter().filter(|d| d.status == status).count() as u64
        };

        Ok(DeliveryCounts {
            total: ids.len() as u64,
            recent_24h: state
                .notifications
                .iter()
                .filter(|n| n.tenant_id == tenant_id && n.created_at >= recent_cutoff)
                .count() as u64,
            pending: ids.iter().filter(|id| !delivered.contains(*id)).count() as u64,
            sent: count_status(DeliveryStatus::Sent),
            failed: count_status(DeliveryStatus::Failed),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDedupStore {
    keys: Mutex<HashMap<String, Instant>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys. Expired ones are swept on the next insert.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        keys.retain(|_, expires| *expires > now);

        if keys.contains_key(key) {
            return Ok(false);
        }

        keys.insert(key.to_string(), now + ttl);
        Ok(true)
    }
}

#[derive(Default)]
struct QueueState {
    sequence: u64,
    jobs: HashMap<String, QueueJob>,
    waiting: BTreeSet<(u8, u64, String)>,
    delayed: BTreeSet<(DateTime<Utc>, u64, String)>,
    /// Claim time per reserved job.
    active: HashMap<String, DateTime<Utc>>,
    completed: BTreeSet<(DateTime<Utc>, u64, String)>,
    failed: BTreeSet<(DateTime<Utc>, u64, String)>,
    recurring: HashMap<String, RecurringJob>,
    paused: bool,
    closed: bool,
}

impl QueueState {
    fn next_job(&mut self, kind: JobKind, data: &NotificationEvent, priority: u8, attempts: u32) -> QueueJob {
        self.sequence += 1;
        QueueJob::new(
            self.sequence.to_string(),
            kind,
            data.clone(),
            priority,
            self.sequence,
            attempts,
        )
    }

    fn push_waiting(&mut self, mut job: QueueJob) {
        job.state = JobState::Waiting;
        self.waiting
            .insert((job.priority, job.sequence, job.id.clone()));
        self.jobs.insert(job.id.clone(), job);
    }

    fn push_delayed(&mut self, mut job: QueueJob, ready_at: DateTime<Utc>) {
        job.state = JobState::Delayed;
        self.active.remove(&job.id);
        self.delayed
            .insert((ready_at, job.sequence, job.id.clone()));
        self.jobs.insert(job.id.clone(), job);
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<(DateTime<Utc>, u64, String)> = self
            .delayed
            .iter()
            .take_while(|(ready_at, _, _)| *ready_at <= now)
            .cloned()
            .collect();

        for entry in due {
            self.delayed.remove(&entry);
            if let Some(job) = self.jobs.remove(&entry.2) {
                self.push_waiting(job);
            }
        }
    }

    fn materialise_recurring(&mut self, now: DateTime<Utc>, attempts: u32) -> Result<()> {
        let due: Vec<RecurringJob> = self
            .recurring
            .values()
            .filter(|definition| definition.next_run <= now)
            .cloned()
            .collect();

        for mut definition in due {
            let mut job = self.next_job(
                JobKind::RecurringNotification,
                &definition.data,
                definition.priority,
                attempts,
            );
            job.repeat_pattern = Some(definition.pattern.clone());
            self.push_waiting(job);

            definition.next_run = next_occurrence(&parse_cron(&definition.pattern)?, now)?;
            self.recurring.insert(definition.key.clone(), definition);
        }

        Ok(())
    }

    fn fail_job(&mut self, mut job: QueueJob, error: &str, options: &JobOptions) -> Result<JobFailure> {
        job.attempts_made += 1;
        job.failed_reason = Some(error.to_string());

        if job.attempts_made < job.max_attempts {
            let attempt = job.attempts_made;
            let delay = options.backoff.delay_for_attempt(attempt);
            self.push_delayed(job, Utc::now() + chrono::Duration::from_std(delay)?);
            return Ok(JobFailure::Retrying { attempt, delay });
        }

        let attempts = job.attempts_made;
        job.state = JobState::Failed;
        job.finished_at = Some(Utc::now());
        self.finish(job, true, options.keep_failed);

        Ok(JobFailure::Exhausted { attempts })
    }

    fn finish(&mut self, job: QueueJob, failed: bool, keep: usize) {
        let finished_at = job.finished_at.unwrap_or_else(Utc::now);
        self.active.remove(&job.id);

        let history = if failed {
            &mut self.failed
        } else {
            &mut self.completed
        };
        history.insert((finished_at, job.sequence, job.id.clone()));

        let mut removed = Vec::new();
        while history.len() > keep {
            if let Some(oldest) = history.pop_first() {
                removed.push(oldest.2);
            }
        }

        self.jobs.insert(job.id.clone(), job);
        for id in removed {
            self.jobs.remove(&id);
        }
    }

    fn clean(&mut self, failed: bool, max_age: chrono::Duration, keep: usize) -> u64 {
        let cutoff = Utc::now() - max_age;
        let history = if failed {
            &mut self.failed
        } else {
            &mut self.completed
        };

        let removable = history.len().saturating_sub(keep);
        let purge: Vec<(DateTime<Utc>, u64, String)> = history
            .iter()
            .take(removable)
            .take_while(|(finished_at, _, _)| *finished_at <= cutoff)
            .cloned()
            .collect();

        for entry in &purge {
            history.remove(entry);
        }
        for entry in &purge {
            self.jobs.remove(&entry.2);
        }

        purge.len() as u64
    }
}

/// Same ordering, retry and retention rules as the Redis queue.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    options: JobOptions,
    fail_enqueue: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new(options: JobOptions) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            options,
            fail_enqueue: AtomicBool::new(false),
        }
    }

    /// Makes every add_* call fail, as when the broker is unreachable.
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    pub fn job(&self, id: &str) -> Option<QueueJob> {
        self.state.lock().jobs.get(id).cloned()
    }

    pub fn recurring_jobs(&self) -> Vec<RecurringJob> {
        self.state.lock().recurring.values().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Removes history older than the given ages, always keeping the most recent jobs.
    pub fn clean_jobs_older_than(&self, completed_age: Duration, failed_age: Duration) -> Result<u64> {
        let mut state = self.open_state()?;
        let completed = state.clean(
            false,
            chrono::Duration::from_std(completed_age)?,
            CLEAN_KEEP_COMPLETED,
        );
        let failed = state.clean(
            true,
            chrono::Duration::from_std(failed_age)?,
            CLEAN_KEEP_FAILED,
        );
        Ok(completed + failed)
    }

    fn open_state(&self) -> Result<parking_lot::MutexGuard<'_, QueueState>> {
        let state = self.state.lock();
        if state.closed {
            bail!("Queue is closed");
        }
        Ok(state)
    }

    fn enqueue_state(&self) -> Result<parking_lot::MutexGuard<'_, QueueState>> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            bail!("Queue backend unavailable");
        }
        self.open_state()
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(JobOptions::default())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn add_job(&self, data: &NotificationEvent, priority: Option<u8>) -> Result<String> {
        let mut state = self.enqueue_state()?;
        let priority = priority.unwrap_or_else(|| NotificationPolicy::queue_priority(data.urgency));

        let job = state.next_job(JobKind::Notification, data, priority, self.options.attempts);
        let id = job.id.clone();
        state.push_waiting(job);

        debug!(job_id = %id, priority, "Job added");
        Ok(id)
    }

    async fn add_scheduled_job(&self, data: &NotificationEvent, delay: Duration) -> Result<String> {
        let mut state = self.enqueue_state()?;
        let priority = NotificationPolicy::queue_priority(data.urgency);

        let job = state.next_job(
            JobKind::ScheduledNotification,
            data,
            priority,
            self.options.attempts,
        );
        let id = job.id.clone();
        state.push_delayed(job, Utc::now() + chrono::Duration::from_std(delay)?);

        Ok(id)
    }

    async fn add_recurring_job(&self, data: &NotificationEvent, pattern: &str) -> Result<String> {
        let schedule = parse_cron(pattern)?;
        let mut state = self.enqueue_state()?;

        let key = recurring_key(data, pattern);
        state.recurring.insert(
            key.clone(),
            RecurringJob {
                key: key.clone(),
                pattern: pattern.to_string(),
                data: data.clone(),
                priority: NotificationPolicy::queue_priority(data.urgency),
                next_run: next_occurrence(&schedule, Utc::now())?,
            },
        );

        Ok(key)
    }

    async fn reserve(&self) -> Result<Option<QueueJob>> {
        let mut state = self.open_state()?;
        if state.paused {
            return Ok(None);
        }

        let now = Utc::now();
        state.materialise_recurring(now, self.options.attempts)?;
        state.promote_due(now);

        let Some(entry) = state.waiting.pop_first() else {
            return Ok(None);
        };

        let id = entry.2;
        state.active.insert(id.clone(), now);

        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Job {} body missing", id))?;
        job.state = JobState::Active;
        job.processed_at = Some(now);

        Ok(Some(job.clone()))
    }

    async fn complete(&self, job: &QueueJob) -> Result<()> {
        let mut state = self.open_state()?;

        let mut job = job.clone();
        job.state = JobState::Completed;
        job.attempts_made += 1;
        job.finished_at = Some(Utc::now());

        state.finish(job, false, self.options.keep_completed);
        Ok(())
    }

    async fn fail(&self, job: &QueueJob, error: &str) -> Result<JobFailure> {
        let mut state = self.open_state()?;
        state.fail_job(job.clone(), error, &self.options)
    }

    async fn recover_stalled(&self, lock_timeout: Duration) -> Result<u64> {
        let mut state = self.open_state()?;
        let cutoff = Utc::now() - chrono::Duration::from_std(lock_timeout)?;

        let stalled: Vec<String> = state
            .active
            .iter()
            .filter(|(_, claimed_at)| **claimed_at <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        let mut recovered = 0;
        for id in stalled {
            state.active.remove(&id);
            let Some(job) = state.jobs.get(&id).cloned() else {
                continue;
            };

            let outcome = state.fail_job(job, STALLED_JOB_ERROR, &self.options)?;
            warn!(job_id = %id, ?outcome, "Stalled job recovered");
            recovered += 1;
        }

        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.open_state()?;

        Ok(QueueStats {
            waiting: state.waiting.len() as u64,
            active: state.active.len() as u64,
            completed: state.completed.len() as u64,
            failed: state.failed.len() as u64,
            delayed: state.delayed.len() as u64,
        })
    }

    async fn pause(&self) -> Result<()> {
        self.open_state()?.paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.open_state()?.paused = false;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    async fn clean_old_jobs(&self) -> Result<u64> {
        self.clean_jobs_older_than(COMPLETED_RETENTION, FAILED_RETENTION)
    }
}

#[derive(Default)]
pub struct RecordingRealtimeTransport {
    published: Mutex<Vec<(String, RealtimeMessage)>>,
    fail_with: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingRealtimeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: Option<&str>) {
        *self.fail_with.lock() = error.map(str::to_string);
    }

    pub fn published(&self) -> Vec<(String, RealtimeMessage)> {
        self.published.lock().clone()
    }

    /// Every publish takes at least this long.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Highest number of publishes observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeTransport for RecordingRealtimeTransport {
    fn provider(&self) -> &'static str {
        "IN_MEMORY"
    }

    async fn publish(&self, event_name: &str, message: RealtimeMessage) -> Result<()> {
        if let Some(error) = self.fail_with.lock().clone() {
            bail!(error);
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.published
            .lock()
            .push((event_name.to_string(), message));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmailBehavior {
    Accept,
    /// The provider answers `success: false` with this error.
    Reject(String),
    /// The call itself fails.
    Fail(String),
}

pub struct RecordingEmailTransport {
    sent: Mutex<Vec<(String, TransactionalEmail)>>,
    behavior: Mutex<EmailBehavior>,
}

impl RecordingEmailTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            behavior: Mutex::new(EmailBehavior::Accept),
        }
    }

    pub fn set_behavior(&self, behavior: EmailBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn sent(&self) -> Vec<(String, TransactionalEmail)> {
        self.sent.lock().clone()
    }
}

impl Default for RecordingEmailTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmailTransport {
    fn provider(&self) -> &'static str {
        "IN_MEMORY"
    }

    async fn send_transactional_email(
        &self,
        tenant_id: &str,
        email: TransactionalEmail,
    ) -> Result<EmailSendResult> {
        let behavior = self.behavior.lock().clone();

        match behavior {
            EmailBehavior::Fail(error) => Err(anyhow!(error)),
            EmailBehavior::Reject(error) => {
                self.sent.lock().push((tenant_id.to_string(), email));
                Ok(EmailSendResult {
                    success: false,
                    message_id: None,
                    error: Some(error),
                })
            }
            EmailBehavior::Accept => {
                let mut sent = self.sent.lock();
                sent.push((tenant_id.to_string(), email));
                Ok(EmailSendResult {
                    success: true,
                    message_id: Some(format!("mem-{}", sent.len())),
                    error: None,
                })
            }
        }
    }
}
