use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use tracing::{debug, info, warn};

use crate::{
    clients::redis::RedisConnection,
    domain::policy::NotificationPolicy,
    models::{
        event::NotificationEvent,
        job::{
            CLEAN_KEEP_COMPLETED, CLEAN_KEEP_FAILED, COMPLETED_RETENTION, FAILED_RETENTION,
            JobFailure, JobKind, JobOptions, QueueJob, QueueStats, RecurringJob, STALLED_JOB_ERROR,
        },
        status::JobState,
    },
    ports::JobQueue,
};

const PROMOTE_BATCH: isize = 100;
const OCCURRENCE_LOCK_MS: u64 = 24 * 60 * 60 * 1000;

/// Pops the best waiting id and stamps it into the active set in one step.
const CLAIM_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped[1]
"#;

/// Accepts 5-field (minute precision) and 6/7-field cron patterns.
pub fn parse_cron(pattern: &str) -> Result<Schedule> {
    let fields = pattern.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", pattern.trim())
    } else {
        pattern.trim().to_string()
    };

    Schedule::from_str(&normalized).with_context(|| format!("Invalid cron pattern '{}'", pattern))
}

pub fn next_occurrence(schedule: &Schedule, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| anyhow!("Cron pattern has no upcoming occurrence"))
}

pub fn recurring_key(data: &NotificationEvent, pattern: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        data.tenant_id, data.user_id, data.event_type, pattern
    )
}

/// Lower priority first, FIFO within a priority.
fn waiting_score(job: &QueueJob) -> f64 {
    job.priority as f64 * 1e12 + job.sequence as f64
}

/// Priority job queue on Redis sorted sets, safe for competing consumers.
pub struct RedisJobQueue {
    redis: Arc<RedisConnection>,
    name: String,
    options: JobOptions,
    closed: AtomicBool,
    claim_script: Script,
}

impl RedisJobQueue {
    pub fn new(redis: Arc<RedisConnection>, name: impl Into<String>, options: JobOptions) -> Self {
        Self {
            redis,
            name: name.into(),
            options,
            closed: AtomicBool::new(false),
            claim_script: Script::new(CLAIM_SCRIPT),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.name, suffix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.name, id)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            bail!("Queue {} is closed", self.name);
        }
        self.redis.get().await
    }

    async fn next_job(
        &self,
        conn: &mut ConnectionManager,
        kind: JobKind,
        data: &NotificationEvent,
        priority: u8,
    ) -> Result<QueueJob> {
        let sequence: u64 = conn.incr(self.key("id"), 1).await?;

        Ok(QueueJob::new(
            sequence.to_string(),
            kind,
            data.clone(),
            priority,
            sequence,
            self.options.attempts,
        ))
    }

    async fn push_waiting(&self, conn: &mut ConnectionManager, job: &QueueJob) -> Result<()> {
        let body = serde_json::to_string(job)?;

        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(&job.id), body)
            .ignore()
            .zadd(self.key("waiting"), &job.id, waiting_score(job))
            .ignore()
            .query_async(conn)
            .await
            .context("Failed to enqueue job")?;

        Ok(())
    }

    async fn push_delayed(
        &self,
        conn: &mut ConnectionManager,
        job: &QueueJob,
        ready_at: DateTime<Utc>,
    ) -> Result<()> {
        let body = serde_json::to_string(job)?;

        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(&job.id), body)
            .ignore()
            .zrem(self.key("active"), &job.id)
            .ignore()
            .zadd(self.key("delayed"), &job.id, ready_at.timestamp_millis())
            .ignore()
            .query_async(conn)
            .await
            .context("Failed to schedule job")?;

        Ok(())
    }

    async fn load_job(&self, conn: &mut ConnectionManager, id: &str) -> Result<Option<QueueJob>> {
        let body: Option<String> = conn.get(self.job_key(id)).await?;

        body.map(|body| serde_json::from_str(&body).context("Corrupt job body"))
            .transpose()
    }

    /// Enqueues each recurring occurrence that is due. The occurrence lock makes
    /// exactly one consumer materialise it.
    async fn materialise_recurring(
        &self,
        conn: &mut ConnectionManager,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let definitions: HashMap<String, String> = conn.hgetall(self.key("repeat")).await?;

        for (key, body) in definitions {
            let mut definition: RecurringJob = match serde_json::from_str(&body) {
                Ok(definition) => definition,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping corrupt recurring job definition");
                    continue;
                }
            };

            if definition.next_run > now {
                continue;
            }

            let lock = self.key(&format!(
                "repeat:lock:{}:{}",
                key,
                definition.next_run.timestamp_millis()
            ));
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&lock)
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(OCCURRENCE_LOCK_MS)
                .query_async(conn)
                .await?;

            if acquired.is_none() {
                continue;
            }

            let mut job = self
                .next_job(conn, JobKind::RecurringNotification, &definition.data, definition.priority)
                .await?;
            job.repeat_pattern = Some(definition.pattern.clone());
            self.push_waiting(conn, &job).await?;

            let schedule = parse_cron(&definition.pattern)?;
            definition.next_run = next_occurrence(&schedule, now)?;

            let _: () = conn
                .hset(self.key("repeat"), &key, serde_json::to_string(&definition)?)
                .await?;

            debug!(key = %key, job_id = %job.id, next_run = %definition.next_run, "Recurring job materialised");
        }

        Ok(())
    }

    /// Moves due delayed jobs to waiting. `ZREM` decides which consumer moves each one.
    async fn promote_delayed(&self, conn: &mut ConnectionManager, now: DateTime<Utc>) -> Result<()> {
        let due: Vec<String> = conn
            .zrangebyscore_limit(
                self.key("delayed"),
                "-inf",
                now.timestamp_millis(),
                0,
                PROMOTE_BATCH,
            )
            .await?;

        for id in due {
            let removed: u64 = conn.zrem(self.key("delayed"), &id).await?;
            if removed != 1 {
                continue;
            }

            match self.load_job(conn, &id).await? {
                Some(mut job) => {
                    job.state = JobState::Waiting;
                    self.push_waiting(conn, &job).await?;
                }
                None => warn!(job_id = %id, "Delayed job body missing, dropping"),
            }
        }

        Ok(())
    }

    async fn finish(
        &self,
        conn: &mut ConnectionManager,
        job: &QueueJob,
        set: &str,
        keep: usize,
    ) -> Result<()> {
        let body = serde_json::to_string(job)?;
        let finished_at = job.finished_at.unwrap_or_else(Utc::now);

        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(&job.id), body)
            .ignore()
            .zrem(self.key("active"), &job.id)
            .ignore()
            .zadd(self.key(set), &job.id, finished_at.timestamp_millis())
            .ignore()
            .query_async(conn)
            .await?;

        self.trim_history(conn, set, keep).await
    }

    /// Keeps only the `keep` most recent entries of a history set.
    async fn trim_history(&self, conn: &mut ConnectionManager, set: &str, keep: usize) -> Result<()> {
        let len: usize = conn.zcard(self.key(set)).await?;
        if len <= keep {
            return Ok(());
        }

        let excess = (len - keep) as isize;
        let ids: Vec<String> = conn.zrange(self.key(set), 0, excess - 1).await?;
        self.purge(conn, set, &ids).await?;

        Ok(())
    }

    async fn purge(&self, conn: &mut ConnectionManager, set: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let job_keys: Vec<String> = ids.iter().map(|id| self.job_key(id)).collect();

        let (removed,): (u64,) = redis::pipe()
            .atomic()
            .zrem(self.key(set), ids)
            .del(job_keys)
            .ignore()
            .query_async(conn)
            .await?;

        Ok(removed)
    }

    async fn clean_set(
        &self,
        conn: &mut ConnectionManager,
        set: &str,
        max_age: Duration,
        keep: usize,
    ) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age)?;

        let len: usize = conn.zcard(self.key(set)).await?;
        let removable = len.saturating_sub(keep);
        if removable == 0 {
            return Ok(0);
        }

        let old: Vec<String> = conn
            .zrangebyscore(self.key(set), "-inf", cutoff.timestamp_millis())
            .await?;
        let purgeable: Vec<String> = old.into_iter().take(removable).collect();

        self.purge(conn, set, &purgeable).await
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn add_job(&self, data: &NotificationEvent, priority: Option<u8>) -> Result<String> {
        let mut conn = self.connection().await?;
        let priority = priority.unwrap_or_else(|| NotificationPolicy::queue_priority(data.urgency));

        let job = self
            .next_job(&mut conn, JobKind::Notification, data, priority)
            .await?;
        self.push_waiting(&mut conn, &job).await?;

        debug!(job_id = %job.id, priority, event_type = %data.event_type, "Job added");
        Ok(job.id)
    }

    async fn add_scheduled_job(&self, data: &NotificationEvent, delay: Duration) -> Result<String> {
        let mut conn = self.connection().await?;
        let priority = NotificationPolicy::queue_priority(data.urgency);

        let mut job = self
            .next_job(&mut conn, JobKind::ScheduledNotification, data, priority)
            .await?;
        job.state = JobState::Delayed;

        let ready_at = Utc::now() + chrono::Duration::from_std(delay)?;
        self.push_delayed(&mut conn, &job, ready_at).await?;

        debug!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "Scheduled job added");
        Ok(job.id)
    }

    async fn add_recurring_job(&self, data: &NotificationEvent, pattern: &str) -> Result<String> {
        let schedule = parse_cron(pattern)?;
        let mut conn = self.connection().await?;

        let key = recurring_key(data, pattern);
        let definition = RecurringJob {
            key: key.clone(),
            pattern: pattern.to_string(),
            data: data.clone(),
            priority: NotificationPolicy::queue_priority(data.urgency),
            next_run: next_occurrence(&schedule, Utc::now())?,
        };

        let _: () = conn
            .hset(self.key("repeat"), &key, serde_json::to_string(&definition)?)
            .await?;

        info!(key = %key, pattern, next_run = %definition.next_run, "Recurring job registered");
        Ok(key)
    }

    async fn reserve(&self) -> Result<Option<QueueJob>> {
        let mut conn = self.connection().await?;

        let paused: bool = conn.exists(self.key("paused")).await?;
        if paused {
            return Ok(None);
        }

        let now = Utc::now();
        self.materialise_recurring(&mut conn, now).await?;
        self.promote_delayed(&mut conn, now).await?;

        loop {
            let claimed_at = Utc::now();
            let claimed: Option<String> = self
                .claim_script
                .key(self.key("waiting"))
                .key(self.key("active"))
                .arg(claimed_at.timestamp_millis())
                .invoke_async(&mut conn)
                .await
                .context("Failed to claim job")?;

            let Some(id) = claimed else {
                return Ok(None);
            };

            let Some(mut job) = self.load_job(&mut conn, &id).await? else {
                warn!(job_id = %id, "Waiting job body missing, skipping");
                let _: () = conn.zrem(self.key("active"), &id).await?;
                continue;
            };

            job.state = JobState::Active;
            job.processed_at = Some(claimed_at);

            let _: () = conn
                .set(self.job_key(&job.id), serde_json::to_string(&job)?)
                .await?;

            return Ok(Some(job));
        }
    }

    async fn complete(&self, job: &QueueJob) -> Result<()> {
        let mut conn = self.connection().await?;

        let mut job = job.clone();
        job.state = JobState::Completed;
        job.attempts_made += 1;
        job.finished_at = Some(Utc::now());

        self.finish(&mut conn, &job, "completed", self.options.keep_completed)
            .await
    }

    async fn fail(&self, job: &QueueJob, error: &str) -> Result<JobFailure> {
        let mut conn = self.connection().await?;

        let mut job = job.clone();
        job.attempts_made += 1;
        job.failed_reason = Some(error.to_string());

        if job.attempts_made < job.max_attempts {
            let delay = self.options.backoff.delay_for_attempt(job.attempts_made);
            job.state = JobState::Delayed;

            let ready_at = Utc::now() + chrono::Duration::from_std(delay)?;
            self.push_delayed(&mut conn, &job, ready_at).await?;

            return Ok(JobFailure::Retrying {
                attempt: job.attempts_made,
                delay,
            });
        }

        job.state = JobState::Failed;
        job.finished_at = Some(Utc::now());
        self.finish(&mut conn, &job, "failed", self.options.keep_failed)
            .await?;

        Ok(JobFailure::Exhausted {
            attempts: job.attempts_made,
        })
    }

    async fn recover_stalled(&self, lock_timeout: Duration) -> Result<u64> {
        let mut conn = self.connection().await?;
        let cutoff = Utc::now() - chrono::Duration::from_std(lock_timeout)?;

        let stalled: Vec<String> = conn
            .zrangebyscore_limit(
                self.key("active"),
                "-inf",
                cutoff.timestamp_millis(),
                0,
                PROMOTE_BATCH,
            )
            .await?;

        let mut recovered = 0;
        for id in stalled {
            let removed: u64 = conn.zrem(self.key("active"), &id).await?;
            if removed != 1 {
                continue;
            }

            let Some(job) = self.load_job(&mut conn, &id).await? else {
                warn!(job_id = %id, "Stalled job body missing, dropping");
                continue;
            };

            let outcome = self.fail(&job, STALLED_JOB_ERROR).await?;
            warn!(job_id = %id, ?outcome, "Stalled job recovered");
            recovered += 1;
        }

        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.connection().await?;

        let (waiting, active, completed, failed, delayed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .zcard(self.key("waiting"))
                .zcard(self.key("active"))
                .zcard(self.key("completed"))
                .zcard(self.key("failed"))
                .zcard(self.key("delayed"))
                .query_async(&mut conn)
                .await?;

        Ok(QueueStats {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn pause(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set(self.key("paused"), 1).await?;
        info!(queue = %self.name, "Queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.key("paused")).await?;
        info!(queue = %self.name, "Queue resumed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(queue = %self.name, "Queue closed");
        }
        Ok(())
    }

    async fn clean_old_jobs(&self) -> Result<u64> {
        let mut conn = self.connection().await?;

        let completed = self
            .clean_set(&mut conn, "completed", COMPLETED_RETENTION, CLEAN_KEEP_COMPLETED)
            .await?;
        let failed = self
            .clean_set(&mut conn, "failed", FAILED_RETENTION, CLEAN_KEEP_FAILED)
            .await?;

        info!(queue = %self.name, completed, failed, "Old jobs cleaned");
        Ok(completed + failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_patterns_get_a_seconds_field() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 */5 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }
}
