use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{event::NotificationEvent, retry::RetryConfig, status::JobState};

pub const COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const FAILED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Most recent finished jobs that periodic cleaning never removes.
pub const CLEAN_KEEP_COMPLETED: usize = 100;
pub const CLEAN_KEEP_FAILED: usize = 50;

pub const STALLED_JOB_ERROR: &str = "Job stalled: lock expired before completion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Notification,
    ScheduledNotification,
    RecurringNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    pub id: String,
    pub kind: JobKind,
    pub data: NotificationEvent,
    /// 1 is served first.
    pub priority: u8,
    pub sequence: u64,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub failed_reason: Option<String>,

    #[serde(default)]
    pub repeat_pattern: Option<String>,
}

impl QueueJob {
    pub fn new(
        id: String,
        kind: JobKind,
        data: NotificationEvent,
        priority: u8,
        sequence: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            id,
            kind,
            data,
            priority,
            sequence,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts,
            created_at: Utc::now(),
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            repeat_pattern: None,
        }
    }
}

/// A cron-driven job definition. Each due occurrence becomes a regular job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringJob {
    pub key: String,
    pub pattern: String,
    pub data: NotificationEvent,
    pub priority: u8,
    pub next_run: DateTime<Utc>,
}

/// Defaults applied to every job: attempts, backoff, and how much history is kept.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: RetryConfig,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: RetryConfig::default(),
            keep_completed: 100,
            keep_failed: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    Retrying { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

impl JobFailure {
    pub fn will_retry(&self) -> bool {
        matches!(self, JobFailure::Retrying { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            JobFailure::Retrying { attempt, .. } => *attempt,
            JobFailure::Exhausted { attempts } => *attempts,
        }
    }
}
