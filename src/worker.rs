use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{models::job::QueueJob, ports::JobQueue, service::NotificationService};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Ready,
    Completed {
        job_id: String,
    },
    Failed {
        job_id: String,
        attempts: u32,
        will_retry: bool,
        error: String,
    },
    Error(String),
}

/// Competing consumer pool. Each slot claims and processes one job at a time,
/// so `concurrency` bounds the number of jobs in flight.
pub struct NotificationWorker {
    service: Arc<NotificationService>,
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl NotificationWorker {
    pub fn new(service: Arc<NotificationService>, queue: Arc<dyn JobQueue>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        Self {
            service,
            queue,
            config,
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn start(&self) {
        let concurrency = self.config.concurrency.max(1);
        info!(concurrency, "Starting notification worker");

        let mut tasks = self.tasks.lock();
        for slot in 0..concurrency {
            let service = self.service.clone();
            let queue = self.queue.clone();
            let token = self.cancellation_token.clone();
            let event_tx = self.event_tx.clone();
            let poll_interval = self.config.poll_interval;

            tasks.spawn(async move {
                debug!(slot, "Worker slot started");

                while !token.is_cancelled() {
                    let job = match queue.reserve().await {
                        Ok(Some(job)) => job,
                        Ok(None) => {
                            tokio::select! {
                                _ = token.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => continue,
                            }
                        }
                        Err(e) => {
                            error!(slot, error = %e, "Failed to reserve job");
                            let _ = event_tx.send(WorkerEvent::Error(e.to_string()));
                            tokio::select! {
                                _ = token.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => continue,
                            }
                        }
                    };

                    let event = process_job(&service, queue.as_ref(), job).await;
                    let _ = event_tx.send(event);
                }

                debug!(slot, "Worker slot stopped");
            });
        }

        let _ = self.event_tx.send(WorkerEvent::Ready);
    }

    /// Stops claiming jobs, waits for in-flight ones, then closes the queue handle.
    pub async fn stop(&self) {
        info!("Stopping notification worker");
        self.cancellation_token.cancel();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker slot ended abnormally");
            }
        }

        if let Err(e) = self.queue.close().await {
            warn!(error = %e, "Failed to close queue");
        }

        info!("Notification worker stopped");
    }
}

async fn process_job(service: &NotificationService, queue: &dyn JobQueue, job: QueueJob) -> WorkerEvent {
    debug!(job_id = %job.id, event_type = %job.data.event_type, attempt = job.attempts_made + 1, "Processing job");

    match service.process_sync(&job.data).await {
        Ok(_) => match queue.complete(&job).await {
            Ok(()) => WorkerEvent::Completed { job_id: job.id },
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                WorkerEvent::Error(e.to_string())
            }
        },
        Err(e) => {
            let error = e.to_string();

            match queue.fail(&job, &error).await {
                Ok(failure) => {
                    warn!(
                        job_id = %job.id,
                        attempts = failure.attempts(),
                        will_retry = failure.will_retry(),
                        error = %error,
                        "Job failed"
                    );
                    WorkerEvent::Failed {
                        job_id: job.id,
                        attempts: failure.attempts(),
                        will_retry: failure.will_retry(),
                        error,
                    }
                }
                Err(fail_err) => {
                    error!(job_id = %job.id, error = %fail_err, "Failed to record job failure");
                    WorkerEvent::Error(fail_err.to_string())
                }
            }
        }
    }
}
