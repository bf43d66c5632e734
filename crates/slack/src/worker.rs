use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::config::AppConfig;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::{EventContext, EventRouter, SlackEnvelope};
use crate::lifecycle::{EventLifecycle, EventState};

pub const DEFAULT_JOB_BUDGET: Duration = Duration::from_secs(180);

/// One acknowledged event waiting for a worker.
#[derive(Debug)]
pub struct WorkItem {
    pub envelope: SlackEnvelope,
    pub context: EventContext,
    pub lifecycle: EventLifecycle,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Jobs running longer than this are logged at warn.
    pub job_budget: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { worker_count: 4, queue_capacity: 32, job_budget: DEFAULT_JOB_BUDGET }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig, job_budget: Duration) -> Self {
        Self {
            worker_count: config.pipeline.worker_count,
            queue_capacity: config.pipeline.queue_capacity,
            job_budget,
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker queue is full")]
    Full,
    #[error("worker pool has shut down")]
    Closed,
}

/// Fixed set of workers draining a bounded queue. Submission never waits.
#[derive(Clone)]
pub struct WorkerPool {
    sender: mpsc::Sender<WorkItem>,
    // Keeps the queue open for the pool's lifetime, even with zero workers.
    _queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    /// Accepted jobs not yet finished, queued or running. Raised before the
    /// item enters the queue and lowered only after its job returns.
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn spawn(router: Arc<EventRouter>, settings: WorkerSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(AtomicUsize::new(0));

        for worker_id in 0..settings.worker_count {
            tokio::spawn(worker_loop(Worker {
                id: worker_id,
                receiver: Arc::clone(&receiver),
                router: Arc::clone(&router),
                in_flight: Arc::clone(&in_flight),
                budget: settings.job_budget,
            }));
        }

        info!(
            event_name = "worker.pool.started",
            worker_count = settings.worker_count,
            queue_capacity = settings.queue_capacity,
            job_budget_ms = duration_ms(settings.job_budget),
            "worker pool started"
        );
        Self { sender, _queue: receiver, in_flight }
    }

    pub fn try_submit(&self, item: WorkItem) -> Result<(), SubmitError> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.sender.try_send(item).map_err(|error| {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            match error {
                TrySendError::Full(_) => SubmitError::Full,
                TrySendError::Closed(_) => SubmitError::Closed,
            }
        })
    }

    pub fn available_slots(&self) -> usize {
        self.sender.capacity()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    /// Waits up to `grace` for queued and running jobs to finish. Returns
    /// whether the pool went idle in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let idle = tokio::time::timeout(grace, async {
            while !self.is_idle() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !idle {
            let queued = self.sender.max_capacity() - self.sender.capacity();
            warn!(
                event_name = "worker.pool.drain_timeout",
                queued,
                running = self.in_flight.load(Ordering::Acquire).saturating_sub(queued),
                "shutdown grace elapsed with jobs still pending"
            );
        }
        idle
    }
}

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Worker {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    router: Arc<EventRouter>,
    in_flight: Arc<AtomicUsize>,
    budget: Duration,
}

async fn worker_loop(worker: Worker) {
    loop {
        let next = worker.receiver.lock().await.recv().await;
        let Some(item) = next else {
            debug!(event_name = "worker.stopped", worker_id = worker.id, "queue closed; worker exiting");
            return;
        };

        let event_id = item.context.event_id.clone();
        let correlation_id = item.context.correlation_id.clone();
        let job = tokio::spawn(run_job(Arc::clone(&worker.router), item, worker.budget));
        let joined = job.await;
        worker.in_flight.fetch_sub(1, Ordering::AcqRel);

        if let Err(join_error) = joined {
            error!(
                event_name = "worker.job.panicked",
                worker_id = worker.id,
                event_id = %event_id,
                correlation_id = %correlation_id,
                error = %join_error,
                "job aborted; worker continues"
            );
        }
    }
}

async fn run_job(router: Arc<EventRouter>, mut item: WorkItem, budget: Duration) {
    advance(&mut item.lifecycle, EventState::Processing);
    let started = Instant::now();
    let result = router.route(&item.envelope, &item.context).await;
    let elapsed = started.elapsed();

    match &result {
        Ok(handled) => {
            advance(&mut item.lifecycle, EventState::Completed);
            info!(
                event_name = "worker.job.completed",
                event_id = %item.context.event_id,
                correlation_id = %item.context.correlation_id,
                event_type = item.envelope.event.event_type().as_str(),
                result = ?handled,
                elapsed_ms = duration_ms(elapsed),
                "job completed"
            );
        }
        Err(handler_error) => {
            advance(&mut item.lifecycle, EventState::Failed);
            error!(
                event_name = "worker.job.failed",
                event_id = %item.context.event_id,
                correlation_id = %item.context.correlation_id,
                failure_kind = %handler_error.kind(),
                error = %handler_error,
                elapsed_ms = duration_ms(elapsed),
                "job failed"
            );
        }
    }

    if elapsed > budget {
        warn!(
            event_name = "worker.job.over_budget",
            event_id = %item.context.event_id,
            elapsed_ms = duration_ms(elapsed),
            budget_ms = duration_ms(budget),
            "job exceeded its worst-case budget"
        );
    }
}

fn advance(lifecycle: &mut EventLifecycle, next: EventState) {
    if let Err(error) = lifecycle.transition_to(next) {
        warn!(event_name = "worker.lifecycle.rejected", error = %error, "illegal lifecycle transition");
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
