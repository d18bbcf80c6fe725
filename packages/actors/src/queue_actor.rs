//! Queue actor: the single writer of the job table.
//!
//! Jobs are admitted FIFO into a fixed pool of worker actors. The actor keeps
//! at most one in-flight job per cache key, counts attempts, schedules
//! retries and emits a `CacheEvent` for every transition.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cache_core::{
    CacheEvent, CacheJob, CacheKey, CacheRecord, CacheRequest, JobError, JobId, JobStage,
    JobStatus, QueueConfig, QueueError, QueueStats,
};
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::messages::{QueueMessage, WorkerMessage};
use crate::pipeline::CachePipeline;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Queue actor arguments.
pub struct QueueArgs {
    pub config: QueueConfig,
    pub pipeline: Arc<CachePipeline>,
    pub event_tx: broadcast::Sender<CacheEvent>,
}

/// State for the queue actor.
pub struct QueueActorState {
    config: QueueConfig,
    pipeline: Arc<CachePipeline>,
    event_tx: broadcast::Sender<CacheEvent>,
    /// All retained jobs by ID.
    jobs: HashMap<JobId, CacheJob>,
    /// Non-terminal job per dedup key.
    in_flight: HashMap<CacheKey, JobId>,
    /// Queued jobs ready to run, oldest first.
    pending: VecDeque<JobId>,
    /// Active jobs and the worker holding each.
    running: HashMap<JobId, ActorId>,
    workers: HashMap<ActorId, ActorRef<WorkerMessage>>,
    idle: VecDeque<ActorId>,
    accepting: bool,
}

impl QueueActorState {
    fn new(args: QueueArgs) -> Self {
        Self {
            config: args.config,
            pipeline: args.pipeline,
            event_tx: args.event_tx,
            jobs: HashMap::new(),
            in_flight: HashMap::new(),
            pending: VecDeque::new(),
            running: HashMap::new(),
            workers: HashMap::new(),
            idle: VecDeque::new(),
            accepting: true,
        }
    }

    /// Broadcast an event. Having no subscribers is fine.
    fn emit(&self, event: CacheEvent) {
        tracing::trace!(key = %event.key(), "{}", event.description());
        let _ = self.event_tx.send(event);
    }

    fn emit_status(&self, job: &CacheJob, old_status: JobStatus, timestamp: DateTime<Utc>) {
        self.emit(CacheEvent::JobStatusChanged {
            job_id: job.id,
            key: job.key(),
            old_status,
            new_status: job.status,
            progress: job.progress.clone(),
            error: job.error.clone(),
            attempts: job.attempts,
            timestamp,
        });
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn queued_len(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count()
    }

    fn enqueue(&mut self, request: CacheRequest) -> Result<JobId, QueueError> {
        if !self.accepting {
            return Err(QueueError::ShuttingDown);
        }
        request.validate().map_err(QueueError::InvalidRequest)?;

        if let Some(existing) = self.in_flight.get(&request.key) {
            tracing::debug!(key = %request.key, job_id = %existing, "Coalesced duplicate request");
            return Ok(*existing);
        }

        if let Some(max_pending) = self.config.max_pending {
            let queued = self.queued_len();
            if queued >= max_pending {
                return Err(QueueError::QueueFull(queued));
            }
        }

        let job = CacheJob::new(request);
        let job_id = job.id;
        tracing::info!(%job_id, key = %job.key(), "Enqueued cache job");

        self.in_flight.insert(job.key(), job_id);
        self.pending.push_back(job_id);
        self.jobs.insert(job_id, job.clone());

        self.emit(CacheEvent::JobEnqueued {
            job,
            timestamp: Utc::now(),
        });

        Ok(job_id)
    }

    fn next_idle_worker(&mut self) -> Option<(ActorId, ActorRef<WorkerMessage>)> {
        while let Some(id) = self.idle.pop_front() {
            if let Some(worker) = self.workers.get(&id) {
                return Some((id, worker.clone()));
            }
        }
        None
    }

    /// Hand queued jobs to idle workers while slots are free.
    fn dispatch(&mut self, myself: &ActorRef<QueueMessage>) {
        while self.running.len() < self.config.concurrency.max(1) {
            let Some(&job_id) = self.pending.front() else {
                break;
            };
            let Some((worker_id, worker)) = self.next_idle_worker() else {
                break;
            };
            self.pending.pop_front();

            let Some(job) = self.activate(job_id, worker_id) else {
                self.idle.push_front(worker_id);
                continue;
            };

            if let Err(e) = worker.send_message(WorkerMessage::ProcessJob { job: Box::new(job) }) {
                // The supervision event for this worker will replace it.
                tracing::warn!(%job_id, "Failed to hand job to worker: {}", e);
                self.finish_attempt(myself, job_id, Err(JobError::WorkerLost(e.to_string())));
            }
        }
    }

    fn activate(&mut self, job_id: JobId, worker_id: ActorId) -> Option<CacheJob> {
        let now = Utc::now();
        let job = self.jobs.get_mut(&job_id)?;
        if job.status != JobStatus::Queued {
            return None;
        }

        let old_status = job.status;
        job.status = JobStatus::Active;
        job.attempts = job.attempts.saturating_add(1);
        job.started_at = Some(now);
        job.progress = None;
        job.error = None;
        let snapshot = job.clone();

        self.running.insert(job_id, worker_id);
        self.emit_status(&snapshot, old_status, now);
        Some(snapshot)
    }

    fn record_progress(&mut self, job_id: JobId, stage: JobStage) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.status != JobStatus::Active {
            return;
        }
        job.progress = Some(stage.as_str().to_string());
        let snapshot = job.clone();
        self.emit_status(&snapshot, JobStatus::Active, Utc::now());
    }

    /// Apply the outcome of an attempt. Stale reports for jobs that are no
    /// longer active are ignored.
    fn finish_attempt(
        &mut self,
        myself: &ActorRef<QueueMessage>,
        job_id: JobId,
        outcome: Result<CacheRecord, JobError>,
    ) {
        self.running.remove(&job_id);
        let now = Utc::now();

        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.status != JobStatus::Active {
            return;
        }

        match outcome {
            Ok(record) => {
                job.status = JobStatus::Completed;
                job.progress = None;
                job.error = None;
                job.delivery_url = Some(record.delivery_url.clone());
                job.completed_at = Some(now);
                let job = job.clone();

                self.in_flight.remove(&job.key());
                self.emit_status(&job, JobStatus::Active, now);

                let duration_ms = job.elapsed_ms(now);
                tracing::info!(%job_id, key = %job.key(), duration_ms, "Cache job completed");
                self.emit(CacheEvent::JobCompleted {
                    job_id,
                    key: job.key(),
                    delivery_url: record.delivery_url,
                    public_id: record.public_id,
                    attempts: job.attempts,
                    duration_ms,
                    timestamp: now,
                });
            }
            Err(err) => {
                let message = err.to_string();
                let exhausted = job.attempts >= self.config.max_attempts;

                job.status = JobStatus::Failed;
                job.progress = None;
                job.error = Some(message.clone());
                if exhausted {
                    job.completed_at = Some(now);
                }
                let failed = job.clone();
                self.emit_status(&failed, JobStatus::Active, now);

                if exhausted {
                    self.in_flight.remove(&failed.key());
                    tracing::warn!(
                        %job_id,
                        key = %failed.key(),
                        attempts = failed.attempts,
                        "Cache job failed: {}",
                        message
                    );
                    self.emit(CacheEvent::JobFailed {
                        job_id,
                        key: failed.key(),
                        error: message,
                        attempts: failed.attempts,
                        timestamp: now,
                    });
                    return;
                }

                tracing::warn!(
                    %job_id,
                    attempt = failed.attempts,
                    max_attempts = self.config.max_attempts,
                    "Cache job attempt failed, will retry: {}",
                    message
                );
                self.requeue_after_failure(myself, failed, now);
            }
        }
    }

    fn requeue_after_failure(
        &mut self,
        myself: &ActorRef<QueueMessage>,
        failed: CacheJob,
        now: DateTime<Utc>,
    ) {
        let job_id = failed.id;
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        job.status = JobStatus::Queued;
        job.error = None;
        let queued = job.clone();
        self.emit_status(&queued, JobStatus::Failed, now);

        let delay = self.config.retry_delay(failed.attempts);
        if delay.is_zero() {
            self.pending.push_back(job_id);
            return;
        }

        let myself = myself.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = myself.send_message(QueueMessage::Requeue { job_id });
        });
    }

    fn requeue(&mut self, job_id: JobId) {
        let ready = self
            .jobs
            .get(&job_id)
            .is_some_and(|j| j.status == JobStatus::Queued);
        if ready && !self.pending.contains(&job_id) {
            self.pending.push_back(job_id);
        }
    }

    /// Evict terminal jobs past their retention, then the oldest beyond the cap.
    fn evict_terminal(&mut self, now: DateTime<Utc>) -> usize {
        let max_attempts = self.config.max_attempts;
        // Capped at ten years to stay inside chrono's range.
        let retention_secs = self.config.terminal_retention_secs.min(315_360_000) as i64;
        let retention = chrono::Duration::seconds(retention_secs);

        let mut terminal: Vec<(DateTime<Utc>, JobId)> = self
            .jobs
            .values()
            .filter(|j| j.is_terminal(max_attempts))
            .map(|j| (j.completed_at.unwrap_or(j.enqueued_at), j.id))
            .collect();
        terminal.sort();

        let expired = terminal
            .iter()
            .take_while(|(finished, _)| now - *finished > retention)
            .count();
        let over_cap = terminal
            .len()
            .saturating_sub(expired)
            .saturating_sub(self.config.max_terminal_jobs);
        let evict = expired + over_cap;

        for (_, job_id) in &terminal[..evict] {
            self.jobs.remove(job_id);
        }
        evict
    }
}

async fn spawn_worker(
    myself: &ActorRef<QueueMessage>,
    state: &mut QueueActorState,
) -> Result<(), ActorProcessingErr> {
    let args = WorkerArgs {
        queue: myself.clone(),
        pipeline: state.pipeline.clone(),
        job_timeout: state.config.job_timeout(),
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    let id = worker.get_id();
    state.workers.insert(id, worker);
    state.idle.push_back(id);
    Ok(())
}

/// Queue actor that owns every job.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            concurrency = args.config.concurrency,
            max_attempts = args.config.max_attempts,
            "Starting cache queue"
        );

        let mut state = QueueActorState::new(args);
        for _ in 0..state.config.concurrency.max(1) {
            spawn_worker(&myself, &mut state).await?;
        }

        // Start periodic housekeeping
        let interval = state.config.housekeeping_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if myself_clone.send_message(QueueMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for worker in state.workers.values() {
            worker.stop(None);
        }
        tracing::info!(
            abandoned = state.running.len() + state.pending.len(),
            "Cache queue stopped"
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { request, reply } => {
                let result = state.enqueue(request);
                let _ = reply.send(result);
                state.dispatch(&myself);
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.jobs.get(&job_id).cloned());
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }

            QueueMessage::JobProgress { job_id, stage } => {
                state.record_progress(job_id, stage);
            }

            QueueMessage::JobFinished {
                job_id,
                worker,
                outcome,
            } => {
                let holds_job = state.running.get(&job_id) == Some(&worker);
                if holds_job {
                    state.finish_attempt(&myself, job_id, outcome);
                }
                if state.workers.contains_key(&worker)
                    && !state.running.values().any(|w| *w == worker)
                    && !state.idle.contains(&worker)
                {
                    state.idle.push_back(worker);
                }
                state.dispatch(&myself);
            }

            QueueMessage::Requeue { job_id } => {
                state.requeue(job_id);
                state.dispatch(&myself);
            }

            QueueMessage::Drain { reply } => {
                if state.accepting {
                    tracing::info!("Cache queue draining, no longer accepting jobs");
                }
                state.accepting = false;
                let _ = reply.send(state.stats());
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down cache queue");
                myself.stop(None);
                return Ok(());
            }

            QueueMessage::Tick => {
                let evicted = state.evict_terminal(Utc::now());
                if evicted > 0 {
                    tracing::debug!(evicted, "Evicted finished jobs");
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (worker_id, reason) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => (
                cell.get_id(),
                reason.unwrap_or_else(|| "terminated".to_string()),
            ),
            SupervisionEvent::ActorFailed(cell, err) => (cell.get_id(), err.to_string()),
            _ => return Ok(()),
        };

        if state.workers.remove(&worker_id).is_none() {
            return Ok(());
        }
        state.idle.retain(|id| *id != worker_id);
        tracing::warn!(%worker_id, "Worker stopped: {}", reason);

        let lost = state
            .running
            .iter()
            .find(|(_, w)| **w == worker_id)
            .map(|(job_id, _)| *job_id);
        if let Some(job_id) = lost {
            state.finish_attempt(&myself, job_id, Err(JobError::WorkerLost(reason)));
        }

        spawn_worker(&myself, state).await?;
        state.dispatch(&myself);
        Ok(())
    }
}
