//! Worker actor for executing jobs.
//!
//! A worker is one concurrency slot. It runs one attempt at a time and always
//! reports back to the queue, whatever the outcome.

use std::sync::Arc;
use std::time::Duration;

use cache_core::JobId;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::{QueueMessage, WorkerMessage};
use crate::pipeline::CachePipeline;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Queue actor reference.
    pub queue: ActorRef<QueueMessage>,
    pub pipeline: Arc<CachePipeline>,
    pub job_timeout: Duration,
    /// Job being processed.
    pub current_job: Option<JobId>,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub queue: ActorRef<QueueMessage>,
    pub pipeline: Arc<CachePipeline>,
    pub job_timeout: Duration,
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker {}", myself.get_id());

        Ok(WorkerActorState {
            queue: args.queue,
            pipeline: args.pipeline,
            job_timeout: args.job_timeout,
            current_job: None,
        })
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(job_id) = state.current_job {
            tracing::warn!(%job_id, "Worker {} stopped mid-job", myself.get_id());
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::ProcessJob { job } => {
                let job_id = job.id;
                state.current_job = Some(job_id);

                let queue = state.queue.clone();
                let outcome = state
                    .pipeline
                    .run(&job, state.job_timeout, |stage| {
                        let _ = queue.send_message(QueueMessage::JobProgress { job_id, stage });
                    })
                    .await;

                if let Err(ref e) = outcome {
                    tracing::debug!(%job_id, key = %job.key(), "Attempt {} failed: {}", job.attempts, e);
                }

                state.current_job = None;
                state.queue.send_message(QueueMessage::JobFinished {
                    job_id,
                    worker: myself.get_id(),
                    outcome,
                })?;
            }
        }

        Ok(())
    }
}
