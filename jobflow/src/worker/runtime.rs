//! Worker runtime: per-delivery state machine and consume loops.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{JobFamily, ShutdownSignal};
use crate::actions::{Action, ActionRegistry};
use crate::broadcast::{broadcast_best_effort, StatusBroadcaster, StatusEvent};
use crate::config::WorkerConfig;
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{log_error, validate_job_data, JobError, JobResult, JobflowError};
use crate::health::{ensure_healthy, HealthCheck};
use crate::observability::ActionTimer;
use crate::pipeline::{Pipeline, PipelineExecutor};
use crate::queue::{Delivery, JobQueue};
use crate::retry::{RetryDecision, RetryPolicy};

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Every action succeeded.
    Completed,
    /// Validation or configuration failure; never retried.
    Rejected(JobError),
    /// Retryable failure; the transport should redeliver after `delay`.
    RetryScheduled {
        /// The classified failure.
        error: JobError,
        /// Redelivery delay hint.
        delay: Duration,
    },
    /// Retryable failure with attempts exhausted.
    FailedPermanently(JobError),
}

impl DeliveryOutcome {
    /// Returns true if the job will not be delivered again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RetryScheduled { .. })
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&JobError> {
        match self {
            Self::Completed => None,
            Self::Rejected(e) | Self::FailedPermanently(e) => Some(e),
            Self::RetryScheduled { error, .. } => Some(error),
        }
    }
}

/// Consumes jobs and runs their pipelines.
///
/// `D` is the read-only dependency bundle handed to every action. It is
/// shared by all concurrent slots and never mutated by the runtime.
pub struct WorkerRuntime<D: Send + Sync + 'static> {
    config: WorkerConfig,
    policy: RetryPolicy,
    deps: Arc<D>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    registry: ActionRegistry<D>,
    families: RwLock<HashMap<String, JobFamily<D>>>,
    health_checks: Vec<Arc<dyn HealthCheck>>,
}

impl<D: Send + Sync + 'static> WorkerRuntime<D> {
    /// Creates a runtime.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        config: WorkerConfig,
        deps: Arc<D>,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Result<Self, JobflowError> {
        config.validate()?;
        Ok(Self {
            policy: config.retry_policy(),
            config,
            deps,
            broadcaster,
            registry: ActionRegistry::new(),
            families: RwLock::new(HashMap::new()),
            health_checks: Vec::new(),
        })
    }

    /// Adds a dependency pre-check run before every pipeline.
    #[must_use]
    pub fn with_health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_checks.push(check);
        self
    }

    /// Overrides the retry policy derived from the configuration.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Registers an action factory.
    pub fn register_action<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Action<D>> + Send + Sync + 'static,
    {
        self.registry.register(name, factory);
    }

    /// Registers a job family, keyed by job name.
    pub fn register_family(&self, family: JobFamily<D>) {
        info!(job = %family.name(), queue = %family.queue(), "Registered job family");
        self.families.write().insert(family.name().to_string(), family);
    }

    /// Returns the action registry.
    #[must_use]
    pub fn registry(&self) -> &ActionRegistry<D> {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns the dependency bundle.
    #[must_use]
    pub fn deps(&self) -> &Arc<D> {
        &self.deps
    }

    /// Returns the distinct queues of all registered families, sorted.
    #[must_use]
    pub fn queues(&self) -> Vec<String> {
        self.families
            .read()
            .values()
            .map(|f| f.queue().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Builds the pipeline for a job name and payload.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::UnknownJobFamily`] or the builder's error.
    pub fn build_pipeline(&self, job_name: &str, payload: &JobState) -> Result<Pipeline<D>, JobflowError> {
        let family = self.family(job_name)?;
        family.build(payload, &self.registry)
    }

    fn family(&self, job_name: &str) -> Result<JobFamily<D>, JobflowError> {
        self.families
            .read()
            .get(job_name)
            .cloned()
            .ok_or_else(|| JobflowError::unknown_job_family(job_name))
    }

    /// Runs one delivery through the state machine.
    ///
    /// Never settles the delivery; see [`settle`](Self::settle).
    pub async fn process(&self, delivery: &Delivery) -> DeliveryOutcome {
        let job = &delivery.job;
        let ctx = ActionContext::new(
            &job.id,
            &job.queue,
            &job.name,
            delivery.attempt,
            &self.config.worker_name,
        );

        let family = match self.family(&job.name) {
            Ok(family) => family,
            Err(e) => {
                let err = JobError::from(e).with_action_context(&ctx);
                log_error(&err);
                return DeliveryOutcome::Rejected(err);
            }
        };

        let ctx = match family
            .parent_key()
            .and_then(|key| job.payload.get(key))
            .and_then(serde_json::Value::as_str)
        {
            Some(parent_id) => ctx.with_parent_id(parent_id),
            None => ctx,
        };

        info!(
            job_id = %ctx.job_id,
            queue = %ctx.queue_name,
            job = %ctx.operation,
            attempt = ctx.attempt,
            parent_id = ?ctx.parent_id,
            "Job received"
        );
        let timer = ActionTimer::start(&job.name);

        match self.execute(&family, &ctx, &job.payload).await {
            Ok(_) => {
                info!(
                    job_id = %ctx.job_id,
                    queue = %ctx.queue_name,
                    duration_ms = timer.finish(),
                    "Job completed"
                );
                DeliveryOutcome::Completed
            }
            Err(err) => self.resolve_failure(&family, &ctx, &job.payload, err).await,
        }
    }

    async fn execute(
        &self,
        family: &JobFamily<D>,
        ctx: &ActionContext,
        payload: &serde_json::Value,
    ) -> JobResult<JobState> {
        ensure_healthy(&self.health_checks)
            .await
            .map_err(|e| e.with_action_context(ctx))?;

        if let Some(err) = validate_job_data(payload, &family.required_fields()) {
            let err = err.with_action_context(ctx);
            log_error(&err);
            return Err(err);
        }

        let state = JobState::from_value(payload.clone()).map_err(|e| e.with_action_context(ctx))?;
        let pipeline = family
            .build(&state, &self.registry)
            .map_err(|e| JobError::from(e).with_action_context(ctx))?;
        debug!(
            job_id = %ctx.job_id,
            actions = ?pipeline.action_names(),
            "Pipeline built"
        );

        PipelineExecutor::new(self.deps.as_ref(), ctx, self.broadcaster.as_ref())
            .run(&pipeline, state)
            .await
    }

    async fn resolve_failure(
        &self,
        family: &JobFamily<D>,
        ctx: &ActionContext,
        payload: &serde_json::Value,
        err: JobError,
    ) -> DeliveryOutcome {
        let outcome = match self.policy.decide(&err, ctx.attempt) {
            RetryDecision::Retry(delay) => {
                warn!(
                    job_id = %ctx.job_id,
                    queue = %ctx.queue_name,
                    attempt = ctx.attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Job failed; scheduling redelivery: {}", err.message
                );
                return DeliveryOutcome::RetryScheduled { error: err, delay };
            }
            RetryDecision::NotRetryable => {
                warn!(
                    job_id = %ctx.job_id,
                    queue = %ctx.queue_name,
                    kind = %err.kind,
                    "Job rejected: {}", err.message
                );
                DeliveryOutcome::Rejected(err)
            }
            RetryDecision::GiveUp => {
                error!(
                    job_id = %ctx.job_id,
                    queue = %ctx.queue_name,
                    kind = %err.kind,
                    "Job {} failed permanently after {} attempts: {}",
                    ctx.job_id, ctx.attempt, err.message
                );
                DeliveryOutcome::FailedPermanently(err)
            }
        };

        let Some(err) = outcome.error() else {
            return outcome;
        };
        broadcast_best_effort(
            self.broadcaster.as_ref(),
            StatusEvent::failed(ctx.correlation_id(), &ctx.operation, err.message.clone())
                .with_entity_id(&ctx.job_id),
        )
        .await;

        if let Some(hook) = family.terminal_hook() {
            if let Err(hook_err) = hook
                .on_terminal_failure(payload, self.deps.as_ref(), ctx, err)
                .await
            {
                let hook_err = crate::errors::classify_error(hook_err).with_action_context(ctx);
                log_error(&hook_err);
                if self.policy.should_retry_hook(&hook_err, ctx.attempt) {
                    warn!(
                        job_id = %ctx.job_id,
                        attempt = ctx.attempt,
                        "Terminal failure hook failed; redelivering so it can run again"
                    );
                    return DeliveryOutcome::RetryScheduled {
                        delay: self.policy.calculate_backoff(ctx.attempt),
                        error: hook_err,
                    };
                }
                if hook_err.is_retryable() {
                    error!(
                        job_id = %ctx.job_id,
                        queue = %ctx.queue_name,
                        parent_id = ?ctx.parent_id,
                        attempt = ctx.attempt,
                        "Terminal failure hook gave up after {} attempts; parent may be stranded",
                        ctx.attempt
                    );
                }
            }
        }
        outcome
    }

    /// Reports a delivery outcome to the transport.
    ///
    /// Transport failures are logged and surfaced as queue error events;
    /// they never count against the job's attempts.
    pub async fn settle(&self, queue: &dyn JobQueue, delivery: &Delivery, outcome: &DeliveryOutcome) {
        let result = match outcome {
            DeliveryOutcome::Completed => queue.complete(delivery).await,
            DeliveryOutcome::RetryScheduled { error, delay } => queue.retry(delivery, error, *delay).await,
            DeliveryOutcome::Rejected(error) | DeliveryOutcome::FailedPermanently(error) => {
                queue.fail(delivery, error).await
            }
        };
        if let Err(e) = result {
            error!(
                job_id = %delivery.job.id,
                queue = %delivery.job.queue,
                error = %e,
                "Failed to settle delivery"
            );
            queue.emit_error(format!("Failed to settle job {}: {}", delivery.job.id, e.message));
        }
    }

    /// Processes and settles a delivery.
    pub async fn handle(&self, queue: &dyn JobQueue, delivery: Delivery) -> DeliveryOutcome {
        let outcome = self.process(&delivery).await;
        self.settle(queue, &delivery, &outcome).await;
        outcome
    }

    /// Dequeues and handles at most one job from a queue.
    ///
    /// # Errors
    ///
    /// Returns the transport's dequeue error.
    pub async fn poll_once(&self, queue: &dyn JobQueue, queue_name: &str) -> JobResult<Option<DeliveryOutcome>> {
        match queue.dequeue(queue_name).await? {
            Some(delivery) => Ok(Some(self.handle(queue, delivery).await)),
            None => Ok(None),
        }
    }

    /// Consumes every registered queue until `shutdown` fires.
    ///
    /// Each queue gets its own loop with at most `concurrency` jobs in
    /// flight. After shutdown no new jobs are pulled and in-flight jobs are
    /// awaited.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::InvalidConfig`] if no family is registered.
    pub async fn run(self: Arc<Self>, queue: Arc<dyn JobQueue>, shutdown: ShutdownSignal) -> Result<(), JobflowError> {
        let queues = self.queues();
        if queues.is_empty() {
            return Err(JobflowError::InvalidConfig("no job families registered".to_string()));
        }
        info!(
            worker = %self.config.worker_name,
            queues = ?queues,
            concurrency = self.config.concurrency,
            "Worker started"
        );

        let mut loops = JoinSet::new();
        for queue_name in queues {
            loops.spawn(Arc::clone(&self).consume(Arc::clone(&queue), queue_name, shutdown.clone()));
        }
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Consume loop panicked");
            }
        }

        info!(worker = %self.config.worker_name, reason = ?shutdown.reason(), "Worker stopped");
        Ok(())
    }

    async fn consume(self: Arc<Self>, queue: Arc<dyn JobQueue>, queue_name: String, shutdown: ShutdownSignal) {
        let concurrency = self.config.concurrency;
        let slots = Arc::new(Semaphore::new(concurrency));

        loop {
            let permit = tokio::select! {
                () = shutdown.wait() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match queue.dequeue(&queue_name).await {
                Ok(Some(delivery)) => {
                    let runtime = Arc::clone(&self);
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move {
                        runtime.handle(queue.as_ref(), delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        () = shutdown.wait() => break,
                        () = tokio::time::sleep(self.config.poll_interval()) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(queue = %queue_name, error = %e, "Dequeue failed");
                    queue.emit_error(format!("Dequeue from {queue_name} failed: {}", e.message));
                    tokio::select! {
                        () = shutdown.wait() => break,
                        () = tokio::time::sleep(self.config.poll_interval()) => {}
                    }
                }
            }
        }

        debug!(
            queue = %queue_name,
            in_flight = concurrency - slots.available_permits(),
            "Draining in-flight jobs"
        );
        // Every slot is free again once all spawned jobs have finished.
        let all = u32::try_from(concurrency).unwrap_or(u32::MAX);
        if slots.acquire_many(all).await.is_err() {
            warn!(queue = %queue_name, "Slot semaphore closed while draining");
        }
    }
}

impl<D: Send + Sync + 'static> std::fmt::Debug for WorkerRuntime<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("worker", &self.config.worker_name)
            .field("actions", &self.registry.names())
            .field("queues", &self.queues())
            .finish_non_exhaustive()
    }
}
