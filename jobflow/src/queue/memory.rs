//! In-memory at-least-once queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{Delivery, EnqueueOptions, Job, JobHandle, JobQueue, QueueEvent};
use crate::config::WorkerConfig;
use crate::errors::{JobError, JobResult};

const EVENT_CAPACITY: usize = 1024;

/// Settled jobs kept per queue for inspection.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

#[derive(Debug)]
struct Waiting {
    job: Job,
    attempts: u32,
    visible_at: DateTime<Utc>,
}

#[derive(Debug)]
struct InFlight {
    job: Job,
    attempt: u32,
    delivery_id: String,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct NamedQueue {
    waiting: VecDeque<Waiting>,
    in_flight: HashMap<String, InFlight>,
    completed: VecDeque<Job>,
    failed: VecDeque<(Job, JobError)>,
}

fn push_bounded<T>(history: &mut VecDeque<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    if history.len() == limit {
        history.pop_front();
    }
    history.push_back(item);
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, NamedQueue>,
    live_keys: HashMap<String, (String, String)>,
}

impl State {
    fn queue(&mut self, name: &str) -> &mut NamedQueue {
        self.queues.entry(name.to_string()).or_default()
    }

    fn release_key(&mut self, job: &Job) {
        if let Some(key) = &job.dedupe_key {
            self.live_keys.remove(key);
        }
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

/// Process-local queue with visibility timeouts and redelivery.
///
/// A dequeued job stays invisible until it is settled or its visibility
/// deadline passes; an expired delivery is redelivered with the next attempt
/// number, and settlements carrying a stale delivery ID are ignored.
///
/// Completed and failed jobs are kept only as inspection history, capped at
/// `history_limit` per queue with the oldest dropped first.
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    visibility_timeout: Duration,
    history_limit: usize,
    events: broadcast::Sender<QueueEvent>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl InMemoryQueue {
    /// Creates a queue with the given visibility timeout.
    #[must_use]
    pub fn new(visibility_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout,
            history_limit: DEFAULT_HISTORY_LIMIT,
            events,
        }
    }

    /// Creates a queue using the worker's visibility timeout.
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.visibility_timeout())
    }

    /// Sets how many settled jobs per queue are kept for inspection.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Returns the visibility timeout.
    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Returns the number of jobs waiting (visible or delayed).
    #[must_use]
    pub fn waiting_count(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.waiting.len())
    }

    /// Returns the number of unsettled deliveries.
    #[must_use]
    pub fn in_flight_count(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.in_flight.len())
    }

    /// Returns the most recent completed jobs in completion order.
    #[must_use]
    pub fn completed_jobs(&self, queue: &str) -> Vec<Job> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.completed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the most recent permanently failed jobs with their errors.
    #[must_use]
    pub fn failed_jobs(&self, queue: &str) -> Vec<(Job, JobError)> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.failed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if no queue has waiting or in-flight jobs.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.state
            .lock()
            .queues
            .values()
            .all(|q| q.waiting.is_empty() && q.in_flight.is_empty())
    }

    fn send(&self, event: QueueEvent) {
        self.events.send(event).ok();
    }

    fn reap_expired(queue_name: &str, queue: &mut NamedQueue, now: DateTime<Utc>) {
        let expired: Vec<String> = queue
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for job_id in expired {
            if let Some(flight) = queue.in_flight.remove(&job_id) {
                warn!(
                    queue = queue_name,
                    job_id = %job_id,
                    attempt = flight.attempt,
                    "Visibility timeout expired; redelivering"
                );
                queue.waiting.push_back(Waiting {
                    job: flight.job,
                    attempts: flight.attempt,
                    visible_at: now,
                });
            }
        }
    }

    fn take_in_flight(&self, delivery: &Delivery) -> Option<InFlight> {
        let mut state = self.state.lock();
        let queue = state.queue(&delivery.job.queue);
        let current = queue
            .in_flight
            .get(&delivery.job.id)
            .is_some_and(|flight| flight.delivery_id == delivery.delivery_id);
        if current {
            return queue.in_flight.remove(&delivery.job.id);
        }
        debug!(
            queue = %delivery.job.queue,
            job_id = %delivery.job.id,
            attempt = delivery.attempt,
            "Ignoring settlement of stale delivery"
        );
        None
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> JobResult<JobHandle> {
        let mut state = self.state.lock();

        if let Some(key) = &options.dedupe_key {
            if let Some((existing_queue, existing_id)) = state.live_keys.get(key) {
                debug!(queue, job = name, existing_id = %existing_id, "Duplicate enqueue ignored");
                return Ok(JobHandle {
                    id: existing_id.clone(),
                    queue: existing_queue.clone(),
                    deduplicated: true,
                });
            }
        }

        let mut job = Job::new(queue, name, payload);
        job.dedupe_key = options.dedupe_key;
        if let Some(key) = &job.dedupe_key {
            state.live_keys.insert(key.clone(), (queue.to_string(), job.id.clone()));
        }

        let handle = JobHandle {
            id: job.id.clone(),
            queue: queue.to_string(),
            deduplicated: false,
        };
        let visible_at = options.delay.map_or_else(Utc::now, after);
        debug!(queue, job = name, job_id = %job.id, "Job enqueued");
        state.queue(queue).waiting.push_back(Waiting {
            job,
            attempts: 0,
            visible_at,
        });
        Ok(handle)
    }

    async fn dequeue(&self, queue_name: &str) -> JobResult<Option<Delivery>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let queue = state.queue(queue_name);
        Self::reap_expired(queue_name, queue, now);

        let Some(position) = queue.waiting.iter().position(|w| w.visible_at <= now) else {
            return Ok(None);
        };
        let Some(waiting) = queue.waiting.remove(position) else {
            return Ok(None);
        };

        let delivery = Delivery {
            job: waiting.job,
            attempt: waiting.attempts + 1,
            delivery_id: uuid::Uuid::new_v4().to_string(),
            deadline: after(self.visibility_timeout),
        };
        queue.in_flight.insert(
            delivery.job.id.clone(),
            InFlight {
                job: delivery.job.clone(),
                attempt: delivery.attempt,
                delivery_id: delivery.delivery_id.clone(),
                deadline: delivery.deadline,
            },
        );
        Ok(Some(delivery))
    }

    async fn complete(&self, delivery: &Delivery) -> JobResult<()> {
        let Some(flight) = self.take_in_flight(delivery) else {
            return Ok(());
        };
        {
            let mut state = self.state.lock();
            state.release_key(&flight.job);
            let limit = self.history_limit;
            push_bounded(&mut state.queue(&flight.job.queue).completed, flight.job, limit);
        }
        self.send(QueueEvent::Completed {
            job_id: delivery.job.id.clone(),
            queue: delivery.job.queue.clone(),
        });
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, error: &JobError, delay: Duration) -> JobResult<()> {
        let Some(flight) = self.take_in_flight(delivery) else {
            return Ok(());
        };
        debug!(
            queue = %delivery.job.queue,
            job_id = %delivery.job.id,
            attempt = flight.attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Redelivery scheduled"
        );
        self.state.lock().queue(&flight.job.queue).waiting.push_back(Waiting {
            attempts: flight.attempt,
            visible_at: after(delay),
            job: flight.job,
        });
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, error: &JobError) -> JobResult<()> {
        let Some(flight) = self.take_in_flight(delivery) else {
            return Ok(());
        };
        {
            let mut state = self.state.lock();
            state.release_key(&flight.job);
            let limit = self.history_limit;
            let queue = flight.job.queue.clone();
            push_bounded(&mut state.queue(&queue).failed, (flight.job, error.clone()), limit);
        }
        self.send(QueueEvent::Failed {
            job_id: delivery.job.id.clone(),
            queue: delivery.job.queue.clone(),
            error: error.message.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit_error(&self, message: String) {
        self.send(QueueEvent::Error { message });
    }
}
