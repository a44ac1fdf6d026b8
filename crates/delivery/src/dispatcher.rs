//! Fan-out of events to every registered destination with per-task retry.
//!
//! `deliver` splits an event into one task per destination name and queues
//! them as a batch. A background listener drains the queue whenever a retry
//! becomes ready and on a fixed interval, so tasks queued while the probe
//! reports offline go out once connectivity returns. Each task runs in its
//! own tokio task; a slow or failing destination never holds up another.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use tagrelay_core::config::DeliveryConfig;
use tagrelay_core::event_bus::{DeliveryNotice, DeliverySink, NoOpSink};
use tagrelay_core::types::{Event, EventType};

use crate::destination::{AlwaysOnline, DeliveryProbe, Destination, DestinationRegistry};
use crate::error::DeliveryError;
use crate::queue::{DeliveryTask, QueueStats, RetryQueue};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Delivered,
    Failed { reason: String, attempts: u32 },
}

/// Terminal outcome of one delivery task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub destination: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl TaskOutcome {
    pub fn is_delivered(&self) -> bool {
        self.status == OutcomeStatus::Delivered
    }
}

struct PendingOutcome {
    task_id: String,
    destination: String,
    rx: oneshot::Receiver<TaskOutcome>,
}

/// Returned by [`DeliveryDispatcher::deliver`]; resolves each task's terminal
/// outcome. Dropping it does not affect delivery.
pub struct DeliveryHandle {
    event_id: String,
    pending: Vec<PendingOutcome>,
}

impl DeliveryHandle {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.pending.iter().map(|p| p.task_id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every task of the event, in destination registration order.
    pub async fn outcomes(self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        for pending in self.pending {
            let outcome = match pending.rx.await {
                Ok(outcome) => outcome,
                Err(_) => TaskOutcome {
                    status: OutcomeStatus::Failed {
                        reason: DeliveryError::Shutdown(pending.task_id.clone()).to_string(),
                        attempts: 0,
                    },
                    task_id: pending.task_id,
                    destination: pending.destination,
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

pub struct DispatcherBuilder {
    registry: DestinationRegistry,
    config: DeliveryConfig,
    queue: Option<RetryQueue>,
    probe: Arc<dyn DeliveryProbe>,
    sink: Arc<dyn DeliverySink>,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DeliveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing queue instead of one built from the config.
    pub fn queue(mut self, queue: RetryQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn DeliveryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build the dispatcher and spawn its background listener. Must be called
    /// from within a tokio runtime.
    pub fn build(self) -> DeliveryDispatcher {
        let queue = self.queue.unwrap_or_else(|| {
            RetryQueue::with_capacity(
                RetryPolicy::from(&self.config),
                self.config.ready_channel_capacity,
            )
        });
        let ready = queue.subscribe_ready();
        let inner = Arc::new(Inner {
            registry: self.registry,
            queue,
            probe: self.probe,
            sink: self.sink,
            listeners: DashMap::new(),
            drain: tokio::sync::Mutex::new(()),
            idle: Notify::new(),
            listener: parking_lot::Mutex::new(None),
        });

        let interval = Duration::from_millis(self.config.flush_interval_ms.max(1));
        let handle = spawn_listener(Arc::downgrade(&inner), ready, interval);
        *inner.listener.lock() = Some(handle);

        DeliveryDispatcher { inner }
    }
}

struct Inner {
    registry: DestinationRegistry,
    queue: RetryQueue,
    probe: Arc<dyn DeliveryProbe>,
    sink: Arc<dyn DeliverySink>,
    listeners: DashMap<String, VecDeque<oneshot::Sender<TaskOutcome>>>,
    drain: tokio::sync::Mutex<()>,
    idle: Notify,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct DeliveryDispatcher {
    inner: Arc<Inner>,
}

impl DeliveryDispatcher {
    pub fn builder(registry: DestinationRegistry) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            config: DeliveryConfig::default(),
            queue: None,
            probe: Arc::new(AlwaysOnline),
            sink: Arc::new(NoOpSink),
        }
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.inner.registry
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.inner.queue
    }

    /// Queue one task per destination name and start draining. Never
    /// blocks and never fails; outcomes arrive through the handle and the
    /// sink.
    pub fn deliver(&self, event: Event) -> DeliveryHandle {
        let names = self.inner.registry.names();
        let mut tasks = Vec::with_capacity(names.len());
        let mut pending = Vec::with_capacity(names.len());

        for name in names {
            let task = DeliveryTask::new(event.clone(), name);
            let (tx, rx) = oneshot::channel();
            self.inner
                .listeners
                .entry(task.id.clone())
                .or_default()
                .push_back(tx);
            pending.push(PendingOutcome {
                task_id: task.id.clone(),
                destination: task.destination.clone(),
                rx,
            });
            tasks.push(task);
        }

        if tasks.is_empty() {
            debug!(event_id = %event.id, "no destinations registered, event dropped");
        } else {
            metrics::counter!("delivery.enqueued").increment(tasks.len() as u64);
            debug!(event_id = %event.id, tasks = tasks.len(), "event queued");
            self.inner.queue.push(tasks);

            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.flush().await });
        }

        DeliveryHandle {
            event_id: event.id,
            pending,
        }
    }

    /// Drain ready tasks. Concurrent callers serialize on the drain guard;
    /// the guard is released before any hook runs.
    pub async fn flush(&self) {
        loop {
            let task = {
                let _guard = self.inner.drain.lock().await;
                if !self.inner.queue.has_ready() {
                    break;
                }
                if !self.inner.probe.can_deliver() {
                    metrics::counter!("delivery.offline_skips").increment(1);
                    debug!("delivery channel offline, flush skipped");
                    break;
                }
                match self.inner.queue.pop() {
                    Some(task) => task,
                    None => break,
                }
            };

            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_task(task).await });
        }
        self.inner.notify_if_idle();
    }

    /// Resolves once nothing is pending, in flight or scheduled. Does not
    /// resolve while tasks sit queued behind an offline probe.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.queue.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn pending_tasks(&self) -> QueueStats {
        self.inner.queue.stats()
    }
}

impl Inner {
    async fn run_task(&self, task: DeliveryTask) {
        tokio::task::yield_now().await;

        let hooks = self.registry.matching(&task.destination);
        if hooks.is_empty() {
            self.finish_without_destination(task);
            self.notify_if_idle();
            return;
        }

        debug!(
            task_id = %task.id,
            destination = %task.destination,
            attempt = task.attempt,
            hooks = hooks.len(),
            "invoking destination hooks"
        );
        let results = join_all(
            hooks
                .iter()
                .map(|d| invoke_guarded(d.as_ref(), task.event.clone())),
        )
        .await;

        match results.into_iter().find_map(Result::err) {
            None => self.finish_delivered(task),
            Some(err) => {
                let reason = DeliveryError::Rejected {
                    task_id: task.id.clone(),
                    destination: task.destination.clone(),
                    reason: format!("{:#}", err),
                }
                .to_string();
                self.retry_or_fail(task, reason);
            }
        }
        self.notify_if_idle();
    }

    fn finish_delivered(&self, task: DeliveryTask) {
        self.queue.complete(&task.id);
        metrics::counter!("delivery.succeeded").increment(1);
        debug!(task_id = %task.id, destination = %task.destination, "task delivered");

        self.sink.emit(DeliveryNotice::Delivered {
            task_id: task.id.clone(),
        });
        self.resolve(TaskOutcome {
            task_id: task.id,
            destination: task.destination,
            status: OutcomeStatus::Delivered,
        });
    }

    fn finish_without_destination(&self, task: DeliveryTask) {
        self.queue.complete(&task.id);
        metrics::counter!("delivery.no_destination").increment(1);

        let message = DeliveryError::NoDestination {
            task_id: task.id.clone(),
            destination: task.destination.clone(),
        }
        .to_string();
        warn!(task_id = %task.id, destination = %task.destination, "{}", message);

        self.sink.emit(DeliveryNotice::NoDestination {
            task_id: task.id.clone(),
            message,
        });
        self.resolve(TaskOutcome {
            task_id: task.id,
            destination: task.destination,
            status: OutcomeStatus::Delivered,
        });
    }

    fn retry_or_fail(&self, task: DeliveryTask, reason: String) {
        let task_id = task.id.clone();
        let destination = task.destination.clone();
        let attempts = task.attempt + 1;

        if self.queue.push_with_backoff(task) {
            metrics::counter!("delivery.retried").increment(1);
            warn!(
                task_id = %task_id,
                destination = %destination,
                attempt = attempts,
                reason = %reason,
                "delivery failed, retry scheduled"
            );
            return;
        }

        metrics::counter!("delivery.failed").increment(1);
        error!(
            task_id = %task_id,
            destination = %destination,
            reason = %reason,
            "{}",
            DeliveryError::AttemptsExhausted {
                task_id: task_id.clone(),
                attempts,
            }
        );

        self.sink.emit(DeliveryNotice::Failed {
            task_id: task_id.clone(),
            reason: reason.clone(),
            attempts,
        });
        self.resolve(TaskOutcome {
            task_id,
            destination,
            status: OutcomeStatus::Failed { reason, attempts },
        });
    }

    /// Fire the oldest one-time listener registered for the task id.
    fn resolve(&self, outcome: TaskOutcome) {
        let sender = match self.listeners.get_mut(&outcome.task_id) {
            Some(mut senders) => senders.pop_front(),
            None => None,
        };
        self.listeners
            .remove_if(&outcome.task_id, |_, senders| senders.is_empty());

        if let Some(tx) = sender {
            // The handle may have been dropped.
            let _ = tx.send(outcome);
        }
    }

    fn notify_if_idle(&self) {
        if self.queue.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// A panicking hook counts as a rejection so the task still reaches a
/// terminal outcome.
async fn invoke_guarded(destination: &dyn Destination, event: Event) -> anyhow::Result<()> {
    match AssertUnwindSafe(invoke(destination, event)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "destination hook panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

async fn invoke(destination: &dyn Destination, event: Event) -> anyhow::Result<()> {
    match event.event_type {
        EventType::Identify => destination.identify(event).await,
        EventType::Track => destination.track(event).await,
        EventType::Page => destination.page(event).await,
        EventType::Group => destination.group(event).await,
    }
}

fn spawn_listener(
    inner: Weak<Inner>,
    mut ready: broadcast::Receiver<String>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = ready.recv() => match received {
                    Ok(task_id) => debug!(task_id = %task_id, "retry ready"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ready notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick.tick() => {}
            }

            let Some(inner) = inner.upgrade() else {
                break;
            };
            DeliveryDispatcher { inner }.flush().await;
        }
    })
}
