//! In-memory retry queue.
//!
//! A task moves pending → in-flight → (scheduled → pending)* → done. Ready
//! tasks drain FIFO. A failed task is scheduled on a tokio timer and
//! re-enters the ready list when the timer fires, at which point its id is
//! broadcast to ready subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use tagrelay_core::types::Event;

use crate::retry::RetryPolicy;

/// One event bound for one destination.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub id: String,
    pub destination: String,
    pub event: Event,
    /// Retries performed so far.
    pub attempt: u32,
}

impl DeliveryTask {
    pub fn new(event: Event, destination: impl Into<String>) -> Self {
        let destination = destination.into();
        Self {
            id: format!("{}/{}", event.id, destination),
            destination,
            event,
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub scheduled: usize,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<DeliveryTask>,
    // Counted so a redelivered event id does not clear a live task's mark.
    in_flight: HashMap<String, usize>,
    scheduled: usize,
}

impl QueueState {
    fn mark_in_flight(&mut self, id: &str) {
        *self.in_flight.entry(id.to_string()).or_default() += 1;
    }

    fn clear_in_flight(&mut self, id: &str) {
        if let Some(count) = self.in_flight.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(id);
            }
        }
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.values().sum()
    }
}

struct Shared {
    policy: RetryPolicy,
    state: Mutex<QueueState>,
    ready_tx: broadcast::Sender<String>,
}

/// Cloneable handle to a shared retry queue.
#[derive(Clone)]
pub struct RetryQueue {
    shared: Arc<Shared>,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_capacity(policy, 1024)
    }

    pub fn with_capacity(policy: RetryPolicy, ready_channel_capacity: usize) -> Self {
        let (ready_tx, _) = broadcast::channel(ready_channel_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                policy,
                state: Mutex::new(QueueState::default()),
                ready_tx,
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    /// Append a batch of tasks as one unit, each starting at attempt 0.
    pub fn push(&self, tasks: Vec<DeliveryTask>) {
        let mut state = self.shared.state.lock();
        state.ready.extend(tasks.into_iter().map(|mut t| {
            t.attempt = 0;
            t
        }));
    }

    /// Take the oldest ready task and mark it in flight.
    pub fn pop(&self) -> Option<DeliveryTask> {
        let mut state = self.shared.state.lock();
        let task = state.ready.pop_front()?;
        state.mark_in_flight(&task.id);
        Some(task)
    }

    /// Schedule `task` for another attempt. Returns `false`, dropping the
    /// task, once it has used up `max_attempts` retries.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push_with_backoff(&self, mut task: DeliveryTask) -> bool {
        task.attempt += 1;

        {
            let mut state = self.shared.state.lock();
            state.clear_in_flight(&task.id);
            if task.attempt > self.shared.policy.max_attempts {
                return false;
            }
            state.scheduled += 1;
        }

        let delay = self.shared.policy.backoff_for_attempt(task.attempt);
        debug!(
            task_id = %task.id,
            attempt = task.attempt,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let id = task.id.clone();
            {
                let mut state = shared.state.lock();
                state.scheduled -= 1;
                state.ready.push_back(task);
            }
            // No subscribers is fine; the periodic flush picks the task up.
            let _ = shared.ready_tx.send(id);
        });
        true
    }

    /// Clear the in-flight mark of a task that reached a terminal outcome.
    pub fn complete(&self, task_id: &str) {
        self.shared.state.lock().clear_in_flight(task_id);
    }

    pub fn subscribe_ready(&self) -> broadcast::Receiver<String> {
        self.shared.ready_tx.subscribe()
    }

    /// No pending, in-flight or scheduled tasks.
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.lock();
        state.ready.is_empty() && state.in_flight.is_empty() && state.scheduled == 0
    }

    pub fn has_ready(&self) -> bool {
        !self.shared.state.lock().ready.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            pending: state.ready.len(),
            in_flight: state.in_flight_count(),
            scheduled: state.scheduled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            backoff_multiplier: 1.0,
            max_backoff_ms: 5,
        }
    }

    fn task(event_id: &str, destination: &str) -> DeliveryTask {
        DeliveryTask::new(Event::track(event_id, "purchase"), destination)
    }

    #[test]
    fn test_task_id_format() {
        assert_eq!(task("e1", "pixel").id, "e1/pixel");
    }

    #[test]
    fn test_push_pop_fifo_and_reset_attempts() {
        let queue = RetryQueue::new(policy(2));
        let mut stale = task("e1", "a");
        stale.attempt = 7;
        queue.push(vec![stale, task("e1", "b")]);
        queue.push(vec![task("e2", "a")]);

        let first = queue.pop().unwrap();
        assert_eq!(first.id, "e1/a");
        assert_eq!(first.attempt, 0);
        assert_eq!(queue.pop().unwrap().id, "e1/b");
        assert_eq!(queue.pop().unwrap().id, "e2/a");
        assert!(queue.pop().is_none());

        assert_eq!(
            queue.stats(),
            QueueStats {
                pending: 0,
                in_flight: 3,
                scheduled: 0
            }
        );
        queue.complete("e1/a");
        queue.complete("e1/b");
        queue.complete("e2/a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_backoff_bound() {
        let max_attempts = 3;
        let queue = RetryQueue::new(policy(max_attempts));
        let mut ready = queue.subscribe_ready();
        queue.push(vec![task("e1", "flaky")]);

        let mut accepted = Vec::new();
        for _ in 0..=max_attempts {
            let current = match queue.pop() {
                Some(t) => t,
                None => {
                    let id = tokio::time::timeout(Duration::from_secs(1), ready.recv())
                        .await
                        .unwrap()
                        .unwrap();
                    assert_eq!(id, "e1/flaky");
                    queue.pop().unwrap()
                }
            };
            accepted.push(queue.push_with_backoff(current));
        }

        assert_eq!(accepted, vec![true, true, true, false]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_task_counts_as_not_empty() {
        let queue = RetryQueue::new(RetryPolicy {
            max_attempts: 1,
            initial_backoff_ms: 20,
            backoff_multiplier: 1.0,
            max_backoff_ms: 20,
        });
        let mut ready = queue.subscribe_ready();
        queue.push(vec![task("e1", "a")]);
        let t = queue.pop().unwrap();
        assert!(queue.push_with_backoff(t));

        assert!(!queue.is_empty());
        assert!(!queue.has_ready());
        assert_eq!(queue.stats().scheduled, 1);

        ready.recv().await.unwrap();
        assert!(queue.has_ready());
        assert_eq!(queue.pop().unwrap().attempt, 1);
    }
}
