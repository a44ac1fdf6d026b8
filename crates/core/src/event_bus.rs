//! Delivery notification bus: trait for surfacing delivery outcomes to
//! observability collaborators.
//!
//! The dispatcher accepts an `Arc<dyn DeliverySink>` and emits one notice per
//! terminal outcome, plus a diagnostic when a ready task no longer has a
//! matching destination.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Notification emitted by the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryNotice {
    Delivered {
        task_id: String,
    },
    Failed {
        task_id: String,
        reason: String,
        attempts: u32,
    },
    NoDestination {
        task_id: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Delivered,
    Failed,
    NoDestination,
}

impl DeliveryNotice {
    pub fn task_id(&self) -> &str {
        match self {
            DeliveryNotice::Delivered { task_id }
            | DeliveryNotice::Failed { task_id, .. }
            | DeliveryNotice::NoDestination { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> NoticeKind {
        match self {
            DeliveryNotice::Delivered { .. } => NoticeKind::Delivered,
            DeliveryNotice::Failed { .. } => NoticeKind::Failed,
            DeliveryNotice::NoDestination { .. } => NoticeKind::NoDestination,
        }
    }
}

/// Trait for receiving delivery notices. Implementations forward them to
/// logs, crash reporters or test captures.
pub trait DeliverySink: Send + Sync {
    fn emit(&self, notice: DeliveryNotice);
}

/// No-op sink for callers that don't observe delivery.
pub struct NoOpSink;

impl DeliverySink for NoOpSink {
    fn emit(&self, _notice: DeliveryNotice) {}
}

/// Sink that writes every notice to the tracing pipeline.
pub struct LogSink;

impl DeliverySink for LogSink {
    fn emit(&self, notice: DeliveryNotice) {
        match notice {
            DeliveryNotice::Delivered { task_id } => {
                info!(task_id = %task_id, "delivery completed");
            }
            DeliveryNotice::Failed {
                task_id,
                reason,
                attempts,
            } => {
                error!(task_id = %task_id, attempts, reason = %reason, "delivery failed");
            }
            DeliveryNotice::NoDestination { task_id, message } => {
                warn!(task_id = %task_id, message = %message, "delivery dropped");
            }
        }
    }
}

/// In-memory sink that captures notices for testing.
#[derive(Default)]
pub struct CaptureSink {
    notices: Mutex<Vec<DeliveryNotice>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn notices(&self) -> Vec<DeliveryNotice> {
        self.notices.lock().expect("notice sink mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.notices.lock().expect("notice sink mutex poisoned").len()
    }

    pub fn count_kind(&self, kind: NoticeKind) -> usize {
        self.notices
            .lock()
            .expect("notice sink mutex poisoned")
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.notices.lock().expect("notice sink mutex poisoned").clear();
    }
}

impl DeliverySink for CaptureSink {
    fn emit(&self, notice: DeliveryNotice) {
        self.notices
            .lock()
            .expect("notice sink mutex poisoned")
            .push(notice);
    }
}

/// Convenience: create a no-op sink.
pub fn noop_sink() -> Arc<dyn DeliverySink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.emit(DeliveryNotice::Delivered {
            task_id: "e1/p1".into(),
        });
        sink.emit(DeliveryNotice::Failed {
            task_id: "e1/p2".into(),
            reason: "timeout".into(),
            attempts: 3,
        });

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_kind(NoticeKind::Delivered), 1);
        assert_eq!(sink.count_kind(NoticeKind::Failed), 1);
        assert_eq!(sink.count_kind(NoticeKind::NoDestination), 0);

        let notices = sink.notices();
        assert_eq!(notices[1].task_id(), "e1/p2");

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_notice_serializes_with_kind_tag() {
        let notice = DeliveryNotice::NoDestination {
            task_id: "e9/gone".into(),
            message: "no destination named 'gone'".into(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "no_destination");
        assert_eq!(json["task_id"], "e9/gone");
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        sink.emit(DeliveryNotice::Delivered {
            task_id: "e1/p1".into(),
        });
    }
}
