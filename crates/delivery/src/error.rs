use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Destination '{destination}' rejected task {task_id}: {reason}")]
    Rejected {
        task_id: String,
        destination: String,
        reason: String,
    },

    #[error("Task {task_id} failed after {attempts} attempts")]
    AttemptsExhausted { task_id: String, attempts: u32 },

    #[error("No destination named '{destination}' for task {task_id}")]
    NoDestination {
        task_id: String,
        destination: String,
    },

    #[error("Dispatcher dropped before task {0} finished")]
    Shutdown(String),
}
