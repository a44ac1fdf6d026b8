//! Event delivery: per-destination fan-out, retry with exponential backoff,
//! and config-driven destinations built on the mapping engine.

pub mod destination;
pub mod dispatcher;
pub mod error;
pub mod mapped;
pub mod queue;
pub mod retry;

pub use destination::{AlwaysOnline, DeliveryProbe, Destination, DestinationRegistry};
pub use dispatcher::{DeliveryDispatcher, DeliveryHandle, OutcomeStatus, TaskOutcome};
pub use error::DeliveryError;
pub use mapped::{DestinationCall, DestinationTransport, MappedDestination};
pub use queue::{DeliveryTask, QueueStats, RetryQueue};
pub use retry::RetryPolicy;
