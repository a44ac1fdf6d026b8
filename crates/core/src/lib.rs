pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use error::{RelayError, RelayResult};
pub use event_bus::{DeliveryNotice, DeliverySink};
pub use types::{Event, EventType};
