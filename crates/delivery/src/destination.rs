//! Destination hooks, the registry tasks are routed through, and the
//! connectivity probe gating delivery.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use tagrelay_core::types::Event;

/// A third-party destination. One hook per call type; hooks a destination
/// does not implement succeed without doing anything.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Name tasks are routed by. Several registrations may share a name.
    fn name(&self) -> &str;

    async fn identify(&self, _event: Event) -> Result<()> {
        Ok(())
    }

    async fn track(&self, _event: Event) -> Result<()> {
        Ok(())
    }

    async fn page(&self, _event: Event) -> Result<()> {
        Ok(())
    }

    async fn group(&self, _event: Event) -> Result<()> {
        Ok(())
    }
}

/// Ordered, shared list of registered destinations.
#[derive(Clone, Default)]
pub struct DestinationRegistry {
    entries: Arc<RwLock<Vec<Arc<dyn Destination>>>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, destination: Arc<dyn Destination>) {
        info!(destination = destination.name(), "destination registered");
        self.entries.write().push(destination);
    }

    /// Remove every registration named `name`. Returns how many were removed.
    pub fn remove(&self, name: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|d| d.name() != name);
        let removed = before - entries.len();
        if removed > 0 {
            info!(destination = name, removed, "destination removed");
        }
        removed
    }

    /// Distinct names in registration order.
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut names: Vec<String> = Vec::with_capacity(entries.len());
        for d in entries.iter() {
            if !names.iter().any(|n| n == d.name()) {
                names.push(d.name().to_string());
            }
        }
        names
    }

    pub fn matching(&self, name: &str) -> Vec<Arc<dyn Destination>> {
        self.entries
            .read()
            .iter()
            .filter(|d| d.name() == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Whether the delivery channel is currently usable.
pub trait DeliveryProbe: Send + Sync {
    fn can_deliver(&self) -> bool;
}

pub struct AlwaysOnline;

impl DeliveryProbe for AlwaysOnline {
    fn can_deliver(&self) -> bool {
        true
    }
}

impl<F> DeliveryProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn can_deliver(&self) -> bool {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Named(&'static str);

    #[async_trait]
    impl Destination for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_names_are_distinct_and_ordered() {
        let registry = DestinationRegistry::new();
        registry.register(Arc::new(Named("pixel")));
        registry.register(Arc::new(Named("analytics")));
        registry.register(Arc::new(Named("pixel")));

        assert_eq!(registry.names(), vec!["pixel", "analytics"]);
        assert_eq!(registry.matching("pixel").len(), 2);
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.remove("pixel"), 2);
        assert_eq!(registry.remove("pixel"), 0);
        assert_eq!(registry.names(), vec!["analytics"]);
        assert!(registry.matching("pixel").is_empty());
    }

    #[tokio::test]
    async fn test_default_hooks_are_no_ops() {
        let destination = Named("noop");
        let event = Event::track("e1", "purchase");
        assert!(destination.identify(event.clone()).await.is_ok());
        assert!(destination.track(event.clone()).await.is_ok());
        assert!(destination.page(event.clone()).await.is_ok());
        assert!(destination.group(event).await.is_ok());
    }

    #[test]
    fn test_closure_probe() {
        let online = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&online);
        let probe = move || flag.load(Ordering::SeqCst);

        assert!(!probe.can_deliver());
        online.store(true, Ordering::SeqCst);
        assert!(probe.can_deliver());
        assert!(AlwaysOnline.can_deliver());
    }
}
