//! Config-driven destination: resolves the destination event through the
//! event rules, builds the payload with the field mapper and hands the call
//! to a transport.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use tagrelay_core::types::{Event, EventType};
use tagrelay_mapping::config::{CompiledMapping, DestinationMapping};
use tagrelay_mapping::error::{MappingError, MappingResult};
use tagrelay_mapping::mapper::VariableSource;
use tagrelay_mapping::transform::Transformations;

use crate::destination::Destination;

/// One outbound call produced by a mapped destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationCall {
    pub destination: String,
    pub event_key: String,
    pub event_type: EventType,
    pub payload: Value,
}

/// Delivers mapped calls to the third party (HTTP client, pixel queue, log).
#[async_trait]
pub trait DestinationTransport: Send + Sync {
    async fn send(&self, call: DestinationCall) -> Result<()>;
}

pub struct MappedDestination {
    name: String,
    mapping: RwLock<Arc<CompiledMapping>>,
    transformations: Transformations,
    variables: Option<Arc<dyn VariableSource>>,
    transport: Arc<dyn DestinationTransport>,
}

impl MappedDestination {
    pub fn new(
        mapping: DestinationMapping,
        transport: Arc<dyn DestinationTransport>,
    ) -> MappingResult<Self> {
        Self::with_options(mapping, transport, Transformations::new(), None)
    }

    /// `transformations` run after the chains named in the mapping config;
    /// `variables` replaces the system clock and id generator.
    pub fn with_options(
        mapping: DestinationMapping,
        transport: Arc<dyn DestinationTransport>,
        transformations: Transformations,
        variables: Option<Arc<dyn VariableSource>>,
    ) -> MappingResult<Self> {
        let compiled = compile(&mapping, &transformations, variables.as_ref())?;
        Ok(Self {
            name: mapping.name,
            mapping: RwLock::new(Arc::new(compiled)),
            transformations,
            variables,
            transport,
        })
    }

    /// Swap in a new mapping. Calls already running keep the mapping they
    /// started with; queued tasks pick up the new one.
    pub fn update_configuration(&self, mapping: DestinationMapping) -> MappingResult<()> {
        if mapping.name != self.name {
            return Err(MappingError::InvalidConfig(format!(
                "cannot rename destination '{}' to '{}'",
                self.name, mapping.name
            )));
        }
        let compiled = compile(&mapping, &self.transformations, self.variables.as_ref())?;
        *self.mapping.write() = Arc::new(compiled);
        info!(
            destination = %self.name,
            mapping_rules = mapping.mapping_rules.len(),
            event_rules = mapping.event_rules.len(),
            "destination mapping updated"
        );
        Ok(())
    }

    async fn handle(&self, event: Event) -> Result<()> {
        let mapping = Arc::clone(&self.mapping.read());
        let Some((event_key, payload)) = mapping.build_call(&event) else {
            return Ok(());
        };

        debug!(
            destination = %self.name,
            event_id = %event.id,
            event_key = %event_key,
            "sending mapped event"
        );
        self.transport
            .send(DestinationCall {
                destination: self.name.clone(),
                event_key,
                event_type: event.event_type,
                payload,
            })
            .await
    }
}

fn compile(
    mapping: &DestinationMapping,
    transformations: &Transformations,
    variables: Option<&Arc<dyn VariableSource>>,
) -> MappingResult<CompiledMapping> {
    let compiled = mapping.compile()?.with_transformations(transformations);
    Ok(match variables {
        Some(v) => compiled.with_variables(Arc::clone(v)),
        None => compiled,
    })
}

#[async_trait]
impl Destination for MappedDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identify(&self, event: Event) -> Result<()> {
        self.handle(event).await
    }

    async fn track(&self, event: Event) -> Result<()> {
        self.handle(event).await
    }

    async fn page(&self, event: Event) -> Result<()> {
        self.handle(event).await
    }

    async fn group(&self, event: Event) -> Result<()> {
        self.handle(event).await
    }
}
