//! Destination mapping: path access with `$` broadcast, filter predicates,
//! first-match event rules and the rule-driven field mapper.

pub mod config;
pub mod error;
pub mod filter;
pub mod mapper;
pub mod path;
pub mod rules;
pub mod template;
pub mod transform;

pub use config::{CompiledMapping, DestinationMapping};
pub use error::{MappingError, MappingResult};
pub use filter::{Filter, FilterOperator};
pub use mapper::{FieldMapper, MapOptions, MappingRule, SourceKind, VariableSource};
pub use rules::{EventRule, EventRuleResolver};
pub use transform::Transformations;
