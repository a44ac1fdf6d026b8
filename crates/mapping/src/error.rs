use thiserror::Error;

pub type MappingResult<T> = Result<T, MappingError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Template error in '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("Unknown transformation '{0}'")]
    UnknownTransform(String),

    #[error("Invalid mapping configuration: {0}")]
    InvalidConfig(String),
}
