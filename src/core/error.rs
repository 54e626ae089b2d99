use super::{Field, Id, Version};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Unique value conflict for {entity}: {}", join_field_names(.fields))]
    Conflict { entity: Id, fields: Vec<Field> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Incomplete write for {id} at version {version}")]
    IncompleteWrite { id: Id, version: Version },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Task rejected: {0}")]
    Rejected(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, StoreError::Rejected(_))
    }

    /// Field names carried by a `Conflict`, empty for every other variant.
    pub fn conflicting_fields(&self) -> Vec<&str> {
        match self {
            StoreError::Conflict { fields, .. } => fields.iter().map(|f| f.name()).collect(),
            _ => Vec::new(),
        }
    }
}

fn join_field_names(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
