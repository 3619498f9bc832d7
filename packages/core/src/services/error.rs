//! Service Layer Error Types
//!
//! This module defines the error type returned by every service operation.
//! Database failures are logged where they cross into this layer and
//! collapsed into the small caller-facing taxonomy below.

use crate::db::DatabaseError;
use crate::models::ValidationError;
use thiserror::Error;

/// Service operation errors
///
/// Each variant maps onto one transport status via [`ServiceError::status_code`].
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Entity not found by id
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Payload or argument rejected before touching the store
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Move or re-parent would create a cycle
    #[error("Cycle detected: {context}")]
    CycleDetected { context: String },

    /// Delete refused because children still exist
    #[error("Hierarchy constraint violated: {0}")]
    HierarchyViolation(String),

    /// Natural-key uniqueness or reference constraint rejected the write
    #[error("Constraint violation: {context}")]
    ConstraintViolation { context: String },

    /// Transaction rolled back; no partial effect
    #[error("Transaction failed: {context}")]
    TransactionFailed { context: String },

    /// Relational store cannot be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Deadline elapsed before the operation finished
    #[error("Operation timed out after {millis} ms")]
    Timeout { millis: u128 },
}

impl ServiceError {
    /// Create a not found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a cycle error
    pub fn cycle_detected(context: impl Into<String>) -> Self {
        Self::CycleDetected {
            context: context.into(),
        }
    }

    /// Create a hierarchy violation error
    pub fn hierarchy_violation(msg: impl Into<String>) -> Self {
        Self::HierarchyViolation(msg.into())
    }

    /// Create a constraint violation error
    pub fn constraint_violation(context: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            context: context.into(),
        }
    }

    /// Create a transaction failed error
    pub fn transaction_failed(context: impl Into<String>) -> Self {
        Self::TransactionFailed {
            context: context.into(),
        }
    }

    /// HTTP-equivalent status for transports layered above the services
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) | Self::CycleDetected { .. } => 400,
            Self::HierarchyViolation(_) | Self::ConstraintViolation { .. } => 409,
            Self::TransactionFailed { .. } => 500,
            Self::StoreUnavailable(_) => 503,
            Self::Timeout { .. } => 504,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<ValidationError> for ServiceError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::RowNotFound { entity, id } => Self::NotFound { entity, id },
            DatabaseError::CycleDetected { context } => Self::CycleDetected { context },
            DatabaseError::HasDependents { context } => Self::HierarchyViolation(context),
            DatabaseError::ConstraintViolation { context } => {
                tracing::warn!(%context, "Write rejected by constraint");
                Self::ConstraintViolation { context }
            }
            DatabaseError::InvalidInput { context } => Self::Validation(context),
            other if other.is_unavailable() => {
                tracing::error!(error = %other, "Relational store unavailable");
                Self::StoreUnavailable(other.to_string())
            }
            other => {
                tracing::error!(error = %other, "Store operation failed");
                Self::TransactionFailed {
                    context: other.to_string(),
                }
            }
        }
    }
}
