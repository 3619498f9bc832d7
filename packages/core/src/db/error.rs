//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, and query failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Covers connection/initialization failures, SQL execution failures and the
/// few invariants the database layer checks inside its own transactions
/// (row existence, closure-table acyclicity, dependents on delete).
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// UNIQUE / FOREIGN KEY / CHECK constraint rejected the write
    #[error("Constraint violation: {context}")]
    ConstraintViolation { context: String },

    /// Referenced row does not exist (checked inside a transaction)
    #[error("{entity} not found: {id}")]
    RowNotFound { entity: &'static str, id: String },

    /// Re-parenting would make a node its own ancestor
    #[error("Cycle detected: {context}")]
    CycleDetected { context: String },

    /// Delete refused because other rows still depend on the target
    #[error("Row has dependents: {context}")]
    HasDependents { context: String },

    /// Request arguments disagree with stored state (e.g. foreign ids in a reorder)
    #[error("Invalid input: {context}")]
    InvalidInput { context: String },

    /// Stored row could not be decoded into a model
    #[error("Failed to decode row: {context}")]
    RowDecode { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Classify a libsql error raised by a statement
    ///
    /// Constraint failures are surfaced as `ConstraintViolation` so callers can
    /// tell a natural-key collision apart from a broken store.
    pub fn from_statement(context: impl Into<String>, error: libsql::Error) -> Self {
        let context = context.into();
        let message = error.to_string();
        if message.contains("constraint failed") || message.contains("SQLITE_CONSTRAINT") {
            Self::ConstraintViolation {
                context: format!("{}: {}", context, message),
            }
        } else {
            Self::SqlExecutionError {
                context: format!("{}: {}", context, message),
            }
        }
    }

    pub fn row_not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::RowNotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn cycle_detected(context: impl Into<String>) -> Self {
        Self::CycleDetected {
            context: context.into(),
        }
    }

    pub fn has_dependents(context: impl Into<String>) -> Self {
        Self::HasDependents {
            context: context.into(),
        }
    }

    pub fn constraint_violation(context: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            context: context.into(),
        }
    }

    pub fn invalid_input(context: impl Into<String>) -> Self {
        Self::InvalidInput {
            context: context.into(),
        }
    }

    pub fn row_decode(context: impl Into<String>) -> Self {
        Self::RowDecode {
            context: context.into(),
        }
    }

    /// Store cannot be reached or opened at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::InitializationFailed(_)
                | Self::PermissionDenied { .. }
                | Self::DirectoryCreationFailed(_)
        )
    }
}
