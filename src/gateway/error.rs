//! Gateway error taxonomy.
//!
//! Callers decide retry strategy from `kind()`: validation errors are the
//! caller's fault and never retried, `Overloaded` is safe to retry with
//! backoff, `Unavailable` only after its `retry_after`, and database errors
//! pass through for the caller to judge.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::gateway::database::DbError;
use crate::resilience::{AcquireError, CircuitError, Retryable};
use crate::security::ValidationError;

/// Coarse classification of a `GatewayError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Overloaded,
    Unavailable,
    NotFound,
    Database,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Database => "database",
        }
    }
}

/// Errors surfaced by `DataGateway` operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("gateway overloaded: {0}")]
    Overloaded(#[source] AcquireError),

    #[error("dependency '{circuit}' unavailable, retry after {}ms", .retry_after.as_millis())]
    Unavailable {
        circuit: String,
        retry_after: Duration,
    },

    #[error("document '{key}' not found")]
    NotFound { key: String },

    #[error(transparent)]
    Database(DbError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_) => ErrorKind::Validation,
            GatewayError::Overloaded(_) => ErrorKind::Overloaded,
            GatewayError::Unavailable { .. } => ErrorKind::Unavailable,
            GatewayError::NotFound { .. } => ErrorKind::NotFound,
            GatewayError::Database(_) => ErrorKind::Database,
        }
    }

    /// Outcome label for metrics.
    pub(crate) fn outcome(&self) -> &'static str {
        self.kind().as_str()
    }
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Overloaded(AcquireError::Timeout { .. }) => true,
            GatewayError::Overloaded(AcquireError::Closed) => false,
            GatewayError::Unavailable { .. } => true,
            GatewayError::Database(e) => e.is_transient(),
            GatewayError::Validation(_) | GatewayError::NotFound { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::Unavailable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<AcquireError> for GatewayError {
    fn from(e: AcquireError) -> Self {
        GatewayError::Overloaded(e)
    }
}

impl From<CircuitError<DbError>> for GatewayError {
    fn from(e: CircuitError<DbError>) -> Self {
        match e {
            CircuitError::Open {
                circuit,
                retry_after,
                ..
            } => GatewayError::Unavailable {
                circuit,
                retry_after,
            },
            CircuitError::Execution(DbError::NotFound(key)) => GatewayError::NotFound { key },
            CircuitError::Execution(e) => GatewayError::Database(e),
        }
    }
}
