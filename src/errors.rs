//! Error types for the resource pool

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by factories and resource shutdowns.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool is exhausted - no resource available")]
    Exhausted,

    #[error("Pool is closed")]
    Closed,

    #[error("Invalid pool configuration: idle ({idle}) exceeds active ({active})")]
    InvalidConfig { idle: u64, active: u64 },

    #[error("Timed out after {0:?} waiting for a resource")]
    WaitTimeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    #[error("Resource factory failed: {0}")]
    Factory(#[source] BoxError),

    #[error("Resource shutdown failed: {0}")]
    ResourceShutdown(#[source] BoxError),

    #[error("Failed to shut down {} idle resource(s)", .0.len())]
    ShutdownFailures(Vec<BoxError>),

    #[error("No resource factory registered")]
    FactoryMissing,

    #[error("A resource factory is already registered")]
    FactoryAlreadyRegistered,
}

impl PoolError {
    /// Whether the error comes from the caller's context rather than the pool.
    pub fn is_context_error(&self) -> bool {
        matches!(self, PoolError::Cancelled | PoolError::DeadlineExceeded)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
