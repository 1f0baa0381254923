//! Idle resource wrapper with lazy expiry

use crate::errors::BoxError;
use crate::resource::Shutdown;
use std::time::{Duration, Instant};

/// A resource parked in the idle container, stamped when it was parked.
pub(crate) struct PooledItem<R> {
    created_at: Instant,
    resource: R,
}

impl<R: Shutdown> PooledItem<R> {
    pub fn new(resource: R, created_at: Instant) -> Self {
        Self {
            created_at,
            resource,
        }
    }

    /// Whether the item sat idle longer than `timeout` as of `now`.
    ///
    /// A missing or zero timeout never expires.
    pub fn expired(&self, timeout: Option<Duration>, now: Instant) -> bool {
        match timeout {
            Some(timeout) if !timeout.is_zero() => self
                .created_at
                .checked_add(timeout)
                .is_some_and(|deadline| deadline < now),
            _ => false,
        }
    }

    pub fn shutdown(self) -> Result<(), BoxError> {
        self.resource.shutdown()
    }

    pub fn into_inner(self) -> R {
        self.resource
    }
}
