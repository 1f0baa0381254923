//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

/// Idle resources retained when no explicit ceiling is configured.
pub const DEFAULT_IDLE_ITEMS: u64 = 2;

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use shutdown_pool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_active(10)
///     .with_idle(5)
///     .with_idle_timeout(Duration::from_secs(90))
///     .with_wait_timeout(Duration::from_millis(500));
///
/// assert_eq!(config.active, 10);
/// assert!(config.wait);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum number of resources alive at once (checked out plus idle).
    /// Zero means unlimited.
    pub active: u64,

    /// Maximum number of idle resources kept for reuse
    pub idle: u64,

    /// Idle resources older than this are shut down instead of reused
    pub idle_timeout: Option<Duration>,

    /// How long a blocked caller waits when `wait` is set. `None` waits forever.
    pub wait_timeout: Option<Duration>,

    /// Block on exhaustion instead of failing immediately
    pub wait: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            active: 0,
            idle: DEFAULT_IDLE_ITEMS,
            idle_timeout: None,
            wait_timeout: None,
            wait: false,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live resources
    pub fn with_active(mut self, active: u64) -> Self {
        self.active = active;
        self
    }

    /// Set the idle ceiling
    pub fn with_idle(mut self, idle: u64) -> Self {
        self.idle = idle;
        self
    }

    /// Set the idle timeout. A zero duration disables expiry.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Block on exhaustion for at most `timeout`.
    ///
    /// A zero duration blocks without a limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use shutdown_pool::PoolConfig;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfig::new().with_wait_timeout(Duration::ZERO);
    /// assert!(config.wait);
    /// assert_eq!(config.wait_timeout, None);
    /// ```
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.wait_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Toggle blocking on exhaustion
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Check the configuration for invalid combinations.
    pub fn validate(&self) -> PoolResult<()> {
        if self.active > 0 && self.idle > self.active {
            return Err(PoolError::InvalidConfig {
                idle: self.idle,
                active: self.active,
            });
        }
        Ok(())
    }

    pub(crate) fn is_bounded(&self) -> bool {
        self.active > 0
    }

    pub(crate) fn has_room(&self, alive: u64) -> bool {
        !self.is_bounded() || alive < self.active
    }
}
