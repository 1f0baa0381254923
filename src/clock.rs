//! Time source used for idle expiry

use std::time::Instant;

/// Source of "now" for the pool.
///
/// The pool only compares instants, so any monotonic source works. Tests can
/// inject a manually advanced clock to exercise expiry without sleeping.
///
/// # Examples
///
/// ```
/// use shutdown_pool::{Clock, SystemClock};
/// use std::time::Instant;
///
/// let fixed = Instant::now();
/// let clock = move || fixed;
/// assert_eq!(clock.now(), fixed);
/// assert!(SystemClock.now() >= fixed);
/// ```
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> Instant + Send + Sync + 'static,
{
    fn now(&self) -> Instant {
        self()
    }
}
