//! # shutdown_pool
//!
//! Bounded, thread-safe async pool for expensive resources that have to be
//! shut down explicitly, such as network connections.
//!
//! ## Features
//!
//! - Upper bound on live resources, with an idle ceiling for reuse
//! - Lazy idle expiry, checked when a resource is about to be handed out
//! - Fail-fast or blocking acquisition with FIFO fairness among waiters
//! - Wait timeouts, caller cancellation and deadlines via [`Context`]
//! - Graceful shutdown that drains idle resources and wakes all waiters
//! - Runtime configuration reload
//! - RAII guard returning resources on drop
//!
//! ## Quick Start
//!
//! ```rust
//! use shutdown_pool::{BoxError, Context, PoolConfig, ResourcePool, Shutdown};
//!
//! struct Conn;
//! impl Shutdown for Conn {
//!     fn shutdown(self) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ResourcePool::<Conn>::with_factory(
//!     PoolConfig::new().with_active(8).with_idle(2),
//!     |_ctx: Context| async { Ok::<_, BoxError>(Conn) },
//! )?;
//!
//! {
//!     let _conn = pool.get_guarded(&Context::background()).await?;
//!     // Resource automatically returned when `_conn` goes out of scope
//! }
//! assert_eq!(pool.idle_count(), 1);
//! # Ok(())
//! # }
//! ```

mod clock;
mod config;
mod context;
mod errors;
mod item;
mod pool;
mod resource;
mod waiter;

pub use clock::{Clock, SystemClock};
pub use config::{DEFAULT_IDLE_ITEMS, PoolConfig};
pub use context::Context;
pub use errors::{BoxError, PoolError, PoolResult};
pub use pool::{PoolStatus, PooledResource, ResourcePool};
pub use resource::{Factory, Shutdown};
