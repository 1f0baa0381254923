//! Core resource pool implementation

use crate::clock::{Clock, SystemClock};
use crate::config::PoolConfig;
use crate::context::Context;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::item::PooledItem;
use crate::resource::{Factory, Shutdown};
use crate::waiter::{WaitKey, WaiterQueue};

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// What a blocked caller can be woken with.
enum Delivery<R> {
    /// A returned resource, handed over without touching the idle container
    Resource(R),
    /// A freed active slot; the caller builds its own resource with it
    Slot,
    /// The pool shut down while the caller waited
    Closed,
}

/// Everything guarded by the pool lock.
struct PoolState<R> {
    /// Most recently returned last
    idle: Vec<PooledItem<R>>,
    /// Resources alive: checked out, idle, or being built
    active: u64,
    waiters: WaiterQueue<Delivery<R>>,
    closed: bool,
    config: PoolConfig,
}

impl<R: Shutdown> PoolState<R> {
    fn new(config: PoolConfig) -> Self {
        Self {
            idle: Vec::new(),
            active: 0,
            waiters: WaiterQueue::new(),
            closed: false,
            config,
        }
    }

    /// Give up one active slot. If the ceiling still allows it, the slot goes
    /// to the longest waiter instead of being freed.
    fn release_slot(&mut self) {
        let within_ceiling = !self.config.is_bounded() || self.active <= self.config.active;
        if !self.closed && within_ceiling && self.waiters.notify_one(Delivery::Slot).is_ok() {
            tracing::trace!(active = self.active, "active slot transferred to waiter");
            return;
        }
        self.active = self.active.saturating_sub(1);
    }

    /// Hand free slots to waiters while the ceiling has room.
    fn admit_waiters(&mut self) {
        while !self.waiters.is_empty() && self.config.has_room(self.active) {
            self.active += 1;
            if self.waiters.notify_one(Delivery::Slot).is_err() {
                self.active -= 1;
                break;
            }
        }
    }

    /// Route a returned resource. Whatever comes back must be shut down.
    fn dispose(&mut self, resource: R, force_close: bool, now: Instant) -> Option<R> {
        if force_close || self.closed {
            self.release_slot();
            return Some(resource);
        }

        let resource = match self.waiters.notify_one(Delivery::Resource(resource)) {
            Ok(()) => {
                tracing::trace!("returned resource handed to waiter");
                return None;
            }
            Err(Delivery::Resource(resource)) => resource,
            Err(Delivery::Slot | Delivery::Closed) => {
                unreachable!("waiter queue hands back the delivery it was given")
            }
        };

        if (self.idle.len() as u64) < self.config.idle {
            self.idle.push(PooledItem::new(resource, now));
            None
        } else {
            tracing::trace!(idle = self.idle.len(), "idle container full, shutting resource down");
            self.release_slot();
            Some(resource)
        }
    }
}

struct PoolInner<R> {
    state: Mutex<PoolState<R>>,
    factory: OnceLock<Box<dyn Factory<R>>>,
    clock: Box<dyn Clock>,
}

/// Outcome of the locked part of `get`.
enum Acquire<'a, R: Shutdown> {
    Reused(R),
    Create(Slot<'a, R>),
    Wait(Waiting<'a, R>, Option<Duration>),
}

impl<R: Shutdown> PoolInner<R> {
    fn acquire(&self) -> PoolResult<Acquire<'_, R>> {
        let now = self.clock.now();
        let mut stale = Vec::new();
        let step = self.acquire_locked(now, &mut stale);
        for item in stale {
            if let Err(err) = item.shutdown() {
                tracing::warn!(error = %err, "failed to shut down expired idle resource");
            }
        }
        step
    }

    fn acquire_locked(
        &self,
        now: Instant,
        stale: &mut Vec<PooledItem<R>>,
    ) -> PoolResult<Acquire<'_, R>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }

        let idle_timeout = state.config.idle_timeout;
        while let Some(item) = state.idle.pop() {
            if item.expired(idle_timeout, now) {
                state.release_slot();
                stale.push(item);
                continue;
            }
            tracing::debug!(idle = state.idle.len(), "reusing idle resource");
            return Ok(Acquire::Reused(item.into_inner()));
        }

        if state.config.has_room(state.active) {
            state.active += 1;
            return Ok(Acquire::Create(Slot::reserved(self)));
        }
        if !state.config.wait {
            return Err(PoolError::Exhausted);
        }

        let (key, rx) = state.waiters.register();
        tracing::trace!(waiters = state.waiters.len(), "pool exhausted, waiting");
        Ok(Acquire::Wait(
            Waiting::new(self, key, rx),
            state.config.wait_timeout,
        ))
    }

    /// Build a resource on a reserved slot. The lock is not held meanwhile.
    async fn create(&self, ctx: &Context, slot: Slot<'_, R>) -> PoolResult<R> {
        let factory = self.factory.get().ok_or(PoolError::FactoryMissing)?;
        if self.state.lock().closed {
            return Err(PoolError::Closed);
        }
        let resource = ctx
            .run(factory.create(ctx.clone()))
            .await?
            .map_err(PoolError::Factory)?;
        tracing::debug!("created new resource");
        slot.commit(resource)
    }

    fn put(&self, resource: R, force_close: bool) -> PoolResult<()> {
        let now = self.clock.now();
        let doomed = self.state.lock().dispose(resource, force_close, now);
        match doomed {
            Some(resource) => resource.shutdown().map_err(PoolError::ResourceShutdown),
            None => Ok(()),
        }
    }
}

/// An active slot reserved for a resource under construction. Released on
/// drop unless committed.
struct Slot<'a, R: Shutdown> {
    inner: &'a PoolInner<R>,
    committed: bool,
}

impl<'a, R: Shutdown> Slot<'a, R> {
    fn reserved(inner: &'a PoolInner<R>) -> Self {
        Self {
            inner,
            committed: false,
        }
    }

    fn commit(mut self, resource: R) -> PoolResult<R> {
        self.committed = true;
        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                return Ok(resource);
            }
            state.release_slot();
        }
        if let Err(err) = resource.shutdown() {
            tracing::warn!(error = %err, "failed to shut down resource built after pool close");
        }
        Err(PoolError::Closed)
    }
}

impl<R: Shutdown> Drop for Slot<'_, R> {
    fn drop(&mut self) {
        if !self.committed {
            self.inner.state.lock().release_slot();
        }
    }
}

/// A caller registered in the waiter queue. Dropping it before it settles
/// withdraws the registration, and recycles anything delivered in between.
struct Waiting<'a, R: Shutdown> {
    inner: &'a PoolInner<R>,
    key: WaitKey,
    rx: oneshot::Receiver<Delivery<R>>,
    settled: bool,
}

enum Wake<R> {
    Delivered(Result<Delivery<R>, oneshot::error::RecvError>),
    GaveUp(PoolError),
}

impl<'a, R: Shutdown> Waiting<'a, R> {
    fn new(inner: &'a PoolInner<R>, key: WaitKey, rx: oneshot::Receiver<Delivery<R>>) -> Self {
        Self {
            inner,
            key,
            rx,
            settled: false,
        }
    }

    async fn wait(&mut self, ctx: &Context, timeout: Option<Duration>) -> PoolResult<Delivery<R>> {
        let patience = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let wake = tokio::select! {
            biased;
            delivered = &mut self.rx => Wake::Delivered(delivered),
            err = ctx.done() => Wake::GaveUp(err),
            () = patience => Wake::GaveUp(PoolError::WaitTimeout(timeout.unwrap_or_default())),
        };

        self.settled = true;
        match wake {
            Wake::Delivered(delivered) => delivered.map_err(|_| PoolError::Closed),
            Wake::GaveUp(err) => self.give_up(err),
        }
    }

    /// Withdraw after a timeout or cancellation. A delivery that already
    /// claimed the slot wins over `err`.
    fn give_up(&mut self, err: PoolError) -> PoolResult<Delivery<R>> {
        if self.inner.state.lock().waiters.remove(self.key) {
            tracing::trace!(error = %err, "waiter withdrawn");
            return Err(err);
        }
        self.rx.try_recv().map_err(|_| PoolError::Closed)
    }
}

impl<R: Shutdown> Drop for Waiting<'_, R> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let delivery = {
            let mut state = self.inner.state.lock();
            if state.waiters.remove(self.key) {
                return;
            }
            self.rx.try_recv().ok()
        };
        match delivery {
            Some(Delivery::Resource(resource)) => {
                if let Err(err) = self.inner.put(resource, false) {
                    tracing::warn!(error = %err, "failed to recycle resource for dropped waiter");
                }
            }
            Some(Delivery::Slot) => self.inner.state.lock().release_slot(),
            Some(Delivery::Closed) | None => {}
        }
    }
}

/// Snapshot of the pool's bookkeeping
///
/// # Examples
///
/// ```
/// use shutdown_pool::{PoolConfig, ResourcePool, Shutdown, BoxError};
///
/// struct Conn;
/// impl Shutdown for Conn {
///     fn shutdown(self) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// let pool = ResourcePool::<Conn>::new(PoolConfig::default()).unwrap();
/// let status = pool.status();
/// assert_eq!(status.active, 0);
/// assert_eq!(status.idle, 0);
/// assert!(!status.closed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Resources alive, checked out or idle
    pub active: u64,
    /// Resources parked for reuse
    pub idle: usize,
    /// Callers blocked in `get`
    pub waiters: usize,
    /// Whether `shutdown` has run
    pub closed: bool,
}

/// Bounded pool of resources that must be shut down explicitly.
///
/// Cloning the pool is cheap; clones share the same state.
///
/// # Examples
///
/// ```
/// use shutdown_pool::{BoxError, Context, PoolConfig, ResourcePool, Shutdown};
///
/// struct Conn(u32);
/// impl Shutdown for Conn {
///     fn shutdown(self) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ResourcePool::<Conn>::with_factory(
///     PoolConfig::new().with_active(4).with_idle(2),
///     |_ctx: Context| async { Ok::<_, BoxError>(Conn(1)) },
/// )?;
///
/// let ctx = Context::background();
/// let conn = pool.get(&ctx).await?;
/// assert_eq!(conn.0, 1);
/// pool.put(conn, false)?;
/// assert_eq!(pool.idle_count(), 1);
///
/// pool.shutdown()?;
/// # Ok(())
/// # }
/// ```
pub struct ResourcePool<R> {
    inner: Arc<PoolInner<R>>,
}

impl<R> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Shutdown> ResourcePool<R> {
    /// Create a pool without a factory. Register one with
    /// [`register_factory`](Self::register_factory) before the first `get`.
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a pool that reads time from `clock` for idle expiry.
    pub fn with_clock(config: PoolConfig, clock: impl Clock) -> PoolResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::new(config)),
                factory: OnceLock::new(),
                clock: Box::new(clock),
            }),
        })
    }

    /// Create a pool and register its factory in one step.
    pub fn with_factory(config: PoolConfig, factory: impl Factory<R>) -> PoolResult<Self> {
        let pool = Self::new(config)?;
        pool.register_factory(factory)?;
        Ok(pool)
    }

    /// Record the factory used to build new resources. Only the first call
    /// takes effect.
    pub fn register_factory(&self, factory: impl Factory<R>) -> PoolResult<()> {
        self.inner
            .factory
            .set(Box::new(factory))
            .map_err(|_| PoolError::FactoryAlreadyRegistered)
    }

    /// Acquire a resource.
    ///
    /// Reuses the most recently returned idle resource, builds a new one if
    /// the active ceiling allows, and otherwise fails with
    /// [`PoolError::Exhausted`] or waits, depending on the configuration.
    /// Expired idle resources met on the way are shut down and skipped.
    pub async fn get(&self, ctx: &Context) -> PoolResult<R> {
        match self.inner.acquire()? {
            Acquire::Reused(resource) => Ok(resource),
            Acquire::Create(slot) => self.inner.create(ctx, slot).await,
            Acquire::Wait(mut waiting, timeout) => match waiting.wait(ctx, timeout).await? {
                Delivery::Resource(resource) => Ok(resource),
                Delivery::Slot => {
                    let slot = Slot::reserved(&self.inner);
                    self.inner.create(ctx, slot).await
                }
                Delivery::Closed => Err(PoolError::Closed),
            },
        }
    }

    /// Acquire a resource wrapped in a guard that returns it on drop.
    pub async fn get_guarded(&self, ctx: &Context) -> PoolResult<PooledResource<R>> {
        let resource = self.get(ctx).await?;
        Ok(PooledResource::new(resource, self.clone()))
    }

    /// Return a resource obtained from this pool.
    ///
    /// The resource goes to the longest waiter if there is one, otherwise to
    /// the idle container. It is shut down instead when `force_close` is set,
    /// the pool is closed, or the idle container is full; a failing shutdown
    /// is reported but the resource is released either way.
    pub fn put(&self, resource: R, force_close: bool) -> PoolResult<()> {
        self.inner.put(resource, force_close)
    }

    /// Close the pool.
    ///
    /// Blocked callers fail with [`PoolError::Closed`] and every idle resource
    /// is shut down. Resources still checked out are shut down when they are
    /// returned. All idle shutdowns are attempted; their failures are
    /// collected into [`PoolError::ShutdownFailures`]. Closing twice is a no-op.
    pub fn shutdown(&self) -> PoolResult<()> {
        let idle = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let woken = state.waiters.close_all(|| Delivery::Closed);
            let idle = std::mem::take(&mut state.idle);
            state.active = state.active.saturating_sub(idle.len() as u64);
            tracing::debug!(woken, idle = idle.len(), "pool closed");
            idle
        };

        let failures: Vec<BoxError> = idle
            .into_iter()
            .filter_map(|item| item.shutdown().err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::ShutdownFailures(failures))
        }
    }

    /// Swap in a new configuration at runtime.
    ///
    /// Idle resources above the new idle ceiling are shut down, oldest first.
    /// Room under a raised active ceiling is handed to blocked callers.
    pub fn reload(&self, config: PoolConfig) -> PoolResult<()> {
        config.validate()?;
        let trimmed = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.config = config;
            let excess = state.idle.len().saturating_sub(state.config.idle as usize);
            let trimmed: Vec<_> = state.idle.drain(..excess).collect();
            for _ in &trimmed {
                state.release_slot();
            }
            state.admit_waiters();
            tracing::debug!(trimmed = trimmed.len(), "pool configuration reloaded");
            trimmed
        };

        for item in trimmed {
            if let Err(err) = item.shutdown() {
                tracing::warn!(error = %err, "failed to shut down trimmed idle resource");
            }
        }
        Ok(())
    }

    /// Get a consistent snapshot of the pool's bookkeeping
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            active: state.active,
            idle: state.idle.len(),
            waiters: state.waiters.len(),
            closed: state.closed,
        }
    }

    /// Get active count
    pub fn active_count(&self) -> u64 {
        self.inner.state.lock().active
    }

    /// Get idle count
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Whether the pool has been shut down
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the configuration currently in effect
    pub fn config(&self) -> PoolConfig {
        self.inner.state.lock().config.clone()
    }
}

impl<R: Shutdown> fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("status", &self.status())
            .field("has_factory", &self.inner.factory.get().is_some())
            .finish()
    }
}

/// A pooled resource that automatically returns to the pool when dropped
pub struct PooledResource<R: Shutdown> {
    resource: Option<R>,
    pool: ResourcePool<R>,
}

impl<R: Shutdown> PooledResource<R> {
    fn new(resource: R, pool: ResourcePool<R>) -> Self {
        Self {
            resource: Some(resource),
            pool,
        }
    }

    /// Return the resource now, reporting a shutdown failure if it had to be
    /// closed.
    pub fn release(mut self) -> PoolResult<()> {
        match self.resource.take() {
            Some(resource) => self.pool.put(resource, false),
            None => Ok(()),
        }
    }

    /// Shut the resource down instead of recycling it, e.g. after it broke.
    pub fn discard(mut self) -> PoolResult<()> {
        match self.resource.take() {
            Some(resource) => self.pool.put(resource, true),
            None => Ok(()),
        }
    }

    /// Detach the resource. The caller becomes responsible for passing it
    /// back through [`ResourcePool::put`].
    pub fn into_inner(mut self) -> R {
        self.resource.take().expect("Value already taken")
    }
}

impl<R: Shutdown> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("Value already taken")
    }
}

impl<R: Shutdown> DerefMut for PooledResource<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("Value already taken")
    }
}

impl<R: Shutdown> Drop for PooledResource<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if let Err(err) = self.pool.put(resource, false) {
                tracing::warn!(error = %err, "failed to return pooled resource");
            }
        }
    }
}
