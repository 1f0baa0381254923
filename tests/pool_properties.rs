use shutdown_pool::{BoxError, Clock, Context, PoolConfig, PoolError, ResourcePool, Shutdown};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Tracker {
    created: AtomicUsize,
    shut_down: AtomicUsize,
    fail_shutdown: AtomicBool,
}

impl Tracker {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn shut_down(&self) -> usize {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Conn {
    id: usize,
    tracker: Arc<Tracker>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker").finish_non_exhaustive()
    }
}

impl Shutdown for Conn {
    fn shutdown(self) -> Result<(), BoxError> {
        self.tracker.shut_down.fetch_add(1, Ordering::SeqCst);
        if self.tracker.fail_shutdown.load(Ordering::SeqCst) {
            return Err(format!("conn {} already broken", self.id).into());
        }
        Ok(())
    }
}

#[derive(Clone)]
struct ManualClock(Arc<Mutex<Instant>>);

impl ManualClock {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

fn register(pool: &ResourcePool<Conn>) -> Arc<Tracker> {
    let tracker = Arc::new(Tracker::default());
    let factory_tracker = Arc::clone(&tracker);
    pool.register_factory(move |_ctx: Context| {
        let tracker = Arc::clone(&factory_tracker);
        async move {
            let id = tracker.created.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(Conn { id, tracker })
        }
    })
    .unwrap();
    tracker
}

fn pool(config: PoolConfig) -> (ResourcePool<Conn>, Arc<Tracker>) {
    let pool = ResourcePool::<Conn>::new(config).unwrap();
    let tracker = register(&pool);
    (pool, tracker)
}

async fn until_waiters(pool: &ResourcePool<Conn>, count: usize) {
    while pool.status().waiters < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounds_and_ownership_hold_under_contention() {
    let (pool, _tracker) = pool(
        PoolConfig::new()
            .with_active(3)
            .with_idle(2)
            .with_wait_timeout(Duration::ZERO),
    );
    let checked_out = Arc::new(Mutex::new(HashSet::new()));

    let mut handles = Vec::new();
    for task in 0..16 {
        let pool = pool.clone();
        let checked_out = Arc::clone(&checked_out);
        handles.push(tokio::spawn(async move {
            let ctx = Context::background();
            for round in 0..50 {
                let conn = pool.get(&ctx).await.unwrap();
                assert!(checked_out.lock().insert(conn.id), "conn {} handed out twice", conn.id);

                let status = pool.status();
                assert!(status.active <= 3);
                assert!(status.idle <= 2);

                tokio::task::yield_now().await;
                checked_out.lock().remove(&conn.id);
                let force_close = (task + round) % 7 == 0;
                pool.put(conn, force_close).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let status = pool.status();
    assert!(status.active <= 2);
    assert_eq!(status.active as usize, status.idle);
    assert_eq!(status.waiters, 0);
}

#[tokio::test]
async fn test_waiters_are_served_fifo() {
    let (pool, _tracker) = pool(PoolConfig::new().with_active(1).with_idle(1).with_wait(true));
    let ctx = Context::background();
    let held = pool.get(&ctx).await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (position, name) in ["A", "B", "C"].into_iter().enumerate() {
        let task_pool = pool.clone();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let conn = task_pool.get(&Context::background()).await.unwrap();
            order.lock().push(name);
            task_pool.put(conn, false).unwrap();
        }));
        until_waiters(&pool, position + 1).await;
    }

    pool.put(held, false).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    assert_eq!(pool.active_count(), 1);
}

#[tokio::test]
async fn test_expired_idle_resource_is_replaced() {
    let clock = ManualClock::new();
    let pool = ResourcePool::<Conn>::with_clock(
        PoolConfig::new()
            .with_active(2)
            .with_idle(2)
            .with_idle_timeout(Duration::from_millis(50)),
        clock.clone(),
    )
    .unwrap();
    let tracker = register(&pool);
    let ctx = Context::background();

    let conn = pool.get(&ctx).await.unwrap();
    pool.put(conn, false).unwrap();
    clock.advance(Duration::from_millis(60));

    let fresh = pool.get(&ctx).await.unwrap();
    assert_eq!(fresh.id, 1);
    assert_eq!(tracker.shut_down(), 1);
    assert_eq!(tracker.created(), 2);
    assert_eq!(pool.active_count(), 1);
}

#[tokio::test]
async fn test_fresh_idle_item_reused_before_stale_one() {
    let clock = ManualClock::new();
    let pool = ResourcePool::<Conn>::with_clock(
        PoolConfig::new()
            .with_active(3)
            .with_idle(3)
            .with_idle_timeout(Duration::from_millis(50)),
        clock.clone(),
    )
    .unwrap();
    let tracker = register(&pool);
    let ctx = Context::background();

    let older = pool.get(&ctx).await.unwrap();
    let newer = pool.get(&ctx).await.unwrap();
    pool.put(older, false).unwrap();
    clock.advance(Duration::from_millis(40));
    pool.put(newer, false).unwrap();
    clock.advance(Duration::from_millis(20));

    // the newest item is still fresh and comes first
    assert_eq!(pool.get(&ctx).await.unwrap().id, 1);
    assert_eq!(tracker.shut_down(), 0);
}

#[tokio::test]
async fn test_all_stale_idle_items_are_discarded() {
    let clock = ManualClock::new();
    let pool = ResourcePool::<Conn>::with_clock(
        PoolConfig::new()
            .with_active(3)
            .with_idle(3)
            .with_idle_timeout(Duration::from_millis(50)),
        clock.clone(),
    )
    .unwrap();
    let tracker = register(&pool);
    let ctx = Context::background();

    let a = pool.get(&ctx).await.unwrap();
    let b = pool.get(&ctx).await.unwrap();
    pool.put(a, false).unwrap();
    pool.put(b, false).unwrap();
    clock.advance(Duration::from_millis(60));

    let fresh = pool.get(&ctx).await.unwrap();
    assert_eq!(fresh.id, 2);
    assert_eq!(tracker.shut_down(), 2);
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn test_exhausted_without_wait_fails_immediately() {
    let (pool, _tracker) = pool(PoolConfig::new().with_active(1).with_idle(1));
    let ctx = Context::background();
    let _held = pool.get(&ctx).await.unwrap();

    let started = tokio::time::Instant::now();
    let result = pool.get(&ctx).await;
    assert!(matches!(result, Err(PoolError::Exhausted)));
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(pool.status().waiters, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout() {
    let (pool, _tracker) = pool(
        PoolConfig::new()
            .with_active(1)
            .with_idle(1)
            .with_wait_timeout(Duration::from_millis(20)),
    );
    let ctx = Context::background();
    let _held = pool.get(&ctx).await.unwrap();

    let started = tokio::time::Instant::now();
    let result = pool.get(&ctx).await;
    let waited = started.elapsed();

    assert!(matches!(result, Err(PoolError::WaitTimeout(t)) if t == Duration::from_millis(20)));
    assert!(waited >= Duration::from_millis(20));
    assert!(waited < Duration::from_millis(40));
    assert_eq!(pool.status().waiters, 0);
}

#[tokio::test(start_paused = true)]
async fn test_context_deadline_while_waiting() {
    let (pool, _tracker) = pool(PoolConfig::new().with_active(1).with_idle(1).with_wait(true));
    let _held = pool.get(&Context::background()).await.unwrap();

    let ctx = Context::background().with_timeout(Duration::from_millis(15));
    let result = pool.get(&ctx).await;
    assert!(matches!(result, Err(PoolError::DeadlineExceeded)));
    assert_eq!(pool.status().waiters, 0);
}

#[tokio::test]
async fn test_cancelled_waiter_never_receives_resource() {
    let (pool, _tracker) = pool(PoolConfig::new().with_active(1).with_idle(1).with_wait(true));
    let held = pool.get(&Context::background()).await.unwrap();

    let ctx = Context::background();
    let waiter = {
        let pool = pool.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { pool.get(&ctx).await })
    };
    until_waiters(&pool, 1).await;

    ctx.cancel();
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::Cancelled)));
    assert_eq!(pool.status().waiters, 0);

    pool.put(held, false).unwrap();
    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.active, 1);
}

#[tokio::test]
async fn test_shutdown_drains_idle() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(5).with_idle(5));
    let ctx = Context::background();

    let mut conns = Vec::new();
    for _ in 0..4 {
        conns.push(pool.get(&ctx).await.unwrap());
    }
    for conn in conns {
        pool.put(conn, false).unwrap();
    }

    pool.shutdown().unwrap();
    assert_eq!(tracker.shut_down(), 4);
    assert_eq!(pool.active_count(), 0);
    assert!(matches!(pool.get(&ctx).await, Err(PoolError::Closed)));

    // closing again is a no-op
    assert!(pool.shutdown().is_ok());
}

#[tokio::test]
async fn test_shutdown_attempts_every_idle_resource() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(3).with_idle(3));
    let ctx = Context::background();

    let conns = vec![
        pool.get(&ctx).await.unwrap(),
        pool.get(&ctx).await.unwrap(),
        pool.get(&ctx).await.unwrap(),
    ];
    for conn in conns {
        pool.put(conn, false).unwrap();
    }
    tracker.fail_shutdown.store(true, Ordering::SeqCst);

    match pool.shutdown() {
        Err(PoolError::ShutdownFailures(failures)) => assert_eq!(failures.len(), 3),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(tracker.shut_down(), 3);
    assert_eq!(pool.active_count(), 0);
}

#[tokio::test]
async fn test_shutdown_wakes_waiters() {
    let (pool, _tracker) = pool(PoolConfig::new().with_active(1).with_idle(1).with_wait(true));
    let held = pool.get(&Context::background()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get(&Context::background()).await })
    };
    until_waiters(&pool, 1).await;

    pool.shutdown().unwrap();
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));

    // checked-out resources are shut down when they come back
    pool.put(held, false).unwrap();
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_put_after_shutdown_reports_shutdown_error() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(1).with_idle(1));
    let held = pool.get(&Context::background()).await.unwrap();
    pool.shutdown().unwrap();
    tracker.fail_shutdown.store(true, Ordering::SeqCst);

    let result = pool.put(held, false);
    assert!(matches!(result, Err(PoolError::ResourceShutdown(_))));
    assert_eq!(pool.active_count(), 0);
}

#[tokio::test]
async fn test_factory_error_is_surfaced_and_slot_released() {
    #[derive(Debug)]
    struct DialError;

    impl std::fmt::Display for DialError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl std::error::Error for DialError {}

    let pool = ResourcePool::<Conn>::with_factory(
        PoolConfig::new().with_active(1).with_idle(1),
        |_ctx: Context| async { Err::<Conn, BoxError>(Box::new(DialError)) },
    )
    .unwrap();

    match pool.get(&Context::background()).await {
        Err(PoolError::Factory(err)) => assert!(err.downcast_ref::<DialError>().is_some()),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(pool.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_factory_respects_context_deadline() {
    let pool = ResourcePool::<Conn>::with_factory(
        PoolConfig::new().with_active(1).with_idle(1),
        |_ctx: Context| std::future::pending::<Result<Conn, BoxError>>(),
    )
    .unwrap();

    let ctx = Context::background().with_timeout(Duration::from_millis(30));
    let result = pool.get(&ctx).await;
    assert!(matches!(result, Err(PoolError::DeadlineExceeded)));
    assert_eq!(pool.active_count(), 0);
}

#[tokio::test]
async fn test_forced_close_hands_slot_to_waiter() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(1).with_idle(1).with_wait(true));
    let held = pool.get(&Context::background()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get(&Context::background()).await })
    };
    until_waiters(&pool, 1).await;

    pool.put(held, true).unwrap();
    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id, 1);
    assert_eq!(tracker.shut_down(), 1);
    assert_eq!(pool.active_count(), 1);
}

#[tokio::test]
async fn test_slot_handed_to_waiter_is_not_built_after_shutdown() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(1).with_idle(1).with_wait(true));
    let held = pool.get(&Context::background()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get(&Context::background()).await })
    };
    until_waiters(&pool, 1).await;

    // the freed slot goes to the waiter, which has not run yet
    pool.put(held, true).unwrap();
    pool.shutdown().unwrap();

    assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
    assert_eq!(tracker.created(), 1);
    assert_eq!(tracker.shut_down(), 1);
    assert_eq!(pool.active_count(), 0);
}

#[tokio::test]
async fn test_shutdown_during_factory_call_discards_resource() {
    let tracker = Arc::new(Tracker::default());
    let gate = Arc::new(tokio::sync::Notify::new());
    let pool = {
        let tracker = Arc::clone(&tracker);
        let gate = Arc::clone(&gate);
        ResourcePool::<Conn>::with_factory(
            PoolConfig::new().with_active(1).with_idle(1),
            move |_ctx: Context| {
                let tracker = Arc::clone(&tracker);
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    let id = tracker.created.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(Conn { id, tracker })
                }
            },
        )
        .unwrap()
    };

    let caller = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get(&Context::background()).await })
    };
    while pool.active_count() < 1 {
        tokio::task::yield_now().await;
    }

    pool.shutdown().unwrap();
    gate.notify_one();

    assert!(matches!(caller.await.unwrap(), Err(PoolError::Closed)));
    assert_eq!(tracker.created(), 1);
    assert_eq!(tracker.shut_down(), 1);
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_zero_idle_hands_off_or_shuts_down() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(1).with_idle(0).with_wait(true));
    let held = pool.get(&Context::background()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get(&Context::background()).await })
    };
    until_waiters(&pool, 1).await;

    pool.put(held, false).unwrap();
    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id, 0);
    assert_eq!(pool.idle_count(), 0);

    pool.put(conn, false).unwrap();
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.active_count(), 0);
    assert_eq!(tracker.shut_down(), 1);
}

#[tokio::test]
async fn test_reload_admits_waiters_under_raised_ceiling() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(1).with_idle(1).with_wait(true));
    let _held = pool.get(&Context::background()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get(&Context::background()).await })
    };
    until_waiters(&pool, 1).await;

    pool.reload(PoolConfig::new().with_active(2).with_idle(1).with_wait(true))
        .unwrap();
    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id, 1);
    assert_eq!(tracker.created(), 2);
    assert_eq!(pool.active_count(), 2);
}

#[tokio::test]
async fn test_unbounded_pool_never_blocks() {
    let (pool, tracker) = pool(PoolConfig::new().with_active(0).with_idle(1).with_wait(true));
    let ctx = Context::background();

    let mut conns = Vec::new();
    for _ in 0..10 {
        conns.push(pool.get(&ctx).await.unwrap());
    }
    assert_eq!(tracker.created(), 10);
    assert_eq!(pool.active_count(), 10);

    for conn in conns {
        pool.put(conn, false).unwrap();
    }
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.active_count(), 1);
}
