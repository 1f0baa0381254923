//! Basic usage examples for ResourcePool

use shutdown_pool::{BoxError, Context, PoolConfig, PoolError, ResourcePool, Shutdown};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Stand-in for a network connection
struct Connection {
    id: usize,
}

impl Shutdown for Connection {
    fn shutdown(self) -> Result<(), BoxError> {
        println!("   Closing connection {}", self.id);
        Ok(())
    }
}

fn connection_pool(config: PoolConfig) -> ResourcePool<Connection> {
    let next_id = Arc::new(AtomicUsize::new(0));
    ResourcePool::<Connection>::with_factory(config, move |ctx: Context| {
        let next_id = Arc::clone(&next_id);
        async move {
            // pretend to dial
            ctx.run(sleep(Duration::from_millis(5))).await?;
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            println!("   Opened connection {id}");
            Ok::<_, BoxError>(Connection { id })
        }
    })
    .expect("valid configuration")
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== shutdown_pool - Basic Examples ===\n");

    // Example 1: Reuse
    reuse().await?;

    // Example 2: Fail fast on exhaustion
    fail_fast().await?;

    // Example 3: Wait for a returned connection
    wait_for_return().await?;

    // Example 4: Shutdown
    shutdown().await?;

    Ok(())
}

async fn reuse() -> Result<(), BoxError> {
    println!("1. Reuse:");
    let pool = connection_pool(PoolConfig::new().with_active(4).with_idle(2));
    let ctx = Context::background();

    {
        let conn = pool.get_guarded(&ctx).await?;
        println!("   Using connection {}", conn.id);
        // Connection automatically returned when dropped
    }
    let conn = pool.get(&ctx).await?;
    println!("   Reused connection {}", conn.id);
    pool.put(conn, false)?;

    println!("   Status: {:?}\n", pool.status());
    Ok(())
}

async fn fail_fast() -> Result<(), BoxError> {
    println!("2. Fail Fast:");
    let pool = connection_pool(PoolConfig::new().with_active(1).with_idle(1));
    let ctx = Context::background();

    let held = pool.get(&ctx).await?;
    match pool.get(&ctx).await {
        Err(PoolError::Exhausted) => println!("   Second get failed: pool exhausted"),
        other => println!("   Unexpected: {:?}", other.map(|conn| conn.id)),
    }
    pool.put(held, false)?;
    println!();
    Ok(())
}

async fn wait_for_return() -> Result<(), BoxError> {
    println!("3. Wait For Return:");
    let pool = connection_pool(
        PoolConfig::new()
            .with_active(1)
            .with_idle(1)
            .with_wait_timeout(Duration::from_millis(500)),
    );
    let ctx = Context::background();
    let held = pool.get(&ctx).await?;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let conn = pool.get(&Context::background()).await?;
            println!("   Waiter received connection {}", conn.id);
            pool.put(conn, false)?;
            Ok::<_, PoolError>(())
        })
    };

    sleep(Duration::from_millis(50)).await;
    println!("   Returning connection {}", held.id);
    pool.put(held, false)?;
    waiter.await??;
    println!();
    Ok(())
}

async fn shutdown() -> Result<(), BoxError> {
    println!("4. Shutdown:");
    let pool = connection_pool(PoolConfig::new().with_active(3).with_idle(3));
    let ctx = Context::background();

    let a = pool.get(&ctx).await?;
    let b = pool.get(&ctx).await?;
    let c = pool.get(&ctx).await?;
    pool.put(a, false)?;
    pool.put(b, false)?;

    pool.shutdown()?;
    println!("   Pool closed, returning the last checked-out connection");
    pool.put(c, false)?;

    match pool.get(&ctx).await {
        Err(err) => println!("   Get after shutdown: {err}"),
        Ok(conn) => println!("   Unexpected connection {}", conn.id),
    }
    Ok(())
}
