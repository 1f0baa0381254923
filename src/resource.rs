//! Collaborator seams: the pooled resource and the factory producing it

use crate::context::Context;
use crate::errors::BoxError;
use async_trait::async_trait;
use std::future::Future;

/// A resource the pool can release explicitly, e.g. a network connection.
///
/// The pool never looks inside a resource. It only decides when to create one
/// and when to shut one down.
pub trait Shutdown: Send + 'static {
    /// Release the underlying assets.
    fn shutdown(self) -> Result<(), BoxError>;
}

/// Produces new resources on demand.
///
/// The context is the caller's own, so construction observes the caller's
/// cancellation and deadline. Any closure of the shape
/// `Fn(Context) -> impl Future<Output = Result<R, BoxError>>` is a factory.
///
/// # Examples
///
/// ```
/// use shutdown_pool::{BoxError, Context, Factory};
///
/// # async fn demo() -> Result<(), BoxError> {
/// let factory = |_ctx: Context| async { Ok::<_, BoxError>(String::from("conn")) };
/// let conn: String = factory.create(Context::background()).await?;
/// assert_eq!(conn, "conn");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Factory<R>: Send + Sync + 'static {
    async fn create(&self, ctx: Context) -> Result<R, BoxError>;
}

#[async_trait]
impl<R, F, Fut> Factory<R> for F
where
    R: Send + 'static,
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    async fn create(&self, ctx: Context) -> Result<R, BoxError> {
        self(ctx).await
    }
}
