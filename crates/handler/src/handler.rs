use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use futures::FutureExt;

/// Future returned by [`Handler::perform`]. The error is the text recorded as
/// the job's `last_error`.
pub type PerformFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// The executable behavior behind one job payload.
///
/// Handlers are built per job by a factory registered in a
/// [`HandlerRegistry`](crate::HandlerRegistry) and are not required to be
/// reentrant: a worker never calls `perform` twice concurrently on the same
/// instance.
pub trait Handler: Send + Sync {
    fn perform(&self) -> PerformFuture<'_>;
}

pub type BoxedHandler = Box<dyn Handler>;

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

impl<F, Fut, E> Handler for FnHandler<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    fn perform(&self) -> PerformFuture<'_> {
        let fut = (self.0)();
        async move { fut.await.map_err(|e| e.to_string()) }.boxed()
    }
}

/// Boxes an async closure as a handler.
///
/// ```
/// use delayed_worker_handler::handler_fn;
///
/// let handler = handler_fn(|| async { Err::<(), _>("boom") });
/// ```
pub fn handler_fn<F, Fut, E>(f: F) -> BoxedHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + 'static,
{
    Box::new(FnHandler(f))
}
