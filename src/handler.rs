//! Route handlers and how they are stored.
//!
//! One path may carry several candidates with unrelated handler types, so
//! each handler is wrapped once at registration and kept as a trait object:
//!
//! ```text
//! Route::new(Method::Post, create)      create: async fn(Request) -> impl HandlerOutput
//!        │  Handler::into_boxed_handler
//!        ▼
//! Arc<FnHandler<create>>               stored in the route as BoxedHandler
//!        │  ErasedHandler::call, per dispatched request
//!        ▼
//! BoxFuture<Result<Response, Error>>   awaited by the dispatcher
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{HandlerOutput, Response};

/// A boxed future, `Send` so it can cross tokio worker threads.
///
/// Filters, handlers, stores and topic responders all return one, which
/// lets their implementors live behind `Arc<dyn …>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe form of a handler, used by the dispatcher.
///
/// Public only because [`Handler::into_boxed_handler`] names it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>>;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Any `async fn(Request) -> impl HandlerOutput`, or a closure returning
/// such a future.
///
/// Sealed: the blanket impl over `Fn(Request) -> Fut` is the only one.
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut, R> sealed::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerOutput + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerOutput + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerOutput + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>> {
        let pending = (self.0)(req);
        Box::pin(async move { pending.await.into_output() })
    }
}
