//! The request pipeline: filters around a route dispatcher.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::carrier::Carrier;
use crate::context::Context;
use crate::dispatch::{Dispatcher, NoRoutePolicy};
use crate::error::Error;
use crate::middleware::{Filter, FilterChain};
use crate::response::Response;
use crate::router::RouteSource;

/// Turns an error that escaped the pipeline into a response. The response
/// status is always overwritten with [`Error::status`].
pub type Advice = Arc<dyn Fn(&Error, &Context) -> Response + Send + Sync + 'static>;

/// Everything a server needs to answer requests.
///
/// ```rust
/// use sluice::{App, Method, Request, Router};
/// use sluice::middleware::session::{MemorySessionStore, SessionFilter};
/// use std::sync::Arc;
///
/// async fn hello(_: Request) -> &'static str { "hello" }
///
/// let app = App::new(Router::new().on(Method::Get, "/", hello))
///     .filter(SessionFilter::new(Arc::new(MemorySessionStore::new()), Default::default()));
/// ```
pub struct App {
    filters: FilterChain,
    dispatcher: Dispatcher,
    advice: Option<Advice>,
}

impl App {
    pub fn new(routes: impl RouteSource) -> Self {
        Self::from_source(Arc::new(routes))
    }

    pub fn from_source(routes: Arc<dyn RouteSource>) -> Self {
        Self {
            filters: FilterChain::new(),
            dispatcher: Dispatcher::new(routes),
            advice: None,
        }
    }

    /// Appends a filter. Filters run in the order they are added.
    pub fn filter(mut self, filter: impl Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_shared(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push_shared(filter);
        self
    }

    /// Raise the returned error instead of answering 404 when no route
    /// serves a request.
    pub fn no_route(mut self, policy: impl Fn(&Context) -> Error + Send + Sync + 'static) -> Self {
        let policy: NoRoutePolicy = Arc::new(policy);
        self.dispatcher.set_no_route(policy);
        self
    }

    /// Answer pipeline errors with `advice` instead of closing the
    /// connection.
    pub fn advice(mut self, advice: impl Fn(&Error, &Context) -> Response + Send + Sync + 'static) -> Self {
        self.advice = Some(Arc::new(advice));
        self
    }

    /// Runs one request through the pipeline, leaving the response in `cx`.
    ///
    /// An `Err` means no response could be produced and the connection
    /// should be closed.
    pub async fn handle(&self, cx: &mut Context) -> Result<(), Error> {
        let err = match self.run(cx).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let status = err.status();
        let Some(advice) = &self.advice else {
            return Err(err);
        };
        warn!(method = cx.method(), path = cx.path(), status, "request failed: {err}");
        let response = advice(&err, cx);
        cx.respond(response);
        cx.set_status(status);
        Ok(())
    }

    async fn run(&self, cx: &mut Context) -> Result<(), Error> {
        let mut carrier = Carrier::new();
        let unwind = self.filters.run_before(cx, &mut carrier).await?;
        if unwind.proceed() {
            self.dispatcher.dispatch(cx).await?;
        } else {
            debug!(path = cx.path(), "short-circuited before dispatch");
        }
        unwind.run(cx, &mut carrier).await
    }
}
