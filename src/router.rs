//! Radix-tree route source.
//!
//! A path pattern maps to a list of [`Route`] candidates. Which candidate
//! actually serves a request (method, content type, accept) is decided later
//! by the [dispatcher](crate::dispatch). The tree only answers "what is
//! declared for this path".

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;

/// One route candidate: a method, optional media-type constraints and the
/// handler that runs when it is selected.
pub struct Route {
    method: Method,
    consumes: Vec<String>,
    produces: Vec<String>,
    handler: BoxedHandler,
}

impl Route {
    pub fn new(method: Method, handler: impl Handler) -> Self {
        Self {
            method,
            consumes: Vec::new(),
            produces: Vec::new(),
            handler: handler.into_boxed_handler(),
        }
    }

    /// Request `Content-Type`s this route accepts. Empty means any.
    pub fn consumes<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.consumes = types.into_iter().map(|t| t.as_ref().to_ascii_lowercase()).collect();
        self
    }

    /// Media types this route can answer with, matched against `Accept`.
    /// Empty means any.
    pub fn produces<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.produces = types.into_iter().map(|t| t.as_ref().to_ascii_lowercase()).collect();
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn consumed(&self) -> &[String] { &self.consumes }
    pub fn produced(&self) -> &[String] { &self.produces }

    /// More declared constraints means a more specific route.
    pub(crate) fn specificity(&self) -> usize {
        self.consumes.len() + self.produces.len()
    }

    pub(crate) fn handler(&self) -> &BoxedHandler {
        &self.handler
    }
}

/// Candidates declared for a path, plus the captured path parameters.
pub struct RouteMatch {
    pub candidates: Vec<Arc<Route>>,
    pub params: HashMap<String, String>,
}

/// Anything that can list the route candidates for a path.
///
/// [`Router`] is the built-in implementation; an application with its own
/// routing metadata can plug in here instead.
pub trait RouteSource: Send + Sync + 'static {
    fn resolve(&self, path: &str) -> Option<RouteMatch>;
}

/// The application router.
///
/// Build it once at startup; hand it to [`App::new`](crate::App::new).
/// Registrations chain:
///
/// ```rust,no_run
/// # use sluice::{Method, Request, Response, Route, Router};
/// # async fn get_user(_: Request) -> Response { Response::text("") }
/// # async fn create_user(_: Request) -> Response { Response::text("") }
/// # async fn import_users(_: Request) -> Response { Response::text("") }
/// Router::new()
///     .on(Method::Get,  "/users/{id}", get_user)
///     .on(Method::Post, "/users",      create_user)
///     .route("/users", Route::new(Method::Post, import_users).consumes(["text/csv"]));
/// ```
pub struct Router {
    tree: MatchitRouter<usize>,
    patterns: HashMap<String, usize>,
    routes: Vec<Vec<Arc<Route>>>,
}

impl Router {
    pub fn new() -> Self {
        Self { tree: MatchitRouter::new(), patterns: HashMap::new(), routes: Vec::new() }
    }

    /// Register an unconstrained handler for a method + path pair.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.route(path, Route::new(method, handler))
    }

    /// Register a fully described candidate. Several candidates may share a
    /// path; they are kept in registration order.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern or conflicts with an existing one.
    pub fn route(mut self, path: &str, route: Route) -> Self {
        let slot = match self.patterns.get(path) {
            Some(&slot) => slot,
            None => {
                let slot = self.routes.len();
                self.tree
                    .insert(path, slot)
                    .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
                self.patterns.insert(path.to_owned(), slot);
                self.routes.push(Vec::new());
                slot
            }
        };
        self.routes[slot].push(Arc::new(route));
        self
    }
}

impl RouteSource for Router {
    fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let matched = self.tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(RouteMatch { candidates: self.routes[*matched.value].clone(), params })
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};

    async fn noop(_: Request) -> Response { Response::text("") }

    #[test]
    fn candidates_share_a_pattern() {
        let router = Router::new()
            .on(Method::Get, "/items/{id}", noop)
            .on(Method::Delete, "/items/{id}", noop)
            .on(Method::Get, "/items", noop);

        let found = router.resolve("/items/7").unwrap();
        assert_eq!(found.candidates.len(), 2);
        assert_eq!(found.candidates[1].method(), Method::Delete);
        assert_eq!(found.params.get("id").map(String::as_str), Some("7"));

        assert_eq!(router.resolve("/items").unwrap().candidates.len(), 1);
        assert!(router.resolve("/nope").is_none());
    }

    #[test]
    fn constraints_are_normalized() {
        let route = Route::new(Method::Post, noop)
            .consumes(["Application/JSON"])
            .produces(["text/html", "application/json"]);
        assert_eq!(route.consumed(), ["application/json"]);
        assert_eq!(route.specificity(), 3);
    }
}
