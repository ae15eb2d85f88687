//! Content-negotiated route dispatch.
//!
//! Given the candidates declared for a path, pick the one that serves this
//! request:
//!
//! 1. keep candidates whose method matches (case-insensitive);
//!    an `OPTIONS` request instead gets `Allow` with every declared method;
//! 2. keep candidates whose `consumes` meets the request `Content-Type` and
//!    whose `produces` meets `Accept` (no declaration matches anything);
//! 3. the candidate with the most declarations wins, registration order
//!    breaks ties.

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::response::Response;
use crate::router::{Route, RouteMatch, RouteSource};
use crate::status::Status;

/// Produces the error to raise when nothing serves a request.
pub type NoRoutePolicy = Arc<dyn Fn(&Context) -> Error + Send + Sync + 'static>;

pub(crate) struct Dispatcher {
    routes: Arc<dyn RouteSource>,
    no_route: Option<NoRoutePolicy>,
}

impl Dispatcher {
    pub(crate) fn new(routes: Arc<dyn RouteSource>) -> Self {
        Self { routes, no_route: None }
    }

    pub(crate) fn set_no_route(&mut self, policy: NoRoutePolicy) {
        self.no_route = Some(policy);
    }

    pub(crate) async fn dispatch(&self, cx: &mut Context) -> Result<(), Error> {
        let Some(RouteMatch { candidates, params }) = self.routes.resolve(cx.path()) else {
            return self.no_route(cx);
        };

        if cx.method().eq_ignore_ascii_case("OPTIONS") {
            let allow = allow_header(&candidates);
            if !allow.is_empty() {
                debug!(path = cx.path(), %allow, "answering OPTIONS");
                cx.set_status(Status::Ok);
                cx.set_header("allow", &allow);
                return Ok(());
            }
        }

        let Some(route) = select(cx, candidates) else {
            return self.no_route(cx);
        };

        let req = cx.request().await?.with_params(params);
        let response = route.handler().call(req).await?;
        cx.respond(response);
        Ok(())
    }

    fn no_route(&self, cx: &mut Context) -> Result<(), Error> {
        debug!(method = cx.method(), path = cx.path(), "no route");
        match &self.no_route {
            Some(policy) => Err(policy(cx)),
            None => {
                cx.respond(Response::status(Status::NotFound));
                Ok(())
            }
        }
    }
}

/// Picks the most specific candidate acceptable for this request.
pub(crate) fn select(cx: &Context, candidates: Vec<Arc<Route>>) -> Option<Arc<Route>> {
    let content_type = cx.header("content-type").map(media_type);
    let accept: Vec<String> = match cx.header("accept") {
        Some(accept) => accept.split(',').map(media_type).filter(|t| !t.is_empty()).collect(),
        None => vec!["*/*".to_owned()],
    };

    let mut viable: Vec<Arc<Route>> = candidates.into_iter()
        .filter(|route| route.method().matches(cx.method()))
        .filter(|route| {
            route.consumed().is_empty()
                || content_type.as_deref().is_some_and(|ct| route.consumed().iter().any(|d| media_matches(d, ct)))
        })
        .filter(|route| {
            route.produced().is_empty()
                || route.produced().iter().any(|d| accept.iter().any(|a| media_matches(d, a)))
        })
        .collect();

    viable.sort_by_key(|route| Reverse(route.specificity()));
    viable.into_iter().next()
}

fn allow_header(candidates: &[Arc<Route>]) -> String {
    let mut methods: Vec<&str> = Vec::new();
    for route in candidates {
        let name = route.method().as_str();
        if !methods.contains(&name) {
            methods.push(name);
        }
    }
    methods.join(", ")
}

/// `type/subtype` without parameters, lowercased.
fn media_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Exact match, or a `*/*` / `type/*` wildcard on either side.
fn media_matches(a: &str, b: &str) -> bool {
    if a == b || a == "*/*" || b == "*/*" {
        return true;
    }
    let major = |t: &str| t.split('/').next().unwrap_or_default().to_owned();
    match (a.strip_suffix("/*"), b.strip_suffix("/*")) {
        (Some(prefix), _) => major(b) == prefix,
        (_, Some(prefix)) => major(a) == prefix,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::method::Method;
    use crate::request::Request;
    use crate::router::Router;

    async fn plain(_: Request) -> Response { Response::text("plain") }
    async fn json(_: Request) -> Response { Response::text("json") }
    async fn html(_: Request) -> Response { Response::text("html") }
    async fn echo_id(req: Request) -> Response { Response::text(req.param("id").unwrap_or("?").to_owned()) }
    async fn fails(_: Request) -> Result<Response, HttpError> {
        Err(HttpError::new(Status::Conflict, "taken"))
    }

    fn dispatcher(router: Router) -> Dispatcher {
        Dispatcher::new(Arc::new(router))
    }

    fn body_of(cx: &Context) -> &str {
        cx.response_body().map(|b| std::str::from_utf8(b).unwrap()).unwrap_or_default()
    }

    #[tokio::test]
    async fn more_specific_candidate_wins() {
        let d = dispatcher(
            Router::new()
                .on(Method::Post, "/x", plain)
                .route("/x", Route::new(Method::Post, json).consumes(["application/json"])),
        );

        let mut cx = Context::new("POST", "/x").with_header("Content-Type", "application/json; charset=utf-8");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(body_of(&cx), "json");

        let mut cx = Context::new("POST", "/x").with_header("Content-Type", "text/plain");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(body_of(&cx), "plain");
    }

    #[tokio::test]
    async fn method_match_ignores_case() {
        let d = dispatcher(Router::new().on(Method::Post, "/x", plain));
        let mut cx = Context::new("post", "/x");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(cx.status(), 200);
        assert_eq!(body_of(&cx), "plain");
    }

    #[tokio::test]
    async fn accept_negotiation() {
        let d = dispatcher(
            Router::new()
                .route("/page", Route::new(Method::Get, json).produces(["application/json"]))
                .route("/page", Route::new(Method::Get, html).produces(["text/html"])),
        );

        let mut cx = Context::new("GET", "/page").with_header("accept", "text/html, application/xhtml+xml;q=0.9");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(body_of(&cx), "html");

        let mut cx = Context::new("GET", "/page").with_header("accept", "application/*");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(body_of(&cx), "json");

        let mut cx = Context::new("GET", "/page").with_header("accept", "image/png");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(cx.status(), 404);
    }

    #[tokio::test]
    async fn options_lists_declared_methods() {
        let d = dispatcher(
            Router::new()
                .on(Method::Get, "/x", plain)
                .on(Method::Put, "/x", plain)
                .route("/x", Route::new(Method::Get, json).produces(["application/json"])),
        );
        let mut cx = Context::new("OPTIONS", "/x");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(cx.status(), 200);
        assert_eq!(cx.response_header("allow"), Some("GET, PUT"));
        assert!(cx.response_body().is_none());
    }

    #[tokio::test]
    async fn path_params_reach_handler() {
        let d = dispatcher(Router::new().on(Method::Get, "/users/{id}", echo_id));
        let mut cx = Context::new("GET", "/users/42");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(body_of(&cx), "42");
    }

    #[tokio::test]
    async fn no_route_defaults_to_404_or_uses_policy() {
        let mut d = dispatcher(Router::new().on(Method::Get, "/x", plain));
        let mut cx = Context::new("DELETE", "/x");
        d.dispatch(&mut cx).await.unwrap();
        assert_eq!(cx.status(), 404);

        d.set_no_route(Arc::new(|cx: &Context| {
            Error::from(HttpError::new(Status::MethodNotAllowed, format!("{} not served", cx.path())))
        }));
        let mut cx = Context::new("GET", "/missing");
        let err = d.dispatch(&mut cx).await.unwrap_err();
        assert_eq!(err.status(), 405);
        assert_eq!(err.to_string(), "405: /missing not served");
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let d = dispatcher(Router::new().on(Method::Get, "/x", fails));
        let mut cx = Context::new("GET", "/x");
        assert_eq!(d.dispatch(&mut cx).await.unwrap_err().status(), 409);
    }

    #[test]
    fn wildcards() {
        assert!(media_matches("text/html", "text/*"));
        assert!(media_matches("*/*", "image/png"));
        assert!(!media_matches("text/html", "application/json"));
        assert!(!media_matches("text/html", "textual/*"));
    }
}
