//! # sluice
//!
//! A request pipeline for HTTP services on hyper.
//!
//! Every request flows through the same stages:
//!
//! ```text
//! connection ─▶ Context ─▶ filters (before) ─▶ route dispatch ─▶ filters (after, reversed)
//! ```
//!
//! - [`Context`]: one request/response exchange. The body is read lazily
//!   and at most once.
//! - [`middleware`]: the filter chain. Any filter may short-circuit, and
//!   every filter that ran is unwound in reverse. Ships with a cache-aside
//!   filter and a cookie session filter.
//! - [`Router`]: several candidates per path, picked by method,
//!   `Content-Type` and `Accept`. `OPTIONS` is answered from the
//!   declarations.
//! - [`topic`]: RPC calls with binary attachments in a single multipart
//!   body, served by a filter ahead of the router.
//! - [`multipart`]: the `multipart/form-data` parser and writer both of
//!   the above build on.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sluice::config::Config;
//! use sluice::topic::{IntentRegistry, TopicFilter, Value};
//! use sluice::{App, Error, Json, Method, Request, Route, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = Config::from_toml("")?;
//!
//!     let routes = Router::new()
//!         .on(Method::Get, "/users/{id}", get_user)
//!         .route("/users/{id}", Route::new(Method::Get, get_user_json).produces(["application/json"]));
//!
//!     let intents = IntentRegistry::new().subscribe("echo", echo);
//!     let app = App::new(routes)
//!         .filter(TopicFilter::new(config.topic.clone()).intents(Arc::new(intents)));
//!
//!     Server::from_config(&config.server).serve(app).await
//! }
//!
//! async fn get_user(req: Request) -> String {
//!     format!("user {}", req.param("id").unwrap_or("?"))
//! }
//!
//! async fn get_user_json(req: Request) -> Json<serde_json::Value> {
//!     Json(serde_json::json!({ "id": req.param("id") }))
//! }
//!
//! async fn echo(body: Value, _: Request) -> Result<Value, Error> {
//!     Ok(body)
//! }
//! ```

mod app;
mod carrier;
mod context;
mod dispatch;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;

pub mod config;
pub mod middleware;
pub mod multipart;
pub mod topic;

pub use app::{Advice, App};
pub use carrier::Carrier;
pub use config::Config;
pub use context::Context;
pub use dispatch::NoRoutePolicy;
pub use error::{Error, HttpError};
pub use handler::{BoxFuture, Handler};
pub use method::Method;
pub use request::Request;
pub use response::{ContentType, HandlerOutput, IntoResponse, Json, Response, ResponseBuilder};
pub use router::{Route, RouteMatch, RouteSource, Router};
pub use server::Server;
pub use status::Status;
