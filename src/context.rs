//! One request/response exchange.
//!
//! The [`Context`] is what filters see. It holds the request facts (method,
//! path, headers, a body that is read at most once) and the response being
//! built (status, headers, body). Whatever sits in the response fields when
//! the pipeline finishes is what goes on the wire.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use parking_lot::Mutex;

use crate::error::Error;
use crate::middleware::session::Session;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks run once when the underlying connection goes away.
///
/// Shared by every request served on one connection.
#[derive(Clone, Default)]
pub(crate) struct CloseHooks(Arc<Mutex<Vec<CloseHook>>>);

impl CloseHooks {
    fn push(&self, hook: CloseHook) {
        self.0.lock().push(hook);
    }

    pub(crate) fn run(&self) {
        let hooks = std::mem::take(&mut *self.0.lock());
        for hook in hooks {
            hook();
        }
    }
}

enum Body {
    Unread(Incoming),
    Ready(Bytes),
    /// Reading failed; the message of the original error.
    Failed(String),
}

/// Per-request mutable state: request facts plus the response in progress.
pub struct Context {
    method: String,
    path: String,
    query: Option<String>,
    headers: Arc<Vec<(String, String)>>,
    body: Body,
    peer: Option<SocketAddr>,
    session: Option<Session>,

    status: u16,
    response_headers: Vec<(String, String)>,
    response_body: Option<Bytes>,

    close_hooks: CloseHooks,
}

impl Context {
    /// A context with an empty, already-read body. `target` may carry a
    /// query string.
    ///
    /// ```rust
    /// use sluice::Context;
    ///
    /// let cx = Context::new("POST", "/users?page=2")
    ///     .with_header("content-type", "application/json")
    ///     .with_body(r#"{"name":"ada"}"#);
    /// assert_eq!(cx.path(), "/users");
    /// assert_eq!(cx.query(), Some("page=2"));
    /// ```
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        Self {
            method: method.into(),
            path,
            query,
            headers: Arc::new(Vec::new()),
            body: Body::Ready(Bytes::new()),
            peer: None,
            session: None,
            status: Status::Ok.into(),
            response_headers: Vec::new(),
            response_body: None,
            close_hooks: CloseHooks::default(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        Arc::make_mut(&mut self.headers).push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Ready(body.into());
        self
    }

    pub(crate) fn from_hyper(
        req: hyper::Request<Incoming>,
        peer: SocketAddr,
        close_hooks: CloseHooks,
    ) -> Self {
        let (parts, body) = req.into_parts();
        let headers = parts.headers.iter()
            .map(|(k, v)| (k.as_str().to_owned(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        Self {
            method: parts.method.as_str().to_owned(),
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(str::to_owned),
            headers: Arc::new(headers),
            body: Body::Unread(body),
            peer: Some(peer),
            session: None,
            status: Status::Ok.into(),
            response_headers: Vec::new(),
            response_body: None,
            close_hooks,
        }
    }

    // ── Request side ──────────────────────────────────────────────────────────

    pub fn method(&self) -> &str { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn peer(&self) -> Option<SocketAddr> { self.peer }

    /// Case-insensitive request header lookup (first occurrence).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated request header.
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers.iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The raw request body. Read from the connection on first call and
    /// cached; later calls return the same bytes, or fail again if the read
    /// failed.
    pub async fn body(&mut self) -> Result<Bytes, Error> {
        let read = match &mut self.body {
            Body::Ready(bytes) => return Ok(bytes.clone()),
            Body::Failed(reason) => {
                return Err(Error::Io(std::io::Error::other(format!("request body unreadable: {reason}"))));
            }
            Body::Unread(incoming) => incoming.collect().await,
        };
        match read {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                self.body = Body::Ready(bytes.clone());
                Ok(bytes)
            }
            Err(e) => {
                self.body = Body::Failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Reads the body and returns a snapshot for handlers.
    pub async fn request(&mut self) -> Result<Request, Error> {
        let body = self.body().await?;
        Ok(Request {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            headers: Arc::clone(&self.headers),
            body,
            params: HashMap::new(),
            session: self.session.clone(),
        })
    }

    pub fn session(&self) -> Option<&Session> { self.session.as_ref() }

    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Registers `hook` to run when the connection closes, whether or not
    /// the response made it out.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        self.close_hooks.push(Box::new(hook));
    }

    // ── Response side ─────────────────────────────────────────────────────────

    pub fn status(&self) -> u16 { self.status }

    pub fn set_status(&mut self, status: impl Into<u16>) {
        self.status = status.into();
    }

    pub fn response_headers(&self) -> &[(String, String)] { &self.response_headers }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every response header called `name` with a single value.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.response_headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.response_headers.push((name.to_owned(), value.to_owned()));
    }

    /// Adds a response header, keeping earlier values (e.g. `set-cookie`).
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.response_headers.push((name.to_owned(), value.to_owned()));
    }

    pub fn response_body(&self) -> Option<&Bytes> { self.response_body.as_ref() }

    /// Sets the response body. The last write before send wins.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.response_body = Some(body.into());
    }

    /// Writes a complete [`Response`]: its status, its headers (replacing
    /// same-named ones already set, except `set-cookie`) and its body.
    pub fn respond(&mut self, response: Response) {
        self.status = response.status;
        for (name, value) in response.headers {
            if name.eq_ignore_ascii_case("set-cookie") {
                self.append_header(&name, &value);
            } else {
                self.set_header(&name, &value);
            }
        }
        self.response_body = Some(Bytes::from(response.body));
    }

    pub(crate) fn into_http(self) -> http::Response<http_body_util::Full<Bytes>> {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in &self.response_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let body = http_body_util::Full::new(self.response_body.unwrap_or_default());
        builder.body(body).unwrap_or_else(|e| {
            tracing::error!("invalid response head: {e}");
            let mut fallback = http::Response::new(http_body_util::Full::new(Bytes::new()));
            *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
