//! Immutable request snapshot handed to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::middleware::session::Session;
use crate::multipart::{Form, MultipartError};

/// An incoming HTTP request as seen by a handler.
///
/// Built from the [`Context`](crate::Context) once the body has been read, so
/// everything here is plain data and cheap to clone.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: Arc<Vec<(String, String)>>,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) session: Option<Session>,
}

impl Request {
    pub fn method(&self) -> &str { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn session(&self) -> Option<&Session> { self.session.as_ref() }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Decodes a `multipart/form-data` body.
    pub fn form(&self) -> Result<Form, MultipartError> {
        let content_type = self.header("content-type").unwrap_or_default();
        Form::parse(content_type, &self.body)
    }

    pub(crate) fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}
