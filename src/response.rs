//! What handlers hand back.
//!
//! A handler returns a [`Response`] or anything convertible into one. A
//! `Result` lets it fail; the error skips the rest of the pipeline and is
//! handled at the top.

use serde::Serialize;

use crate::error::Error;
use crate::status::Status;

const CONTENT_TYPE: &str = "content-type";

/// Content types with a shortcut on [`ResponseBuilder::bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    Json,
    OctetStream,
    Text,
    Xml,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text => "text/plain; charset=utf-8",
            Self::Xml => "application/xml",
        }
    }
}

/// A complete response: status, headers in order, body bytes.
///
/// ```rust
/// use sluice::{ContentType, Response, Status};
///
/// let ok = Response::text("hello");
/// assert_eq!(ok.status_code(), 200);
///
/// let created = Response::builder()
///     .status(Status::Created)
///     .header("location", "/users/42")
///     .bytes(ContentType::Xml, b"<ok/>".to_vec());
/// assert_eq!(created.headers()[0].1, "application/xml");
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl Response {
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().bytes(ContentType::Json, body)
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Just a status line, no headers, no body.
    pub fn status(code: impl Into<u16>) -> Self {
        Self::builder().status(code).no_body()
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: Status::Ok.into(), headers: Vec::new() }
    }

    pub fn status_code(&self) -> u16 { self.status }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
}

/// Collects status and headers; a body method finishes the response.
///
/// The body methods put `content-type` ahead of the headers added here.
pub struct ResponseBuilder {
    status: u16,
    headers: Vec<(String, String)>,
}

impl ResponseBuilder {
    pub fn status(mut self, code: impl Into<u16>) -> Self {
        self.status = code.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn json(self, body: Vec<u8>) -> Response {
        self.bytes(ContentType::Json, body)
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.bytes(ContentType::Text, body.into().into_bytes())
    }

    pub fn bytes(self, content_type: ContentType, body: Vec<u8>) -> Response {
        self.typed(content_type.as_str(), body)
    }

    /// Any content type, e.g. `multipart/mixed; boundary=…`.
    pub fn typed(self, content_type: &str, body: Vec<u8>) -> Response {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        headers.push((CONTENT_TYPE.to_owned(), content_type.to_owned()));
        headers.extend(self.headers);
        Response { status: self.status, headers, body }
    }

    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Vec::new() }
    }
}

/// Conversion that cannot fail.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for Status {
    fn into_response(self) -> Response { Response::status(self) }
}

/// A serde value sent as `application/json`.
///
/// ```rust,ignore
/// async fn get_user(_req: Request) -> Json<User> {
///     Json(User { id: 1, name: "alice".into() })
/// }
/// ```
pub struct Json<T>(pub T);

/// What a route handler may return.
///
/// Every [`IntoResponse`] type, [`Json`] (a serialization failure becomes
/// [`Error::Json`]) and `Result<T, E>` where `E` converts into [`Error`].
pub trait HandlerOutput {
    fn into_output(self) -> Result<Response, Error>;
}

macro_rules! infallible_output {
    ($($ty:ty),* $(,)?) => {
        $(impl HandlerOutput for $ty {
            fn into_output(self) -> Result<Response, Error> { Ok(self.into_response()) }
        })*
    };
}

infallible_output!(Response, &'static str, String, Status);

impl<T: Serialize> HandlerOutput for Json<T> {
    fn into_output(self) -> Result<Response, Error> {
        Ok(Response::json(serde_json::to_vec(&self.0)?))
    }
}

impl<T, E> HandlerOutput for Result<T, E>
where
    T: HandlerOutput,
    E: Into<Error>,
{
    fn into_output(self) -> Result<Response, Error> {
        self.map_err(Into::into)?.into_output()
    }
}
