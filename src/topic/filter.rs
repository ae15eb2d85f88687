use std::sync::Arc;

use tracing::{debug, warn};

use crate::carrier::Carrier;
use crate::config::TopicConfig;
use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::Filter;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;
use crate::topic::bus::{IntentBus, RouterModules};
use crate::topic::envelope::{TopicKind, TopicRequest, TopicResponse};
use crate::topic::value::Value;

/// Serves topic calls in place of the route dispatcher.
///
/// A request is a topic call when the marker header carries the marker value
/// (case-insensitive) and the body is `multipart/form-data`. Such a request
/// is decoded, dispatched to the intent bus or a router module, and answered
/// with an envelope; the filter then stops the chain. Failures never escape:
/// they become `state: "error"` envelopes with status 404 (nobody serves the
/// target) or 400 (anything else).
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sluice::config::TopicConfig;
/// use sluice::topic::{IntentRegistry, TopicFilter, Value};
/// use sluice::{Error, Request};
///
/// async fn echo(body: Value, _: Request) -> Result<Value, Error> {
///     Ok(body)
/// }
///
/// let filter = TopicFilter::new(TopicConfig::default())
///     .intents(Arc::new(IntentRegistry::new().subscribe("echo", echo)));
/// ```
pub struct TopicFilter {
    config: TopicConfig,
    intents: Option<Arc<dyn IntentBus>>,
    modules: Option<Arc<dyn RouterModules>>,
}

impl TopicFilter {
    pub fn new(config: TopicConfig) -> Self {
        Self { config, intents: None, modules: None }
    }

    pub fn intents(mut self, bus: Arc<dyn IntentBus>) -> Self {
        self.intents = Some(bus);
        self
    }

    pub fn modules(mut self, modules: Arc<dyn RouterModules>) -> Self {
        self.modules = Some(modules);
        self
    }

    /// True if `cx` is a topic call.
    pub fn detects(&self, cx: &Context) -> bool {
        let marked = cx.header(&self.config.marker_header)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(&self.config.marker_value));
        let multipart = cx.header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("multipart/form-data"));
        marked && multipart
    }

    async fn serve(&self, cx: &mut Context) -> (u16, TopicResponse) {
        let req = match cx.request().await {
            Ok(req) => req,
            Err(e) => return failure(String::new(), None, e),
        };
        let content_type = req.header("content-type").unwrap_or_default().to_owned();
        let call = match TopicRequest::decode(req.body(), &content_type) {
            Ok(call) => call,
            Err(e) => return failure(String::new(), None, e),
        };

        let TopicRequest { kind, target, request_uuid, body } = call;
        debug!(?kind, topic = %target, "topic call");
        match self.dispatch(kind, &target, body, req).await {
            Ok(answer) => (Status::Ok.into(), TopicResponse::success(target, request_uuid, answer)),
            Err(e) => failure(target, request_uuid, e),
        }
    }

    async fn dispatch(&self, kind: TopicKind, target: &str, body: Value, req: Request) -> Result<Value, Error> {
        let not_found = || Error::DispatchNotFound(target.to_owned());
        match kind {
            TopicKind::Router => {
                let handler = self.modules.as_ref()
                    .and_then(|modules| modules.resolve(target))
                    .ok_or_else(not_found)?;
                handler.call(body, req).await
            }
            TopicKind::Intent => {
                let bus = self.intents.as_ref().ok_or_else(not_found)?;
                bus.publish(target, body, req).await?.ok_or_else(not_found)
            }
        }
    }
}

fn failure(target: String, request_uuid: Option<String>, err: Error) -> (u16, TopicResponse) {
    let status = match err {
        Error::DispatchNotFound(_) => Status::NotFound,
        _ => Status::BadRequest,
    };
    warn!(topic = %target, status = status.code(), "topic call failed: {err}");
    (status.into(), TopicResponse::error(target, request_uuid, err.to_string()))
}

impl Filter for TopicFilter {
    fn before<'a>(&'a self, cx: &'a mut Context, _carrier: &'a mut Carrier) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(async move {
            if !self.detects(cx) {
                return Ok(true);
            }

            let (status, envelope) = self.serve(cx).await;
            let target = envelope.target.clone();
            let uuid = envelope.request_uuid.clone();
            let (status, (content_type, body)) = match envelope.encode() {
                Ok(encoded) => (status, encoded),
                Err(e) => {
                    let (status, fallback) = failure(target, uuid, e);
                    (status, fallback.encode()?)
                }
            };
            cx.respond(Response::builder().status(status).typed(&content_type, body));
            Ok(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    use crate::error::HttpError;
    use crate::multipart::MultipartWriter;
    use crate::topic::bus::{IntentRegistry, ModuleRegistry};
    use crate::topic::envelope::TopicState;
    use crate::topic::value::Blob;

    async fn echo(body: Value, _: Request) -> Result<Value, Error> {
        Ok(body)
    }

    async fn scan(body: Value, _: Request) -> Result<Value, Error> {
        let title = body.get("title").and_then(Value::as_str).unwrap_or("untitled").to_owned();
        Ok([
            ("title", Value::from(title)),
            ("pdf", Blob::new(&b"%PDF-1.7\r\n--"[..]).filename("scan.pdf").content_type("application/pdf").into()),
        ]
        .into_iter()
        .collect())
    }

    async fn refuse(_: Value, _: Request) -> Result<Value, Error> {
        Err(HttpError::new(Status::Forbidden, "not yours").into())
    }

    fn filter() -> TopicFilter {
        TopicFilter::new(TopicConfig::default())
            .intents(Arc::new(IntentRegistry::new().subscribe("echo", echo).subscribe("refuse", refuse)))
            .modules(Arc::new(ModuleRegistry::new().handler("scanner", scan)))
    }

    fn topic_call(meta: &str) -> Context {
        let body = MultipartWriter::with_boundary("XYZ").field("body", meta).finish();
        Context::new("POST", "/rpc")
            .with_header("X-Sluice-Protocol", "Topic")
            .with_header("Content-Type", "multipart/form-data; boundary=XYZ")
            .with_body(body)
    }

    async fn run(filter: &TopicFilter, cx: &mut Context) -> bool {
        filter.before(cx, &mut Carrier::new()).await.unwrap()
    }

    fn json_body(cx: &Context) -> serde_json::Value {
        serde_json::from_slice(cx.response_body().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn echo_intent() {
        let mut cx = topic_call(r#"{"target":"echo","body":{"msg":"hi"}}"#);
        assert!(!run(&filter(), &mut cx).await);
        assert_eq!(cx.status(), 200);
        assert_eq!(cx.response_header("content-type"), Some("application/json"));
        assert_eq!(json_body(&cx), json!({"state": "success", "target": "echo", "body": {"msg": "hi"}}));
    }

    #[tokio::test]
    async fn ignores_requests_without_marker_or_multipart() {
        let mut plain = Context::new("POST", "/rpc")
            .with_header("content-type", "multipart/form-data; boundary=XYZ");
        assert!(run(&filter(), &mut plain).await);
        assert!(plain.response_body().is_none());

        let mut json = Context::new("POST", "/rpc")
            .with_header("x-sluice-protocol", "topic")
            .with_header("content-type", "application/json")
            .with_body("{}");
        assert!(run(&filter(), &mut json).await);
    }

    #[tokio::test]
    async fn unknown_target_is_404_envelope() {
        let mut cx = topic_call(r#"{"target":"nobody","requestUUID":"r-7","body":null}"#);
        assert!(!run(&filter(), &mut cx).await);
        assert_eq!(cx.status(), 404);
        let body = json_body(&cx);
        assert_eq!(body["state"], "error");
        assert_eq!(body["target"], "nobody");
        assert_eq!(body["requestUUID"], "r-7");
        assert_eq!(body["body"]["message"], "no responder for target `nobody`");

        let mut cx = topic_call(r#"{"type":"router","target":"echo","body":null}"#);
        run(&filter(), &mut cx).await;
        assert_eq!(cx.status(), 404);
    }

    #[tokio::test]
    async fn malformed_envelope_is_400_with_empty_target() {
        let mut cx = topic_call(r#"{"target": 12}"#);
        assert!(!run(&filter(), &mut cx).await);
        assert_eq!(cx.status(), 400);
        let body = json_body(&cx);
        assert_eq!(body["state"], "error");
        assert_eq!(body["target"], "");
        assert!(body["body"]["message"].as_str().unwrap().starts_with("protocol decode:"));
    }

    #[tokio::test]
    async fn handler_errors_stay_inside_the_envelope() {
        let mut cx = topic_call(r#"{"target":"refuse"}"#);
        assert!(!run(&filter(), &mut cx).await);
        assert_eq!(cx.status(), 400);
        assert_eq!(json_body(&cx)["body"]["message"], "403: not yours");
    }

    #[tokio::test]
    async fn router_module_with_binary_answer() {
        let mut cx = topic_call(r#"{"type":"router","target":"scanner","body":{"title":"q3"}}"#);
        assert!(!run(&filter(), &mut cx).await);
        assert_eq!(cx.status(), 200);

        let content_type = cx.response_header("content-type").unwrap().to_owned();
        assert!(content_type.starts_with("multipart/mixed; boundary="));
        let body = Bytes::clone(cx.response_body().unwrap());
        let answer = TopicResponse::decode(&body, &content_type).unwrap();
        assert_eq!(answer.state, TopicState::Success);
        assert_eq!(answer.body.get("title").and_then(Value::as_str), Some("q3"));
        let pdf = answer.body.get("pdf").and_then(Value::as_blob).unwrap();
        assert_eq!(pdf.bytes.as_ref(), b"%PDF-1.7\r\n--");
        assert_eq!(pdf.content_type.as_deref(), Some("application/pdf"));
    }
}
