//! Whole-pipeline behaviour, driven in-process through `App::handle`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use sluice::middleware::cache::{CacheFilter, CacheKey, CacheStore, FileCacheStore, MemoryCacheStore};
use sluice::middleware::session::{MemorySessionStore, SessionFilter};
use sluice::multipart::MultipartWriter;
use sluice::topic::{Blob, IntentRegistry, TopicFilter, TopicRequest, TopicResponse, TopicState, Value};
use sluice::{App, Context, Error, HttpError, Method, Request, Response, Route, Router, Status};

fn counting_router(hits: &Arc<AtomicUsize>) -> Router {
    let hits = Arc::clone(hits);
    Router::new().on(Method::Get, "/report", move |_: Request| {
        let hits = Arc::clone(&hits);
        async move {
            let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
            Response::builder()
                .header("x-render", &n.to_string())
                .header("x-volatile", "yes")
                .text(format!("report #{n}"))
        }
    })
}

fn body_text(cx: &Context) -> &str {
    cx.response_body().map(|b| std::str::from_utf8(b).unwrap()).unwrap_or_default()
}

async fn get(app: &App, path: &str) -> Context {
    let mut cx = Context::new("GET", path);
    app.handle(&mut cx).await.unwrap();
    cx
}

#[tokio::test]
async fn cache_replays_within_life_time_then_refreshes() {
    let hits = Arc::new(AtomicUsize::new(0));
    let cache = CacheFilter::new(Arc::new(MemoryCacheStore::new()), |cx| {
        Some(CacheKey::new(cx.path()).life_time(Duration::from_millis(1000)).capture(["content-type", "x-render"]))
    });
    let app = App::new(counting_router(&hits)).filter(cache);

    let first = get(&app, "/report").await;
    let second = get(&app, "/report").await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(second.status(), first.status());
    assert_eq!(body_text(&second), "report #1");
    assert_eq!(second.response_header("content-type"), first.response_header("content-type"));
    assert_eq!(second.response_header("x-render"), Some("1"));
    assert_eq!(second.response_header("x-volatile"), None);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let third = get(&app, "/report").await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(body_text(&third), "report #2");
}

#[tokio::test]
async fn file_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let store = FileCacheStore::open(dir.path()).await.unwrap();
        let cache = CacheFilter::new(Arc::new(store), |cx| Some(CacheKey::new(cx.path())));
        let app = App::new(counting_router(&hits)).filter(cache);
        assert_eq!(body_text(&get(&app, "/report").await), "report #1");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let store = FileCacheStore::open(dir.path()).await.unwrap();
    assert!(store.entry("/report").await.unwrap().is_some());
}

#[tokio::test]
async fn session_cookie_issued_once() {
    let store = Arc::new(MemorySessionStore::new());
    let app = App::new(Router::new().on(Method::Get, "/me", |req: Request| async move {
        let session = req.session().ok_or(HttpError::from(Status::InternalServerError))?;
        Ok::<_, HttpError>(session.id().to_owned())
    }))
    .filter(SessionFilter::new(store.clone(), Default::default()));

    let first = get(&app, "/me").await;
    let cookie = first.response_header("set-cookie").unwrap().to_owned();
    assert!(cookie.starts_with(&format!("sluice.sid={}; Path=/", body_text(&first))));
    assert!(cookie.contains("HttpOnly"));

    let pair = cookie.split(';').next().unwrap().to_owned();
    let mut again = Context::new("GET", "/me").with_header("cookie", &format!("theme=dark; {pair}"));
    app.handle(&mut again).await.unwrap();
    assert_eq!(again.response_header("set-cookie"), None);
    assert_eq!(body_text(&again), body_text(&first));
    assert_eq!(store.len(), 1);
}

async fn echo(body: Value, _: Request) -> Result<Value, Error> {
    Ok(body)
}

/// Answers with every attachment it was given, tagged by size.
async fn inventory(body: Value, _: Request) -> Result<Value, Error> {
    let Value::Object(map) = body else {
        return Err(HttpError::new(Status::BadRequest, "object expected").into());
    };
    Ok(map.into_iter()
        .map(|(name, value)| {
            let size = value.as_blob().map_or(0, |b| b.bytes.len() as i64);
            let tagged: Value = [("size", Value::from(size)), ("data", value)].into_iter().collect();
            (name, tagged)
        })
        .collect())
}

fn topic_app(routed: &Arc<AtomicUsize>) -> App {
    let routed = Arc::clone(routed);
    let bus = IntentRegistry::new().subscribe("echo", echo).subscribe("inventory", inventory);
    App::new(Router::new().on(Method::Post, "/", move |_: Request| {
        routed.fetch_add(1, Ordering::SeqCst);
        async { "routed" }
    }))
    .filter(TopicFilter::new(Default::default()).intents(Arc::new(bus)))
}

fn topic_context(content_type: &str, body: impl Into<Bytes>) -> Context {
    Context::new("POST", "/")
        .with_header("x-sluice-protocol", "TOPIC")
        .with_header("content-type", content_type)
        .with_body(body)
}

#[tokio::test]
async fn topic_echo_bypasses_routes() {
    let routed = Arc::new(AtomicUsize::new(0));
    let app = topic_app(&routed);

    let body = concat!(
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"body\"\r\n",
        "\r\n",
        "{\"target\":\"echo\",\"body\":{\"msg\":\"hi\"}}\r\n",
        "--XYZ--\r\n",
    );
    let mut cx = topic_context("multipart/form-data; boundary=XYZ", body);
    app.handle(&mut cx).await.unwrap();

    assert_eq!(routed.load(Ordering::SeqCst), 0);
    assert_eq!(cx.status(), 200);
    let answer: serde_json::Value = serde_json::from_slice(cx.response_body().unwrap()).unwrap();
    assert_eq!(answer, json!({"state": "success", "target": "echo", "body": {"msg": "hi"}}));

    let mut plain = Context::new("POST", "/").with_header("content-type", "multipart/form-data; boundary=XYZ").with_body(body);
    app.handle(&mut plain).await.unwrap();
    assert_eq!(body_text(&plain), "routed");
    assert_eq!(routed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn topic_attachments_round_trip_bit_exact() {
    let app = topic_app(&Arc::new(AtomicUsize::new(0)));
    let binary: Vec<u8> = (0..=255u8).cycle().take(4096).chain(*b"\r\n--XYZ\r\n").collect();

    let call = TopicRequest {
        kind: Default::default(),
        target: "inventory".into(),
        request_uuid: Some("req-1".into()),
        body: [
            ("scan", Value::from(Blob::new(binary.clone()).filename("scan.bin"))),
            ("note", Value::from("hello")),
        ]
        .into_iter()
        .collect(),
    };
    let (content_type, wire) = call.encode().unwrap();
    let mut cx = topic_context(&content_type, wire);
    app.handle(&mut cx).await.unwrap();

    let response_type = cx.response_header("content-type").unwrap().to_owned();
    assert!(response_type.starts_with("multipart/mixed"));
    let answer = TopicResponse::decode(cx.response_body().unwrap(), &response_type).unwrap();
    assert_eq!(answer.state, TopicState::Success);
    assert_eq!(answer.request_uuid.as_deref(), Some("req-1"));

    let scan = answer.body.get("scan").unwrap();
    assert_eq!(scan.get("size"), Some(&Value::from(binary.len() as i64)));
    let blob = scan.get("data").and_then(Value::as_blob).unwrap();
    assert_eq!(blob.bytes.as_ref(), binary.as_slice());
    assert_eq!(blob.filename.as_deref(), Some("scan.bin"));
    assert_eq!(answer.body.get("note").and_then(|n| n.get("data")).and_then(Value::as_str), Some("hello"));
}

#[tokio::test]
async fn topic_failures_are_envelopes_not_errors() {
    let app = topic_app(&Arc::new(AtomicUsize::new(0)))
        .advice(|_, _| panic!("topic errors must not reach advice"));

    let mut garbled = topic_context("multipart/form-data; boundary=XYZ", "--XYZ\r\nbroken");
    app.handle(&mut garbled).await.unwrap();
    assert_eq!(garbled.status(), 400);

    let mut no_boundary = topic_context("multipart/form-data", "whatever");
    app.handle(&mut no_boundary).await.unwrap();
    assert_eq!(no_boundary.status(), 400);
    let answer: serde_json::Value = serde_json::from_slice(no_boundary.response_body().unwrap()).unwrap();
    assert_eq!(answer["state"], "error");
    assert_eq!(answer["target"], "");

    let (content_type, wire) = TopicRequest {
        kind: Default::default(),
        target: "inventory".into(),
        request_uuid: None,
        body: Value::from("not an object"),
    }
    .encode()
    .unwrap();
    let mut refused = topic_context(&content_type, wire);
    app.handle(&mut refused).await.unwrap();
    assert_eq!(refused.status(), 400);
    let answer = TopicResponse::decode(refused.response_body().unwrap(), "application/json").unwrap();
    assert_eq!(answer.target, "inventory");
    assert_eq!(answer.body.get("message").and_then(Value::as_str), Some("400: object expected"));
}

#[tokio::test]
async fn negotiation_and_options_through_app() {
    let app = App::new(
        Router::new()
            .on(Method::Post, "/items", |_: Request| async { "any" })
            .route("/items", Route::new(Method::Post, |_: Request| async { "json" }).consumes(["application/json"]))
            .on(Method::Delete, "/items", |_: Request| async { Status::NoContent }),
    );

    let mut cx = Context::new("POST", "/items").with_header("content-type", "application/json").with_body("{}");
    app.handle(&mut cx).await.unwrap();
    assert_eq!(body_text(&cx), "json");

    let mut cx = Context::new("POST", "/items").with_header("content-type", "text/csv");
    app.handle(&mut cx).await.unwrap();
    assert_eq!(body_text(&cx), "any");

    let cx = {
        let mut cx = Context::new("OPTIONS", "/items");
        app.handle(&mut cx).await.unwrap();
        cx
    };
    assert_eq!(cx.status(), 200);
    assert_eq!(cx.response_header("allow"), Some("POST, DELETE"));
}
