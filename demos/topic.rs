//! A small sluice service: cached routes, sessions and topic calls.
//!
//! Run with:
//!   cargo run --example topic [config.toml]
//!
//! Try:
//!   curl -i http://localhost:3000/time            # second call within 5 s is a cache hit
//!   curl -i -c jar -b jar http://localhost:3000/visits
//!   curl -i -X OPTIONS http://localhost:3000/time
//!   curl -F file=@Cargo.toml http://localhost:3000/upload
//!   curl -H 'x-sluice-protocol: topic' \
//!        -F 'body={"target":"echo","body":{"msg":"hi"}}' http://localhost:3000/
//!   curl -H 'x-sluice-protocol: topic' \
//!        -F 'body={"type":"router","target":"reverse","body":{"file":{"$file":"f"}}}' \
//!        -F f=@Cargo.toml http://localhost:3000/

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sluice::config::Config;
use sluice::middleware::cache::{CacheFilter, CacheKey, CacheStore, FileCacheStore, MemoryCacheStore};
use sluice::middleware::session::{MemorySessionStore, SessionFilter};
use sluice::topic::{Blob, IntentRegistry, ModuleRegistry, TopicFilter, Value};
use sluice::{App, Error, HttpError, Json, Method, Request, Response, Route, Router, Server, Status};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(Path::new(&path))?,
        None => Config::default(),
    };

    let store: Arc<dyn CacheStore> = match &config.cache.dir {
        Some(dir) => Arc::new(FileCacheStore::open(dir.clone()).await?),
        None => Arc::new(MemoryCacheStore::new()),
    };
    let cache = CacheFilter::new(store, |cx| {
        Some(CacheKey::new(cx.path()).life_time(Duration::from_secs(5)))
    })
    .when(|cx| cx.method() == "GET" && cx.path() == "/time");

    let topics = TopicFilter::new(config.topic.clone())
        .intents(Arc::new(IntentRegistry::new().subscribe("echo", echo)))
        .modules(Arc::new(ModuleRegistry::new().handler("reverse", reverse)));

    let routes = Router::new()
        .on(Method::Get, "/time", time_text)
        .route("/time", Route::new(Method::Get, time_json).produces(["application/json"]))
        .on(Method::Get, "/visits", visits)
        .route("/upload", Route::new(Method::Post, upload).consumes(["multipart/form-data"]));

    let app = App::new(routes)
        .filter(cache)
        .filter(SessionFilter::new(Arc::new(MemorySessionStore::from_config(&config.session)), config.session.clone()))
        .filter(topics)
        .advice(|err, _| Response::text(format!("{err}\n")));

    Server::from_config(&config.server).serve(app).await
}

async fn time_text(_: Request) -> String {
    format!("{}\n", chrono_now())
}

async fn time_json(_: Request) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "now": chrono_now() }))
}

fn chrono_now() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn visits(req: Request) -> Result<String, HttpError> {
    let session = req.session().ok_or_else(|| HttpError::from(Status::InternalServerError))?;
    let count = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    session.insert("visits", count.into());
    Ok(format!("visit #{count} for session {}\n", session.id()))
}

async fn upload(req: Request) -> Result<Response, Error> {
    let form = req.form()?;
    let files: Vec<_> = form.files()
        .map(|part| serde_json::json!({
            "field": part.name,
            "filename": part.filename,
            "bytes": part.bytes().len(),
        }))
        .collect();
    Ok(Response::builder().status(Status::Created).json(serde_json::to_vec(&files)?))
}

async fn echo(body: Value, _: Request) -> Result<Value, Error> {
    Ok(body)
}

/// Sends the attached file back with its bytes reversed.
async fn reverse(body: Value, _: Request) -> Result<Value, Error> {
    let file = body.get("file")
        .and_then(Value::as_blob)
        .ok_or_else(|| HttpError::new(Status::BadRequest, "`file` attachment required"))?;
    let reversed: Vec<u8> = file.bytes.iter().rev().copied().collect();
    let name = file.filename.clone().unwrap_or_else(|| "file".to_owned());
    Ok([("file", Value::from(Blob::new(reversed).filename(format!("{name}.rev"))))]
        .into_iter()
        .collect())
}
