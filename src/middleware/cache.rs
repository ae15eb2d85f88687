//! Cache-aside response cache.
//!
//! On a hit the stored status, captured headers and body are replayed and
//! the chain stops. On a miss the request proceeds normally and the
//! after-phase writes whatever the handler produced back to the store.
//!
//! Entries are valid while their blob exists and `now - createTime <=
//! lifeTime`. Nothing sweeps stale entries; the next miss overwrites them.
//!
//! Concurrent misses for one key all reach the handler and all write the
//! manifest; the last `put_entry` wins and the loser's blob is orphaned.
//! Stores serialize individual manifest writes but do not coordinate a
//! lookup with its later write-back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::carrier::Carrier;
use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::Filter;

const MANIFEST_FILE: &str = "manifest.json";
const PENDING_UPDATE: &str = "cache.is_update";

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn default_status() -> u16 {
    200
}

/// One cached response, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Blob location, opaque to everything but the store.
    pub path: String,
    /// Epoch milliseconds.
    pub create_time: i64,
    /// Milliseconds; never expires when absent.
    pub life_time: Option<u64>,
    pub response_header: IndexMap<String, String>,
    #[serde(default = "default_status")]
    pub status: u16,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: i64) -> bool {
        match self.life_time {
            Some(life) => now.saturating_sub(self.create_time) <= i64::try_from(life).unwrap_or(i64::MAX),
            None => true,
        }
    }
}

/// The persisted index of cache entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub create_date: i64,
    pub update_date: i64,
    pub caches: IndexMap<String, CacheEntry>,
}

impl Manifest {
    fn new() -> Self {
        let now = now_millis();
        Self { create_date: now, update_date: now, caches: IndexMap::new() }
    }

    fn put(&mut self, key: &str, entry: CacheEntry) -> Option<CacheEntry> {
        self.update_date = now_millis();
        self.caches.insert(key.to_owned(), entry)
    }
}

/// Key/value storage behind the cache filter.
///
/// `entry` reads the manifest, `put_entry` is the single read-modify-write
/// step on it and returns the entry it replaced. Blobs are written before
/// their entry so a reader never sees an entry without its blob.
pub trait CacheStore: Send + Sync + 'static {
    fn entry<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, Error>>;

    fn put_entry<'a>(&'a self, key: &'a str, entry: CacheEntry) -> BoxFuture<'a, Result<Option<CacheEntry>, Error>>;

    /// `None` when the blob is gone.
    fn read_blob<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, Error>>;

    /// Stores `body` under a fresh id and returns its path.
    fn write_blob<'a>(&'a self, body: Bytes) -> BoxFuture<'a, Result<String, Error>>;

    fn remove_blob<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), Error>>;
}

// ── Memory store ──────────────────────────────────────────────────────────────

pub struct MemoryCacheStore {
    manifest: parking_lot::Mutex<Manifest>,
    blobs: DashMap<String, Bytes>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self { manifest: parking_lot::Mutex::new(Manifest::new()), blobs: DashMap::new() }
    }

    pub fn manifest(&self) -> Manifest {
        self.manifest.lock().clone()
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self { Self::new() }
}

impl CacheStore for MemoryCacheStore {
    fn entry<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, Error>> {
        let found = self.manifest.lock().caches.get(key).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn put_entry<'a>(&'a self, key: &'a str, entry: CacheEntry) -> BoxFuture<'a, Result<Option<CacheEntry>, Error>> {
        let replaced = self.manifest.lock().put(key, entry);
        Box::pin(async move { Ok(replaced) })
    }

    fn read_blob<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, Error>> {
        let found = self.blobs.get(path).map(|b| b.value().clone());
        Box::pin(async move { Ok(found) })
    }

    fn write_blob<'a>(&'a self, body: Bytes) -> BoxFuture<'a, Result<String, Error>> {
        let path = Uuid::new_v4().simple().to_string();
        self.blobs.insert(path.clone(), body);
        Box::pin(async move { Ok(path) })
    }

    fn remove_blob<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        self.blobs.remove(path);
        Box::pin(async { Ok(()) })
    }
}

// ── File store ────────────────────────────────────────────────────────────────

/// Blob files plus a `manifest.json`, all in one directory.
pub struct FileCacheStore {
    dir: PathBuf,
    manifest: tokio::sync::Mutex<Manifest>,
}

impl FileCacheStore {
    /// Opens (creating if needed) a cache directory. An unreadable manifest
    /// is logged and replaced by an empty one.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let manifest = match tokio::fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!(dir = %dir.display(), "cache manifest unreadable, starting empty: {e}");
                Manifest::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(dir = %dir.display(), entries = manifest.caches.len(), "cache store opened");

        Ok(Self { dir, manifest: tokio::sync::Mutex::new(manifest) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn persist(&self, manifest: &Manifest) -> Result<(), Error> {
        let raw = serde_json::to_vec_pretty(manifest)?;
        let tmp = self.dir.join(format!("{MANIFEST_FILE}.tmp"));
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, self.dir.join(MANIFEST_FILE)).await?;
        Ok(())
    }
}

impl CacheStore for FileCacheStore {
    fn entry<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, Error>> {
        Box::pin(async move { Ok(self.manifest.lock().await.caches.get(key).cloned()) })
    }

    fn put_entry<'a>(&'a self, key: &'a str, entry: CacheEntry) -> BoxFuture<'a, Result<Option<CacheEntry>, Error>> {
        Box::pin(async move {
            let mut manifest = self.manifest.lock().await;
            let replaced = manifest.put(key, entry);
            self.persist(&manifest).await?;
            Ok(replaced)
        })
    }

    fn read_blob<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, Error>> {
        Box::pin(async move {
            match tokio::fs::read(self.dir.join(path)).await {
                Ok(raw) => Ok(Some(Bytes::from(raw))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn write_blob<'a>(&'a self, body: Bytes) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let path = format!("{}.blob", Uuid::new_v4().simple());
            tokio::fs::write(self.dir.join(&path), &body).await?;
            Ok(path)
        })
    }

    fn remove_blob<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.dir.join(path)).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        })
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// What `key_fn` says about a request: the cache key, how long the answer
/// stays valid and which response headers to replay on a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub key: String,
    pub life_time: Option<Duration>,
    pub capture_headers: Vec<String>,
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), life_time: None, capture_headers: vec!["content-type".to_owned()] }
    }

    pub fn life_time(mut self, life_time: Duration) -> Self {
        self.life_time = Some(life_time);
        self
    }

    /// Response headers stored with the entry. Defaults to `content-type`.
    pub fn capture<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capture_headers = headers.into_iter().map(Into::into).collect();
        self
    }
}

type KeyFn = Arc<dyn Fn(&Context) -> Option<CacheKey> + Send + Sync + 'static>;
type GateFn = Arc<dyn Fn(&Context) -> bool + Send + Sync + 'static>;

/// Cache-aside filter. Register it before business filters so a hit skips
/// them.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use sluice::middleware::cache::{CacheFilter, CacheKey, MemoryCacheStore};
///
/// let cache = CacheFilter::new(Arc::new(MemoryCacheStore::new()), |cx| {
///     Some(CacheKey::new(cx.path()).life_time(Duration::from_secs(30)))
/// })
/// .when(|cx| cx.method() == "GET");
/// ```
pub struct CacheFilter {
    store: Arc<dyn CacheStore>,
    key_fn: KeyFn,
    gate: GateFn,
}

impl CacheFilter {
    pub fn new(
        store: Arc<dyn CacheStore>,
        key_fn: impl Fn(&Context) -> Option<CacheKey> + Send + Sync + 'static,
    ) -> Self {
        Self { store, key_fn: Arc::new(key_fn), gate: Arc::new(|_: &Context| true) }
    }

    /// Only requests passing `gate` use the cache; others pass through.
    pub fn when(mut self, gate: impl Fn(&Context) -> bool + Send + Sync + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    async fn lookup(&self, key: &str) -> Result<Option<(CacheEntry, Bytes)>, Error> {
        let Some(entry) = self.store.entry(key).await? else {
            return Ok(None);
        };
        if !entry.is_fresh(now_millis()) {
            debug!(key, "cache entry expired");
            return Ok(None);
        }
        match self.store.read_blob(&entry.path).await? {
            Some(body) => Ok(Some((entry, body))),
            None => {
                debug!(key, path = %entry.path, "cache blob missing");
                Ok(None)
            }
        }
    }

    async fn write_back(&self, key: CacheKey, cx: &Context) -> Result<(), Error> {
        let body = cx.response_body().cloned().unwrap_or_default();
        let path = self.store.write_blob(body).await?;

        let response_header = key.capture_headers.iter()
            .filter_map(|name| cx.response_header(name).map(|v| (name.to_ascii_lowercase(), v.to_owned())))
            .collect();
        let entry = CacheEntry {
            path: path.clone(),
            create_time: now_millis(),
            life_time: key.life_time.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            response_header,
            status: cx.status(),
        };

        if let Some(old) = self.store.put_entry(&key.key, entry).await? {
            if old.path != path {
                self.store.remove_blob(&old.path).await?;
            }
        }
        debug!(key = %key.key, path = %path, "cache entry stored");
        Ok(())
    }
}

impl Filter for CacheFilter {
    fn before<'a>(&'a self, cx: &'a mut Context, carrier: &'a mut Carrier) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(async move {
            if !(self.gate)(cx) {
                return Ok(true);
            }
            let Some(key) = (self.key_fn)(cx) else {
                return Ok(true);
            };

            match self.lookup(&key.key).await {
                Ok(Some((entry, body))) => {
                    debug!(key = %key.key, "cache hit");
                    cx.set_status(entry.status);
                    for (name, value) in &entry.response_header {
                        cx.set_header(name, value);
                    }
                    cx.set_body(body);
                    return Ok(false);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key.key, "cache read failed: {e}"),
            }

            carrier.insert(PENDING_UPDATE, key);
            Ok(true)
        })
    }

    fn after<'a>(
        &'a self,
        cx: &'a mut Context,
        carrier: &'a mut Carrier,
        _before: bool,
    ) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(async move {
            let Some(key) = carrier.take::<CacheKey>(PENDING_UPDATE) else {
                return Ok(true);
            };
            if !(200..300).contains(&cx.status()) {
                debug!(key = %key.key, status = cx.status(), "not caching unsuccessful response");
                return Ok(true);
            }
            let name = key.key.clone();
            if let Err(e) = self.write_back(key, cx).await {
                warn!(key = %name, "cache write failed: {e}");
            }
            Ok(true)
        })
    }
}
