//! Cookie-backed sessions.
//!
//! The backing store is pluggable through [`SessionStore`]; the filter only
//! knows how to find the session cookie and how to issue a new one.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::carrier::Carrier;
use crate::config::SessionConfig;
use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::Filter;

/// A handle to one session's data. Clones share the same map.
#[derive(Clone, Debug)]
pub struct Session {
    id: Arc<str>,
    data: Arc<DashMap<String, Value>>,
}

impl Session {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into(), data: Arc::default() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }
}

/// Where sessions live.
pub trait SessionStore: Send + Sync + 'static {
    /// Returns the session for `id`, or a fresh one when `id` is absent or
    /// unknown. The flag is true when the session was just created.
    fn get_or_create<'a>(&'a self, id: Option<&'a str>) -> BoxFuture<'a, Result<(Session, bool), Error>>;
}

/// Process-local session store.
///
/// A session not seen for longer than the TTL is dropped: a lookup treats
/// it as unknown, and expired entries are swept while new sessions are
/// created. With a capacity set, the least recently seen session makes room
/// for a new one.
pub struct MemorySessionStore {
    sessions: DashMap<String, Stored>,
    ttl: Duration,
    capacity: Option<usize>,
    created: AtomicUsize,
}

struct Stored {
    session: Session,
    last_seen: Instant,
}

/// Creations between two sweeps of expired sessions.
const SWEEP_EVERY: usize = 64;

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::from_config(&SessionConfig::default())
    }

    /// TTL and capacity from `session.idle_timeout`, `session.max_age` and
    /// `session.max_sessions`.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: config.ttl(),
            capacity: config.max_sessions,
            created: AtomicUsize::new(0),
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn expired(&self, stored: &Stored, now: Instant) -> bool {
        now.saturating_duration_since(stored.last_seen) > self.ttl
    }

    /// Returns the live session for `id`, refreshing it. An expired one is
    /// removed.
    fn touch(&self, id: &str, now: Instant) -> Option<Session> {
        if let Some(mut stored) = self.sessions.get_mut(id) {
            if !self.expired(&stored, now) {
                stored.last_seen = now;
                return Some(stored.session.clone());
            }
        }
        if self.sessions.remove_if(id, |_, stored| self.expired(stored, now)).is_some() {
            debug!(session = id, "session expired");
        }
        None
    }

    /// Drops expired sessions, then the least recently seen ones while the
    /// store is at capacity.
    fn make_room(&self, now: Instant) {
        let full = self.capacity.is_some_and(|cap| self.sessions.len() >= cap);
        let due = self.created.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == 0;
        if full || due {
            self.sessions.retain(|_, stored| !self.expired(stored, now));
        }

        let Some(capacity) = self.capacity else { return };
        while self.sessions.len() >= capacity.max(1) {
            let oldest = self.sessions.iter()
                .min_by_key(|entry| entry.value().last_seen)
                .map(|entry| entry.key().clone());
            let Some(oldest) = oldest else { break };
            self.sessions.remove(&oldest);
            debug!(session = %oldest, "session evicted");
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self { Self::new() }
}

impl SessionStore for MemorySessionStore {
    fn get_or_create<'a>(&'a self, id: Option<&'a str>) -> BoxFuture<'a, Result<(Session, bool), Error>> {
        Box::pin(async move {
            let now = Instant::now();
            if let Some(found) = id.and_then(|id| self.touch(id, now)) {
                return Ok((found, false));
            }
            self.make_room(now);
            let session = Session::new(Uuid::new_v4().simple().to_string());
            let stored = Stored { session: session.clone(), last_seen: now };
            self.sessions.insert(session.id().to_owned(), stored);
            Ok((session, true))
        })
    }
}

/// Attaches a session to every request, issuing `Set-Cookie` for new ones.
pub struct SessionFilter {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionFilter {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }
}

impl Filter for SessionFilter {
    fn before<'a>(&'a self, cx: &'a mut Context, _carrier: &'a mut Carrier) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(async move {
            let cookie = cx.header_all("cookie")
                .find_map(|header| cookie_value(header, &self.config.cookie_name))
                .map(str::to_owned);

            let (session, created) = self.store.get_or_create(cookie.as_deref()).await?;
            if created {
                debug!(session = session.id(), "session created");
                cx.append_header("set-cookie", &self.config.set_cookie(session.id()));
            }
            cx.set_session(session);
            Ok(true)
        })
    }
}

/// Finds `name` in a `Cookie` header value (`a=1; b=2`).
fn cookie_value<'h>(header: &'h str, name: &str) -> Option<&'h str> {
    header.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"'))
}
