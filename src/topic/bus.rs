//! Where topic calls go: the intent bus and router modules.
//!
//! Both are traits so an application can plug in its own pub/sub or module
//! container. [`IntentRegistry`] and [`ModuleRegistry`] are the in-process
//! implementations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{join_all, select_ok};
use tracing::debug;

use crate::error::Error;
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::topic::value::Value;

/// Something that answers a topic call.
///
/// Implemented for any `async fn(Value, Request) -> Result<Value, Error>`.
pub trait TopicHandler: Send + Sync + 'static {
    fn call(&self, body: Value, req: Request) -> BoxFuture<'static, Result<Value, Error>>;
}

impl<F, Fut> TopicHandler for F
where
    F: Fn(Value, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Error>> + Send + 'static,
{
    fn call(&self, body: Value, req: Request) -> BoxFuture<'static, Result<Value, Error>> {
        Box::pin((self)(body, req))
    }
}

pub type BoxedTopicHandler = Arc<dyn TopicHandler>;

/// Publish/subscribe collaborator for `type: intent` calls.
pub trait IntentBus: Send + Sync + 'static {
    /// Publishes `body` to `target` and resolves with the first responder's
    /// answer, or `None` when nobody listens on `target`.
    fn publish<'a>(&'a self, target: &'a str, body: Value, req: Request) -> BoxFuture<'a, Result<Option<Value>, Error>>;
}

/// Module container for `type: router` calls.
pub trait RouterModules: Send + Sync + 'static {
    /// The first declared handler of the module named `target`.
    fn resolve(&self, target: &str) -> Option<BoxedTopicHandler>;
}

/// In-process intent bus.
///
/// Every subscriber of a target receives the message concurrently. The
/// first one to answer successfully wins; the others keep running in the
/// background. If all fail, the last failure is returned.
#[derive(Default)]
pub struct IntentRegistry {
    subscribers: HashMap<String, Vec<BoxedTopicHandler>>,
}

impl IntentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(mut self, target: &str, handler: impl TopicHandler) -> Self {
        self.subscribers.entry(target.to_owned()).or_default().push(Arc::new(handler));
        self
    }
}

impl IntentBus for IntentRegistry {
    fn publish<'a>(&'a self, target: &'a str, body: Value, req: Request) -> BoxFuture<'a, Result<Option<Value>, Error>> {
        Box::pin(async move {
            let subscribers = match self.subscribers.get(target) {
                Some(subs) if !subs.is_empty() => subs,
                _ => return Ok(None),
            };
            debug!(topic = target, subscribers = subscribers.len(), "publishing intent");

            let calls = subscribers.iter().map(|h| h.call(body.clone(), req.clone()));
            let (answer, rest) = select_ok(calls).await?;
            if !rest.is_empty() {
                tokio::spawn(join_all(rest));
            }
            Ok(Some(answer))
        })
    }
}

/// In-process router modules: target name → declared handlers.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Vec<BoxedTopicHandler>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares one more handler on module `target`. Only the first one
    /// declared is ever dispatched to.
    pub fn handler(mut self, target: &str, handler: impl TopicHandler) -> Self {
        self.modules.entry(target.to_owned()).or_default().push(Arc::new(handler));
        self
    }
}

impl RouterModules for ModuleRegistry {
    fn resolve(&self, target: &str) -> Option<BoxedTopicHandler> {
        self.modules.get(target)?.first().cloned()
    }
}
