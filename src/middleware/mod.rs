//! Two-phase filter chain.
//!
//! Filters run in registration order before the route handler and in reverse
//! order after it, like layers of an onion:
//!
//! ```text
//!  before:  A ──▶ B ──▶ C ──▶ handler
//!  after:   A ◀── B ◀── C ◀──┘
//! ```
//!
//! A `before` returning `false` short-circuits: later filters and the handler
//! are skipped, but every filter whose `before` already ran (including the
//! one that stopped the chain) still gets its `after`, in reverse. An `after`
//! returning `false` ends the unwind early.
//!
//! Built-in filters:
//! - [`cache::CacheFilter`]: cache-aside response cache
//! - [`session::SessionFilter`]: cookie-backed sessions
//! - [`TopicFilter`](crate::topic::TopicFilter): the multipart RPC protocol

pub mod cache;
pub mod session;

use std::sync::Arc;

use tracing::trace;

use crate::carrier::Carrier;
use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;

/// An interceptor around route dispatch.
///
/// Both phases receive the request [`Context`] and the per-request
/// [`Carrier`]. Return `Ok(true)` to continue, `Ok(false)` to stop the
/// current phase. An `Err` aborts the request and goes to the top-level
/// error handling.
pub trait Filter: Send + Sync + 'static {
    fn before<'a>(&'a self, cx: &'a mut Context, carrier: &'a mut Carrier) -> BoxFuture<'a, Result<bool, Error>>;

    /// `before` is what this filter's own before-phase returned.
    fn after<'a>(
        &'a self,
        cx: &'a mut Context,
        carrier: &'a mut Carrier,
        before: bool,
    ) -> BoxFuture<'a, Result<bool, Error>> {
        let _ = (cx, carrier, before);
        Box::pin(async { Ok(true) })
    }

    /// Used in trace logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A filter whose before-phase has run, with what it returned.
pub struct FilterRecord {
    pub filter: Arc<dyn Filter>,
    pub before: bool,
}

/// The stack of executed filters, consumed by the after-phase.
pub struct Unwind {
    records: Vec<FilterRecord>,
}

impl Unwind {
    /// True when every before-phase said continue, i.e. the handler may run.
    pub fn proceed(&self) -> bool {
        self.records.iter().all(|r| r.before)
    }

    pub fn records(&self) -> &[FilterRecord] {
        &self.records
    }

    /// Runs the after-phase over the recorded filters, newest first.
    pub async fn run(self, cx: &mut Context, carrier: &mut Carrier) -> Result<(), Error> {
        for record in self.records.into_iter().rev() {
            let next = record.filter.after(cx, carrier, record.before).await?;
            trace!(filter = record.filter.name(), next, "after");
            if !next {
                break;
            }
        }
        Ok(())
    }
}

/// Filters in registration order.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: impl Filter) {
        self.filters.push(Arc::new(filter));
    }

    pub fn push_shared(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs the before-phase, stopping at the first filter that returns false.
    pub async fn run_before(&self, cx: &mut Context, carrier: &mut Carrier) -> Result<Unwind, Error> {
        let mut records = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let before = filter.before(cx, carrier).await?;
            trace!(filter = filter.name(), before, "before");
            records.push(FilterRecord { filter: Arc::clone(filter), before });
            if !before {
                break;
            }
        }
        Ok(Unwind { records })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    pub(crate) type Log = Arc<Mutex<Vec<String>>>;

    /// Records every call into a shared log.
    pub(crate) struct Probe {
        pub(crate) label: &'static str,
        pub(crate) before: bool,
        pub(crate) after: bool,
        pub(crate) log: Log,
    }

    impl Probe {
        pub(crate) fn new(label: &'static str, log: &Log) -> Self {
            Self { label, before: true, after: true, log: Arc::clone(log) }
        }
    }

    impl Filter for Probe {
        fn before<'a>(&'a self, _cx: &'a mut Context, carrier: &'a mut Carrier) -> BoxFuture<'a, Result<bool, Error>> {
            Box::pin(async move {
                carrier.insert(self.label, true);
                self.log.lock().push(format!("{}.before", self.label));
                Ok(self.before)
            })
        }

        fn after<'a>(
            &'a self,
            _cx: &'a mut Context,
            carrier: &'a mut Carrier,
            before: bool,
        ) -> BoxFuture<'a, Result<bool, Error>> {
            Box::pin(async move {
                assert_eq!(carrier.get::<bool>(self.label), Some(&true));
                self.log.lock().push(format!("{}.after({before})", self.label));
                Ok(self.after)
            })
        }
    }

    async fn run(chain: &FilterChain) -> bool {
        let mut cx = Context::new("GET", "/");
        let mut carrier = Carrier::new();
        let unwind = chain.run_before(&mut cx, &mut carrier).await.unwrap();
        let proceed = unwind.proceed();
        unwind.run(&mut cx, &mut carrier).await.unwrap();
        proceed
    }

    #[tokio::test]
    async fn onion_order() {
        let log = Log::default();
        let mut chain = FilterChain::new();
        chain.push(Probe::new("a", &log));
        chain.push(Probe::new("b", &log));

        assert!(run(&chain).await);
        assert_eq!(*log.lock(), ["a.before", "b.before", "b.after(true)", "a.after(true)"]);
    }

    #[tokio::test]
    async fn short_circuit_unwinds_only_executed_filters() {
        let log = Log::default();
        let mut chain = FilterChain::new();
        chain.push(Probe::new("a", &log));
        chain.push(Probe { before: false, ..Probe::new("b", &log) });
        chain.push(Probe::new("c", &log));

        assert!(!run(&chain).await);
        assert_eq!(*log.lock(), ["a.before", "b.before", "b.after(false)", "a.after(true)"]);
    }

    #[tokio::test]
    async fn after_false_stops_unwind() {
        let log = Log::default();
        let mut chain = FilterChain::new();
        chain.push(Probe::new("a", &log));
        chain.push(Probe { after: false, ..Probe::new("b", &log) });

        run(&chain).await;
        assert_eq!(*log.lock(), ["a.before", "b.before", "b.after(true)"]);
    }

    #[tokio::test]
    async fn empty_chain_proceeds() {
        assert!(run(&FilterChain::new()).await);
    }
}
