//! Hover-driven prefetch cache with TTL and in-flight sharing.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use serde::Serialize;
use shared_types::{FlatMetric, RunDetail, TraceRecord};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PrefetchConfig;
use crate::error::PipelineError;
use crate::runtime::{elapsed_between, run_or_cancel, sleep_or_cancel, SharedRuntime};
use crate::transport::RunApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrefetchKind {
    Run,
    Traces,
    Metrics,
}

impl PrefetchKind {
    pub const ALL: [PrefetchKind; 3] = [Self::Run, Self::Traces, Self::Metrics];
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrefetchData {
    Run(RunDetail),
    Traces(Vec<TraceRecord>),
    Metrics(Vec<FlatMetric>),
}

type SharedFetch = Shared<LocalBoxFuture<'static, Result<PrefetchData, PipelineError>>>;
type EntryKey = (PrefetchKind, String);

struct Entry {
    data: Option<PrefetchData>,
    fetched_at: Option<DateTime<Utc>>,
    in_flight: Option<SharedFetch>,
    generation: u64,
}

struct Inner {
    runtime: SharedRuntime,
    api: Rc<dyn RunApi>,
    settings: PrefetchConfig,
    entries: RefCell<HashMap<EntryKey, Entry>>,
    next_generation: Cell<u64>,
    debounce: RefCell<Option<CancellationToken>>,
    scope: CancellationToken,
    sweeping: Cell<bool>,
}

/// Shared prefetch cache. Clones share the same entries.
///
/// Construct once, call [`PrefetchCache::init`] to start the periodic sweep
/// and [`PrefetchCache::dispose`] on teardown.
#[derive(Clone)]
pub struct PrefetchCache {
    inner: Rc<Inner>,
}

impl PrefetchCache {
    pub fn new(runtime: SharedRuntime, api: Rc<dyn RunApi>, settings: PrefetchConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                runtime,
                api,
                settings,
                entries: RefCell::new(HashMap::new()),
                next_generation: Cell::new(0),
                debounce: RefCell::new(None),
                scope: CancellationToken::new(),
                sweeping: Cell::new(false),
            }),
        }
    }

    /// Start the periodic sweep. Calling it again is a no-op.
    pub fn init(&self) {
        if self.inner.sweeping.replace(true) || self.inner.scope.is_cancelled() {
            return;
        }
        let cache = self.clone();
        let token = self.inner.scope.child_token();
        self.inner.runtime.spawn(Box::pin(async move {
            let interval = cache.inner.settings.sweep_interval();
            while sleep_or_cancel(cache.inner.runtime.as_ref(), interval, &token).await {
                cache.sweep();
            }
        }));
    }

    /// Debounce, then prefetch every kind for `entity_id`. A newer call
    /// replaces a pending one.
    pub fn schedule(&self, entity_id: &str) {
        let token = self.inner.scope.child_token();
        let previous = self.inner.debounce.replace(Some(token.clone()));
        if let Some(previous) = previous {
            previous.cancel();
        }

        let cache = self.clone();
        let entity_id = entity_id.to_string();
        self.inner.runtime.spawn(Box::pin(async move {
            let delay = cache.inner.settings.debounce();
            if !sleep_or_cancel(cache.inner.runtime.as_ref(), delay, &token).await {
                return;
            }
            debug!(entity_id = %entity_id, "prefetching run data");
            for kind in PrefetchKind::ALL {
                cache.ensure_started(kind, &entity_id);
            }
        }));
    }

    /// Drop a pending debounce. Fetches already started keep running.
    pub fn cancel(&self) {
        if let Some(token) = self.inner.debounce.borrow_mut().take() {
            token.cancel();
        }
    }

    /// Fetch one kind, sharing a fresh or in-flight result when available.
    pub async fn prefetch(
        &self,
        kind: PrefetchKind,
        entity_id: &str,
    ) -> Result<PrefetchData, PipelineError> {
        self.start(kind, entity_id).await
    }

    /// Resolved data younger than the TTL.
    pub fn read(&self, kind: PrefetchKind, entity_id: &str) -> Option<PrefetchData> {
        let now = self.inner.runtime.now();
        let entries = self.inner.entries.borrow();
        let entry = entries.get(&(kind, entity_id.to_string()))?;
        match (&entry.data, entry.fetched_at) {
            (Some(data), Some(fetched_at)) if self.is_fresh(fetched_at, now) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_in_flight(&self, kind: PrefetchKind, entity_id: &str) -> bool {
        self.inner
            .entries
            .borrow()
            .get(&(kind, entity_id.to_string()))
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove resolved entries older than the TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = self.inner.runtime.now();
        let mut entries = self.inner.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.in_flight.is_some()
                || entry
                    .fetched_at
                    .is_some_and(|fetched_at| self.is_fresh(fetched_at, now))
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired prefetch entries");
        }
        removed
    }

    /// Stop the sweep, drop pending work and clear every entry. Idempotent.
    pub fn dispose(&self) {
        if self.inner.scope.is_cancelled() {
            return;
        }
        self.cancel();
        self.inner.scope.cancel();
        self.inner.entries.borrow_mut().clear();
        info!("prefetch cache disposed");
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        elapsed_between(fetched_at, now) < self.inner.settings.ttl()
    }

    /// Start a fetch without waiting on it; the resolver task fills the entry.
    fn ensure_started(&self, kind: PrefetchKind, entity_id: &str) {
        drop(self.start(kind, entity_id));
    }

    fn start(&self, kind: PrefetchKind, entity_id: &str) -> SharedFetch {
        let key = (kind, entity_id.to_string());
        let now = self.inner.runtime.now();

        if let Some(entry) = self.inner.entries.borrow().get(&key) {
            if let Some(in_flight) = &entry.in_flight {
                return in_flight.clone();
            }
            if let (Some(data), Some(fetched_at)) = (&entry.data, entry.fetched_at) {
                if self.is_fresh(fetched_at, now) {
                    let data = data.clone();
                    return future::ready(Ok(data)).boxed_local().shared();
                }
            }
        }

        let api = self.inner.api.clone();
        let id = entity_id.to_string();
        let fetch: SharedFetch = async move { fetch_kind(api.as_ref(), kind, &id).await }
            .boxed_local()
            .shared();

        // After dispose the fetch still serves its caller but is not cached.
        if self.inner.scope.is_cancelled() {
            return fetch;
        }

        let generation = self.inner.next_generation.get() + 1;
        self.inner.next_generation.set(generation);
        self.inner.entries.borrow_mut().insert(
            key.clone(),
            Entry {
                data: None,
                fetched_at: None,
                in_flight: Some(fetch.clone()),
                generation,
            },
        );

        let cache = self.clone();
        let token = self.inner.scope.child_token();
        let resolver = fetch.clone();
        self.inner.runtime.spawn(Box::pin(async move {
            if let Some(result) = run_or_cancel(resolver, &token).await {
                cache.resolve(key, generation, result);
            }
        }));

        fetch
    }

    fn resolve(&self, key: EntryKey, generation: u64, result: Result<PrefetchData, PipelineError>) {
        let mut entries = self.inner.entries.borrow_mut();
        let current = entries
            .get(&key)
            .is_some_and(|entry| entry.generation == generation);
        if !current {
            return;
        }

        let (kind, entity_id) = &key;
        match result {
            Ok(data) => {
                let fetched_at = self.inner.runtime.now();
                if let Some(entry) = entries.get_mut(&key) {
                    entry.data = Some(data);
                    entry.fetched_at = Some(fetched_at);
                    entry.in_flight = None;
                }
                debug!(entity_id = %entity_id, ?kind, "prefetch resolved");
            }
            Err(err) => {
                entries.remove(&key);
                warn!(entity_id = %entity_id, ?kind, "prefetch failed: {}", err);
            }
        }
    }
}

async fn fetch_kind(
    api: &dyn RunApi,
    kind: PrefetchKind,
    entity_id: &str,
) -> Result<PrefetchData, PipelineError> {
    Ok(match kind {
        PrefetchKind::Run => PrefetchData::Run(api.fetch_run(entity_id).await?),
        PrefetchKind::Traces => PrefetchData::Traces(api.fetch_traces(entity_id).await?),
        PrefetchKind::Metrics => PrefetchData::Metrics(api.fetch_metrics(entity_id).await?),
    })
}
