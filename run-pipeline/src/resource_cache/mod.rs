//! Versioned offline cache behind the service worker.
//!
//! Two partitions per version: static assets (cache-first) and API responses
//! (network-first). Installing seeds both; activating deletes every partition
//! that is not part of the current version.

mod route;
mod storage;

use std::cell::Cell;
use std::rc::Rc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

pub use route::{route, Partition, Strategy};
pub use storage::{CacheRequest, CacheStorage, CachedResponse, MemoryCacheStorage, Network, RequestMode};

use crate::config::CacheConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Parsed,
    Installing,
    /// Seeded and waiting to take over.
    Installed,
    Activating,
    Activated,
    /// Install failed; this version never activates.
    Redundant,
}

/// What the host should do with an intercepted request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Let the browser handle it.
    Passthrough,
    Respond(CachedResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    /// Activate now instead of waiting for old clients to go away.
    SkipWaiting,
    Ignored,
}

pub const SKIP_WAITING: &str = "SKIP_WAITING";

pub struct ResourceCache {
    settings: CacheConfig,
    storage: Rc<dyn CacheStorage>,
    network: Rc<dyn Network>,
    lifecycle: Cell<Lifecycle>,
    claimed: Cell<bool>,
}

impl ResourceCache {
    pub fn new(
        settings: CacheConfig,
        storage: Rc<dyn CacheStorage>,
        network: Rc<dyn Network>,
    ) -> Self {
        Self {
            settings,
            storage,
            network,
            lifecycle: Cell::new(Lifecycle::Parsed),
            claimed: Cell::new(false),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Whether open clients have been taken over by this version.
    pub fn has_claimed(&self) -> bool {
        self.claimed.get()
    }

    pub fn partition_name(&self, partition: Partition) -> String {
        format!(
            "{}-{}-{}",
            self.settings.name_prefix,
            partition.label(),
            self.settings.version
        )
    }

    pub fn active_partitions(&self) -> [String; 2] {
        [
            self.partition_name(Partition::Static),
            self.partition_name(Partition::Api),
        ]
    }

    /// Seed both partitions. Any failed entry fails the whole install and
    /// removes what was already seeded.
    pub async fn install(&self) -> Result<(), PipelineError> {
        self.lifecycle.set(Lifecycle::Installing);
        info!(version = %self.settings.version, "installing resource cache");

        match self.seed().await {
            Ok(()) => {
                self.lifecycle.set(Lifecycle::Installed);
                info!(version = %self.settings.version, "resource cache installed");
                Ok(())
            }
            Err(err) => {
                warn!(version = %self.settings.version, "resource cache install failed: {}", err);
                for name in self.active_partitions() {
                    if let Err(cleanup) = self.storage.delete_partition(&name).await {
                        warn!(partition = %name, "failed to remove partial partition: {}", cleanup);
                    }
                }
                self.lifecycle.set(Lifecycle::Redundant);
                Err(err)
            }
        }
    }

    async fn seed(&self) -> Result<(), PipelineError> {
        let groups = [
            (Partition::Static, &self.settings.static_manifest),
            (Partition::Api, &self.settings.offline_api_endpoints),
        ];
        for (partition, urls) in groups {
            let name = self.partition_name(partition);
            for url in urls {
                let request = CacheRequest::get(url.as_str());
                let response = self.network.fetch(&request).await?;
                if !response.is_success() {
                    return Err(PipelineError::Http {
                        status: response.status,
                        message: format!("failed to cache {url}"),
                    });
                }
                self.storage
                    .put(&name, request.cache_key(), &response)
                    .await?;
            }
            debug!(partition = %name, entries = urls.len(), "partition seeded");
        }
        Ok(())
    }

    /// Delete every partition outside the active set, then claim clients.
    /// Returns the deleted partition names.
    pub async fn activate(&self) -> Result<Vec<String>, PipelineError> {
        self.lifecycle.set(Lifecycle::Activating);
        let active = self.active_partitions();

        let mut deleted = Vec::new();
        for name in self.storage.partitions().await? {
            if active.contains(&name) {
                continue;
            }
            if self.storage.delete_partition(&name).await? {
                info!(partition = %name, "deleted stale cache partition");
                deleted.push(name);
            }
        }

        self.claimed.set(true);
        self.lifecycle.set(Lifecycle::Activated);
        info!(version = %self.settings.version, "resource cache activated");
        Ok(deleted)
    }

    /// Accepts the bare `SKIP_WAITING` string or `{"type": "SKIP_WAITING"}`.
    pub fn handle_message(&self, raw: &str) -> MessageAction {
        let kind = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => map
                .get("type")
                .and_then(|value| value.as_str())
                .map(ToString::to_string),
            Ok(serde_json::Value::String(text)) => Some(text),
            _ => Some(raw.trim().to_string()),
        };

        if kind.as_deref() == Some(SKIP_WAITING) {
            info!(lifecycle = ?self.lifecycle.get(), "skip waiting requested");
            MessageAction::SkipWaiting
        } else {
            debug!("ignoring unknown service worker message");
            MessageAction::Ignored
        }
    }

    pub async fn handle_fetch(&self, request: &CacheRequest) -> Result<FetchOutcome, PipelineError> {
        self.handle_fetch_with(request, self.network.as_ref()).await
    }

    /// Like [`handle_fetch`](Self::handle_fetch), with network misses going
    /// through `network` instead of the shared one.
    pub async fn handle_fetch_with(
        &self,
        request: &CacheRequest,
        network: &dyn Network,
    ) -> Result<FetchOutcome, PipelineError> {
        match route(request, &self.settings) {
            Strategy::Passthrough => Ok(FetchOutcome::Passthrough),
            Strategy::NetworkFirst { store } => {
                let response = self.network_first(request, store, network).await?;
                Ok(FetchOutcome::Respond(response))
            }
            Strategy::CacheFirst => self
                .cache_first(request, network)
                .await
                .map(FetchOutcome::Respond),
        }
    }

    async fn network_first(
        &self,
        request: &CacheRequest,
        store: Option<Partition>,
        network: &dyn Network,
    ) -> Result<CachedResponse, PipelineError> {
        let err = match network.fetch(request).await {
            Ok(response) => {
                if let Some(partition) = store.filter(|_| response.is_success()) {
                    let name = self.partition_name(partition);
                    if let Err(err) = self.storage.put(&name, request.cache_key(), &response).await {
                        warn!(partition = %name, "failed to store response: {}", err);
                    }
                }
                return Ok(response);
            }
            Err(err) => err,
        };

        debug!(url = %request.url, "network failed, trying cache: {}", err);
        if let Some(cached) = self.lookup_any(request.cache_key()).await {
            return Ok(cached);
        }
        if request.mode == RequestMode::Navigate {
            if let Some(root) = self.lookup_root().await {
                return Ok(root);
            }
        }
        offline_response(&err)
    }

    async fn cache_first(
        &self,
        request: &CacheRequest,
        network: &dyn Network,
    ) -> Result<CachedResponse, PipelineError> {
        if let Some(cached) = self.lookup_any(request.cache_key()).await {
            return Ok(cached);
        }

        match network.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    let name = self.partition_name(Partition::Static);
                    if let Err(err) = self.storage.put(&name, request.cache_key(), &response).await {
                        warn!(partition = %name, "failed to store response: {}", err);
                    }
                }
                Ok(response)
            }
            Err(err) if request.mode == RequestMode::Navigate => {
                match self.lookup_root().await {
                    Some(root) => Ok(root),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn lookup_any(&self, key: &str) -> Option<CachedResponse> {
        for name in self.active_partitions() {
            match self.storage.lookup(&name, key).await {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(err) => warn!(partition = %name, "cache lookup failed: {}", err),
            }
        }
        None
    }

    async fn lookup_root(&self) -> Option<CachedResponse> {
        let name = self.partition_name(Partition::Static);
        self.storage.lookup(&name, "/").await.ok().flatten()
    }
}

/// 503 JSON body served when an API request cannot reach the network.
pub fn offline_response(err: &PipelineError) -> Result<CachedResponse, PipelineError> {
    CachedResponse::json(
        503,
        &json!({
            "error": "offline",
            "message": err.to_string(),
        }),
    )
}
