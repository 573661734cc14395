use std::cell::RefCell;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    Other,
}

/// The parts of an intercepted request the cache layer looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    pub method: String,
    pub url: String,
    pub mode: RequestMode,
    /// `Accept` header, when the request carried one.
    pub accept: Option<String>,
}

impl CacheRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            mode: RequestMode::Other,
            accept: None,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Long-lived server-push request: `stream=true` in the query or an
    /// `Accept: text/event-stream` header.
    pub fn is_event_stream(&self) -> bool {
        let query = self.cache_key().split_once('?').map_or("", |(_, query)| query);
        query.split('&').any(|pair| pair == "stream=true")
            || self
                .accept
                .as_deref()
                .is_some_and(|accept| accept.to_ascii_lowercase().contains("text/event-stream"))
    }

    /// Path without origin, query or fragment.
    pub fn path(&self) -> &str {
        let key = self.cache_key();
        match key.find('?') {
            Some(query) => &key[..query],
            None => key,
        }
    }

    /// Path and query without origin or fragment; entries are stored under it.
    pub fn cache_key(&self) -> &str {
        let url = match self.url.find('#') {
            Some(fragment) => &self.url[..fragment],
            None => self.url.as_str(),
        };
        let Some(scheme_end) = url.find("://") else {
            return url;
        };
        let after_scheme = &url[scheme_end + 3..];
        match after_scheme.find('/') {
            Some(path_start) => &after_scheme[path_start..],
            None => "/",
        }
    }
}

/// A response as stored in or served from a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, PipelineError> {
        Ok(Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(value)?,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Named response stores, mirroring the browser `CacheStorage` API.
#[async_trait(?Send)]
pub trait CacheStorage {
    async fn partitions(&self) -> Result<Vec<String>, PipelineError>;

    /// Returns whether the partition existed.
    async fn delete_partition(&self, name: &str) -> Result<bool, PipelineError>;

    async fn put(
        &self,
        partition: &str,
        key: &str,
        response: &CachedResponse,
    ) -> Result<(), PipelineError>;

    async fn lookup(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, PipelineError>;
}

/// Outbound network access from the interception layer.
#[async_trait(?Send)]
pub trait Network {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, PipelineError>;
}

#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    partitions: RefCell<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition_len(&self, name: &str) -> Option<usize> {
        self.partitions.borrow().get(name).map(BTreeMap::len)
    }
}

#[async_trait(?Send)]
impl CacheStorage for MemoryCacheStorage {
    async fn partitions(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.partitions.borrow().keys().cloned().collect())
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, PipelineError> {
        Ok(self.partitions.borrow_mut().remove(name).is_some())
    }

    async fn put(
        &self,
        partition: &str,
        key: &str,
        response: &CachedResponse,
    ) -> Result<(), PipelineError> {
        self.partitions
            .borrow_mut()
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn lookup(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, PipelineError> {
        Ok(self
            .partitions
            .borrow()
            .get(partition)
            .and_then(|entries| entries.get(key))
            .cloned())
    }
}
