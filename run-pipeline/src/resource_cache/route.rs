use super::storage::{CacheRequest, RequestMode};
use crate::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Static,
    Api,
}

impl Partition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted.
    Passthrough,
    /// Network, falling back to the cache; `store` keeps successful responses.
    NetworkFirst { store: Option<Partition> },
    /// Cache, filling from the network on a miss.
    CacheFirst,
}

pub fn route(request: &CacheRequest, settings: &CacheConfig) -> Strategy {
    if !request.is_get() || request.is_event_stream() {
        return Strategy::Passthrough;
    }

    // Navigations under the API prefix are page loads of client routes.
    let path = request.path();
    if request.mode != RequestMode::Navigate && path.starts_with(&settings.api_prefix) {
        return Strategy::NetworkFirst {
            store: Some(Partition::Api),
        };
    }
    if path == "/"
        || path.starts_with(&settings.static_prefix)
        || settings.static_manifest.iter().any(|entry| entry == path)
    {
        return Strategy::CacheFirst;
    }
    Strategy::NetworkFirst { store: None }
}
