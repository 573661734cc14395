use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use run_pipeline::config::CacheConfig;
use run_pipeline::resource_cache::{
    CacheRequest, CacheStorage, CachedResponse, FetchOutcome, Lifecycle, MemoryCacheStorage,
    MessageAction, Network, ResourceCache,
};
use run_pipeline::transport::{run_path, trace_stream_path, traces_path};
use run_pipeline::PipelineError;
use serde_json::Value;

#[derive(Default)]
struct FakeNetwork {
    responses: RefCell<HashMap<String, CachedResponse>>,
    offline: Cell<bool>,
    fetched: RefCell<Vec<String>>,
}

impl FakeNetwork {
    fn serving_manifest(config: &CacheConfig) -> Rc<Self> {
        let network = Rc::new(Self::default());
        for url in config.static_manifest.iter().chain(&config.offline_api_endpoints) {
            network.serve(url, 200, &format!("body of {url}"));
        }
        network
    }

    fn serve(&self, url: &str, status: u16, body: &str) {
        self.responses
            .borrow_mut()
            .insert(url.to_string(), CachedResponse::new(status, body.as_bytes().to_vec()));
    }

    fn fetch_count(&self) -> usize {
        self.fetched.borrow().len()
    }
}

#[async_trait(?Send)]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, PipelineError> {
        self.fetched.borrow_mut().push(request.url.clone());
        if self.offline.get() {
            return Err(PipelineError::Transport("network unreachable".to_string()));
        }
        Ok(self
            .responses
            .borrow()
            .get(request.cache_key())
            .cloned()
            .unwrap_or_else(|| CachedResponse::new(404, b"not found".to_vec())))
    }
}

fn setup() -> (ResourceCache, Rc<MemoryCacheStorage>, Rc<FakeNetwork>) {
    let config = CacheConfig::default();
    let storage = Rc::new(MemoryCacheStorage::new());
    let network = FakeNetwork::serving_manifest(&config);
    let cache = ResourceCache::new(config, storage.clone(), network.clone());
    (cache, storage, network)
}

fn body(outcome: FetchOutcome) -> CachedResponse {
    match outcome {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => panic!("expected a response"),
    }
}

#[tokio::test]
async fn test_install_seeds_both_partitions() {
    let (cache, storage, _network) = setup();
    cache.install().await.unwrap();

    assert_eq!(cache.lifecycle(), Lifecycle::Installed);
    assert_eq!(storage.partition_len("run-observer-static-v1"), Some(5));
    assert_eq!(storage.partition_len("run-observer-api-v1"), Some(2));
}

#[tokio::test]
async fn test_failed_install_removes_partial_partitions() {
    let (cache, storage, network) = setup();
    storage
        .put("run-observer-static-v0", "/", &CachedResponse::new(200, b"old".to_vec()))
        .await
        .unwrap();
    network.serve("/assets/main.css", 500, "broken");

    let err = cache.install().await.unwrap_err();
    assert!(matches!(err, PipelineError::Http { status: 500, .. }));
    assert_eq!(cache.lifecycle(), Lifecycle::Redundant);
    assert_eq!(
        storage.partitions().await.unwrap(),
        vec!["run-observer-static-v0".to_string()]
    );
}

#[tokio::test]
async fn test_activate_prunes_other_versions() {
    let (cache, storage, _network) = setup();
    for stale in ["run-observer-static-v0", "run-observer-api-v0", "legacy-cache"] {
        storage
            .put(stale, "/", &CachedResponse::new(200, b"old".to_vec()))
            .await
            .unwrap();
    }
    cache.install().await.unwrap();

    let mut deleted = cache.activate().await.unwrap();
    deleted.sort();
    assert_eq!(
        deleted,
        vec!["legacy-cache", "run-observer-api-v0", "run-observer-static-v0"]
    );
    assert_eq!(
        storage.partitions().await.unwrap(),
        vec!["run-observer-api-v1".to_string(), "run-observer-static-v1".to_string()]
    );
    assert_eq!(cache.lifecycle(), Lifecycle::Activated);
    assert!(cache.has_claimed());
}

#[tokio::test]
async fn test_api_requests_are_network_first_with_offline_fallback() {
    let (cache, storage, network) = setup();
    network.serve("/runs/42", 200, r#"{"id":"42"}"#);

    let fresh = body(cache.handle_fetch(&CacheRequest::get("/runs/42")).await.unwrap());
    assert_eq!(fresh.status, 200);
    assert_eq!(storage.partition_len("run-observer-api-v1"), Some(1));

    network.offline.set(true);
    let cached = body(cache.handle_fetch(&CacheRequest::get("/runs/42")).await.unwrap());
    assert_eq!(cached.body, br#"{"id":"42"}"#.to_vec());

    let offline = body(cache.handle_fetch(&CacheRequest::get("/runs/7")).await.unwrap());
    assert_eq!(offline.status, 503);
    let json: Value = serde_json::from_slice(&offline.body).unwrap();
    assert_eq!(json["error"], "offline");
}

#[tokio::test]
async fn test_traces_are_served_offline_after_a_fetch() {
    let (cache, storage, network) = setup();
    let url = format!("https://observer.local{}", traces_path("42"));
    network.serve(&traces_path("42"), 200, r#"{"traces":[]}"#);

    let fresh = body(cache.handle_fetch(&CacheRequest::get(url.as_str())).await.unwrap());
    assert_eq!(fresh.status, 200);
    assert_eq!(storage.partition_len("run-observer-api-v1"), Some(1));

    network.offline.set(true);
    let cached = body(cache.handle_fetch(&CacheRequest::get(url.as_str())).await.unwrap());
    assert_eq!(cached.status, 200);
    assert_eq!(cached.body, br#"{"traces":[]}"#.to_vec());
}

#[tokio::test]
async fn test_stream_requests_pass_through() {
    let (cache, storage, network) = setup();
    let stream = CacheRequest::get(trace_stream_path("42"));
    assert_eq!(cache.handle_fetch(&stream).await.unwrap(), FetchOutcome::Passthrough);

    let by_header = CacheRequest::get(traces_path("42")).with_accept("text/event-stream");
    assert_eq!(cache.handle_fetch(&by_header).await.unwrap(), FetchOutcome::Passthrough);

    assert_eq!(network.fetch_count(), 0);
    assert_eq!(storage.partition_len("run-observer-api-v1"), None);
}

#[tokio::test]
async fn test_fetch_with_uses_the_given_network() {
    let (cache, storage, shared) = setup();
    let forwarded = FakeNetwork::default();
    forwarded.serve(&run_path("42"), 200, r#"{"id":"42"}"#);

    let response = body(
        cache
            .handle_fetch_with(&CacheRequest::get(run_path("42")), &forwarded)
            .await
            .unwrap(),
    );
    assert_eq!(response.body, br#"{"id":"42"}"#.to_vec());
    assert_eq!(forwarded.fetch_count(), 1);
    assert_eq!(shared.fetch_count(), 0);
    assert_eq!(storage.partition_len("run-observer-api-v1"), Some(1));
}

#[tokio::test]
async fn test_unsuccessful_api_responses_are_not_stored() {
    let (cache, storage, network) = setup();
    network.serve("/runs/1", 500, "boom");

    let response = body(cache.handle_fetch(&CacheRequest::get("/runs/1")).await.unwrap());
    assert_eq!(response.status, 500);
    assert_eq!(storage.partition_len("run-observer-api-v1"), None);
}

#[tokio::test]
async fn test_static_assets_are_cache_first() {
    let (cache, _storage, network) = setup();
    cache.install().await.unwrap();
    let seeded = network.fetch_count();

    let asset = body(cache.handle_fetch(&CacheRequest::get("/assets/app.js")).await.unwrap());
    assert_eq!(asset.body, b"body of /assets/app.js".to_vec());
    assert_eq!(network.fetch_count(), seeded);

    network.serve("/assets/chunk-2.js", 200, "chunk");
    cache
        .handle_fetch(&CacheRequest::get("/assets/chunk-2.js"))
        .await
        .unwrap();
    network.offline.set(true);
    let filled = body(
        cache
            .handle_fetch(&CacheRequest::get("/assets/chunk-2.js"))
            .await
            .unwrap(),
    );
    assert_eq!(filled.body, b"chunk".to_vec());

    let missing = cache.handle_fetch(&CacheRequest::get("/assets/never.js")).await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_offline_navigation_serves_cached_root() {
    let (cache, _storage, network) = setup();
    cache.install().await.unwrap();
    network.offline.set(true);

    let page = body(cache.handle_fetch(&CacheRequest::navigate("/runs/42")).await.unwrap());
    assert_eq!(page.body, b"body of /".to_vec());
}

#[tokio::test]
async fn test_non_get_passes_through_and_skip_waiting() {
    let (cache, _storage, network) = setup();
    let post = CacheRequest {
        method: "POST".to_string(),
        ..CacheRequest::get("/runs")
    };
    assert_eq!(cache.handle_fetch(&post).await.unwrap(), FetchOutcome::Passthrough);
    assert_eq!(network.fetch_count(), 0);

    assert_eq!(cache.handle_message("SKIP_WAITING"), MessageAction::SkipWaiting);
    assert_eq!(
        cache.handle_message(r#"{"type":"SKIP_WAITING"}"#),
        MessageAction::SkipWaiting
    );
    assert_eq!(cache.handle_message(r#"{"type":"PING"}"#), MessageAction::Ignored);
}
