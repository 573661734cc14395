//! Service worker glue: browser `CacheStorage` and `fetch` behind the
//! resource cache, plus install/activate/fetch/message event wiring.

use std::rc::Rc;

use async_trait::async_trait;
use run_pipeline::config::PipelineConfig;
use run_pipeline::resource_cache::{
    route, CacheRequest, CacheStorage, CachedResponse, FetchOutcome, MessageAction, Network,
    RequestMode, Strategy,
};
use run_pipeline::{PipelineError, ResourceCache};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};
use web_sys::{
    ExtendableEvent, ExtendableMessageEvent, FetchEvent, Headers, Request, RequestInit, Response,
    ResponseInit, ServiceWorkerGlobalScope, WorkerGlobalScope,
};

fn js_error(context: &str, err: JsValue) -> PipelineError {
    PipelineError::Cache(format!("{context}: {err:?}"))
}

async fn await_promise(promise: js_sys::Promise, context: &str) -> Result<JsValue, PipelineError> {
    JsFuture::from(promise)
        .await
        .map_err(|e| js_error(context, e))
}

/// `CacheStorage` partitions backed by `self.caches`.
pub struct BrowserCacheStorage {
    caches: web_sys::CacheStorage,
}

impl BrowserCacheStorage {
    pub fn new(caches: web_sys::CacheStorage) -> Self {
        Self { caches }
    }

    async fn open(&self, partition: &str) -> Result<web_sys::Cache, PipelineError> {
        let cache = await_promise(self.caches.open(partition), "open cache").await?;
        cache
            .dyn_into::<web_sys::Cache>()
            .map_err(|e| js_error("open cache", e))
    }
}

#[async_trait(?Send)]
impl CacheStorage for BrowserCacheStorage {
    async fn partitions(&self) -> Result<Vec<String>, PipelineError> {
        let keys = await_promise(self.caches.keys(), "list caches").await?;
        Ok(js_sys::Array::from(&keys)
            .iter()
            .filter_map(|name| name.as_string())
            .collect())
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, PipelineError> {
        let deleted = await_promise(self.caches.delete(name), "delete cache").await?;
        Ok(deleted.as_bool().unwrap_or(false))
    }

    async fn put(
        &self,
        partition: &str,
        key: &str,
        response: &CachedResponse,
    ) -> Result<(), PipelineError> {
        let cache = self.open(partition).await?;
        let response = to_web_response(response)?;
        await_promise(cache.put_with_str(key, &response), "cache put").await?;
        Ok(())
    }

    async fn lookup(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, PipelineError> {
        let cache = self.open(partition).await?;
        let found = await_promise(cache.match_with_str(key), "cache match").await?;
        if found.is_undefined() || found.is_null() {
            return Ok(None);
        }
        let response = found
            .dyn_into::<Response>()
            .map_err(|e| js_error("cache match", e))?;
        from_web_response(&response).await.map(Some)
    }
}

/// Outbound `fetch` from the worker scope, for requests the worker makes
/// itself (install seeding).
pub struct ScopeNetwork {
    scope: WorkerGlobalScope,
}

impl ScopeNetwork {
    pub fn new(scope: WorkerGlobalScope) -> Self {
        Self { scope }
    }
}

#[async_trait(?Send)]
impl Network for ScopeNetwork {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, PipelineError> {
        let init = RequestInit::new();
        init.set_method(&request.method);
        let web_request = Request::new_with_str_and_init(&request.url, &init)
            .map_err(|e| PipelineError::Transport(format!("invalid request: {e:?}")))?;
        fetch_web_request(&self.scope, &web_request).await
    }
}

/// Sends the intercepted request itself, with its headers, credentials and
/// mode, whatever `CacheRequest` it is asked for.
struct EventNetwork {
    scope: WorkerGlobalScope,
    request: Request,
}

#[async_trait(?Send)]
impl Network for EventNetwork {
    async fn fetch(&self, _request: &CacheRequest) -> Result<CachedResponse, PipelineError> {
        fetch_web_request(&self.scope, &self.request).await
    }
}

async fn fetch_web_request(
    scope: &WorkerGlobalScope,
    request: &Request,
) -> Result<CachedResponse, PipelineError> {
    let response = JsFuture::from(scope.fetch_with_request(request))
        .await
        .map_err(|e| PipelineError::Transport(format!("fetch failed: {e:?}")))?
        .dyn_into::<Response>()
        .map_err(|e| PipelineError::Transport(format!("fetch failed: {e:?}")))?;
    from_web_response(&response).await
}

fn to_web_response(response: &CachedResponse) -> Result<Response, PipelineError> {
    let headers = Headers::new().map_err(|e| js_error("build headers", e))?;
    for (name, value) in &response.headers {
        headers
            .append(name, value)
            .map_err(|e| js_error("build headers", e))?;
    }
    let init = ResponseInit::new();
    init.set_status(response.status);
    init.set_headers(&headers);

    let mut body = response.body.clone();
    Response::new_with_opt_u8_array_and_init(Some(&mut body), &init)
        .map_err(|e| js_error("build response", e))
}

async fn from_web_response(response: &Response) -> Result<CachedResponse, PipelineError> {
    let mut headers = Vec::new();
    for entry in response.headers().entries() {
        let entry = js_sys::Array::from(&entry.map_err(|e| js_error("read headers", e))?);
        if let (Some(name), Some(value)) = (entry.get(0).as_string(), entry.get(1).as_string()) {
            headers.push((name, value));
        }
    }

    let buffer_promise = response
        .array_buffer()
        .map_err(|e| js_error("read body", e))?;
    let buffer = await_promise(buffer_promise, "read body").await?;
    let body = js_sys::Uint8Array::new(&buffer).to_vec();

    Ok(CachedResponse {
        status: response.status(),
        headers,
        body,
    })
}

fn cache_request(request: &Request) -> CacheRequest {
    CacheRequest {
        method: request.method(),
        url: request.url(),
        mode: if request.mode() == web_sys::RequestMode::Navigate {
            RequestMode::Navigate
        } else {
            RequestMode::Other
        },
        accept: request.headers().get("accept").ok().flatten(),
    }
}

/// Message payloads are either a bare string or a JSON object.
fn message_text(data: &JsValue) -> String {
    data.as_string()
        .or_else(|| {
            js_sys::JSON::stringify(data)
                .ok()
                .and_then(|text| text.as_string())
        })
        .unwrap_or_default()
}

fn into_promise<F>(fut: F) -> js_sys::Promise
where
    F: std::future::Future<Output = Result<JsValue, PipelineError>> + 'static,
{
    future_to_promise(async move { fut.await.map_err(|e| JsValue::from_str(&e.to_string())) })
}

/// Register the lifecycle handlers on the service worker global scope.
///
/// `config_json` is the serialized `PipelineConfig`; an empty string uses
/// the defaults.
#[wasm_bindgen]
pub fn start_service_worker(config_json: &str) -> Result<(), JsValue> {
    crate::init_logging();

    let config = if config_json.trim().is_empty() {
        PipelineConfig::default()
    } else {
        PipelineConfig::from_json(config_json).map_err(|e| JsValue::from_str(&e.to_string()))?
    };

    let scope = js_sys::global().dyn_into::<ServiceWorkerGlobalScope>()?;
    let caches = scope.caches()?;
    let settings = config.cache.clone();
    let cache = Rc::new(ResourceCache::new(
        config.cache,
        Rc::new(BrowserCacheStorage::new(caches)),
        Rc::new(ScopeNetwork::new(scope.clone().unchecked_into())),
    ));

    let install_cache = cache.clone();
    let on_install = Closure::wrap(Box::new(move |event: ExtendableEvent| {
        let cache = install_cache.clone();
        let promise = into_promise(async move {
            cache.install().await?;
            Ok(JsValue::UNDEFINED)
        });
        if let Err(e) = event.wait_until(&promise) {
            dioxus_logger::tracing::error!("install waitUntil failed: {:?}", e);
        }
    }) as Box<dyn FnMut(ExtendableEvent)>);
    scope.set_oninstall(Some(on_install.as_ref().unchecked_ref()));

    let activate_cache = cache.clone();
    let activate_scope = scope.clone();
    let on_activate = Closure::wrap(Box::new(move |event: ExtendableEvent| {
        let cache = activate_cache.clone();
        let clients = activate_scope.clients();
        let promise = into_promise(async move {
            let deleted = cache.activate().await?;
            dioxus_logger::tracing::info!("Activated, removed {} stale caches", deleted.len());
            await_promise(clients.claim(), "claim clients").await
        });
        if let Err(e) = event.wait_until(&promise) {
            dioxus_logger::tracing::error!("activate waitUntil failed: {:?}", e);
        }
    }) as Box<dyn FnMut(ExtendableEvent)>);
    scope.set_onactivate(Some(on_activate.as_ref().unchecked_ref()));

    let fetch_cache = cache.clone();
    let fetch_scope: WorkerGlobalScope = scope.clone().unchecked_into();
    let on_fetch = Closure::wrap(Box::new(move |event: FetchEvent| {
        let original = event.request();
        let request = cache_request(&original);
        if route(&request, &settings) == Strategy::Passthrough {
            return;
        }
        let cache = fetch_cache.clone();
        let network = EventNetwork {
            scope: fetch_scope.clone(),
            request: original,
        };
        let promise = into_promise(async move {
            match cache.handle_fetch_with(&request, &network).await? {
                FetchOutcome::Respond(response) => Ok(to_web_response(&response)?.into()),
                FetchOutcome::Passthrough => Err(PipelineError::Cache(
                    "request is not handled by the cache".to_string(),
                )),
            }
        });
        if let Err(e) = event.respond_with(&promise) {
            dioxus_logger::tracing::error!("respondWith failed: {:?}", e);
        }
    }) as Box<dyn FnMut(FetchEvent)>);
    scope.set_onfetch(Some(on_fetch.as_ref().unchecked_ref()));

    let message_scope = scope.clone();
    let on_message = Closure::wrap(Box::new(move |event: ExtendableMessageEvent| {
        if cache.handle_message(&message_text(&event.data())) == MessageAction::SkipWaiting {
            if let Err(e) = message_scope.skip_waiting() {
                dioxus_logger::tracing::error!("skipWaiting failed: {:?}", e);
            }
        }
    }) as Box<dyn FnMut(ExtendableMessageEvent)>);
    scope.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

    // Handlers live as long as the worker global scope.
    on_install.forget();
    on_activate.forget();
    on_fetch.forget();
    on_message.forget();

    dioxus_logger::tracing::info!("Service worker handlers registered");
    Ok(())
}
