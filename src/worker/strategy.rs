//! Strategy execution: bypass, network-first and cache-first.

use std::sync::Arc;

use color_eyre::Result;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use url::Origin;

use crate::cache::{CacheStore, EntryKey, Namespace, Served};
use crate::http::{CacheEntry, Network, Request, RequestDescriptor, Response};

use super::classify::{classify, RequestClass};
use super::fallback::FallbackProvider;

/// Executes the strategy for each classified request.
///
/// | class | strategy |
/// |-------|----------|
/// | non-idempotent, cross-origin | network only, store untouched |
/// | navigation | network first, then cache, then offline page |
/// | resource | cache first, then network, then placeholder |
///
/// Writes back into the store are spawned and not awaited: the caller gets its
/// response before the write lands.
pub struct StrategyEngine {
  store: Arc<dyn CacheStore>,
  network: Arc<dyn Network>,
  fallback: FallbackProvider,
  origin: Origin,
  writes: TaskTracker,
  /// Held for a whole close/wait/reopen cycle
  flushing: tokio::sync::Mutex<()>,
}

impl StrategyEngine {
  pub fn new(
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    fallback: FallbackProvider,
    origin: Origin,
  ) -> Self {
    Self {
      store,
      network,
      fallback,
      origin,
      writes: TaskTracker::new(),
      flushing: tokio::sync::Mutex::new(()),
    }
  }

  /// Answer one request against the given namespace.
  pub async fn respond(&self, namespace: &Namespace, request: &Request) -> Result<Served> {
    let descriptor = RequestDescriptor::new(request, &self.origin);
    let class = classify(&descriptor);
    debug!(url = %descriptor.url, method = %descriptor.method, ?class, "intercepted");

    match class {
      RequestClass::NonIdempotent | RequestClass::CrossOrigin => self.bypass(request).await,
      RequestClass::Navigation => self.network_first(namespace, request, &descriptor).await,
      RequestClass::Resource => self.cache_first(namespace, request, &descriptor).await,
    }
  }

  /// Forward to the network without touching the store.
  pub async fn bypass(&self, request: &Request) -> Result<Served> {
    let response = self.network.fetch(request).await?;
    Ok(Served::from_network(response))
  }

  /// Network, then the stored copy, then the offline page.
  async fn network_first(
    &self,
    namespace: &Namespace,
    request: &Request,
    descriptor: &RequestDescriptor,
  ) -> Result<Served> {
    let key = EntryKey::new(&request.method, &request.url);

    match self.network.fetch(request).await {
      Ok(response) => {
        self.refill(namespace, key, &response);
        Ok(Served::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network unavailable, trying cache");
        if let Some(entry) = self.lookup(namespace, &key).await {
          return Ok(Served::from_cache(entry));
        }
        self
          .fallback
          .provide(namespace, RequestClass::Navigation, descriptor)
          .await
      }
    }
  }

  /// Stored copy, then the network, then the placeholder (images only).
  async fn cache_first(
    &self,
    namespace: &Namespace,
    request: &Request,
    descriptor: &RequestDescriptor,
  ) -> Result<Served> {
    let key = EntryKey::new(&request.method, &request.url);

    if let Some(entry) = self.lookup(namespace, &key).await {
      return Ok(Served::from_cache(entry));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.refill(namespace, key, &response);
        Ok(Served::from_network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network unavailable on cache miss");
        self
          .fallback
          .provide(namespace, RequestClass::Resource, descriptor)
          .await
      }
    }
  }

  /// Read the store, treating a storage error like a miss.
  async fn lookup(&self, namespace: &Namespace, key: &EntryKey) -> Option<CacheEntry> {
    match self.store.get(namespace, key).await {
      Ok(entry) => entry,
      Err(e) => {
        warn!(namespace = %namespace, key = %key, error = %e, "cache read failed");
        None
      }
    }
  }

  /// Store a copy of `response` in the background.
  fn refill(&self, namespace: &Namespace, key: EntryKey, response: &Response) {
    let store = Arc::clone(&self.store);
    let namespace = namespace.clone();
    let entry = CacheEntry::capture(response.clone());

    self.writes.spawn(async move {
      if let Err(e) = store.put(&namespace, &key, entry).await {
        warn!(namespace = %namespace, key = %key, error = %e, "cache write failed");
      }
    });
  }

  /// Wait for every background write started so far.
  ///
  /// Concurrent callers take turns, so a `reopen` from one cannot strand
  /// another in `wait`.
  pub async fn flush(&self) {
    let _turn = self.flushing.lock().await;
    self.writes.close();
    self.writes.wait().await;
    self.writes.reopen();
  }
}
