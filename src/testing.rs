//! Test doubles for the network and the store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::cache::{CacheStore, EntryKey, MemoryStore, Namespace};
use crate::http::{CacheEntry, Network, Request, Response};

pub const ORIGIN: &str = "http://localhost:3000";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn html(body: &str) -> Response {
  Response::new(
    200,
    vec![("content-type".to_string(), "text/html".to_string())],
    body.to_string(),
  )
}

/// Scripted network: fixed routes, an offline switch and per-URL failures.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  fetches: AtomicUsize,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Routes for every asset in the example precache manifest.
  pub fn with_app_shell() -> Self {
    let network = Self::new();
    network.route("/", html("home"));
    network.route("/offline", html("offline"));
    network.route(
      "/manifest.json",
      Response::new(200, Vec::new(), r#"{"name":"AI Life Companion"}"#),
    );
    network.route("/icon.svg", Response::new(200, Vec::new(), "<svg/>"));
    network
  }

  pub fn route(&self, path: &str, response: Response) {
    self.route_url(&url(path), response);
  }

  pub fn route_url(&self, url: &Url, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(url(path).to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    tokio::task::yield_now().await;

    let key = request.url.to_string();
    if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&key) {
      return Err(eyre!("Failed to fetch {}: network unreachable", key));
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .unwrap_or_else(|| Response::new(404, Vec::new(), "not found")),
    )
  }
}

type DeleteHook = Box<dyn Fn(&Namespace) + Send + Sync>;

/// Memory store that counts calls and can be told to fail deletions.
#[derive(Default)]
pub struct RecordingStore {
  inner: MemoryStore,
  gets: AtomicUsize,
  puts: AtomicUsize,
  failing_deletes: Mutex<HashSet<Namespace>>,
  on_delete: Mutex<Option<DeleteHook>>,
}

impl RecordingStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_count(&self) -> usize {
    self.gets.load(Ordering::SeqCst)
  }

  pub fn put_count(&self) -> usize {
    self.puts.load(Ordering::SeqCst)
  }

  pub fn fail_delete(&self, namespace: &Namespace) {
    self.failing_deletes.lock().unwrap().insert(namespace.clone());
  }

  /// Run `hook` at the start of every `delete`.
  pub fn on_delete(&self, hook: impl Fn(&Namespace) + Send + Sync + 'static) {
    *self.on_delete.lock().unwrap() = Some(Box::new(hook));
  }
}

#[async_trait]
impl CacheStore for RecordingStore {
  async fn open(&self, namespace: &Namespace) -> Result<Namespace> {
    self.inner.open(namespace).await
  }

  async fn put(&self, namespace: &Namespace, key: &EntryKey, entry: CacheEntry) -> Result<()> {
    self.puts.fetch_add(1, Ordering::SeqCst);
    self.inner.put(namespace, key, entry).await
  }

  async fn get(&self, namespace: &Namespace, key: &EntryKey) -> Result<Option<CacheEntry>> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    self.inner.get(namespace, key).await
  }

  async fn list_namespaces(&self) -> Result<BTreeSet<Namespace>> {
    self.inner.list_namespaces().await
  }

  async fn delete(&self, namespace: &Namespace) -> Result<()> {
    {
      let hook = self.on_delete.lock().unwrap();
      if let Some(hook) = hook.as_ref() {
        hook(namespace);
      }
    }
    if self.failing_deletes.lock().unwrap().contains(namespace) {
      return Err(eyre!("Failed to delete namespace {}: disk I/O error", namespace));
    }
    self.inner.delete(namespace).await
  }
}

/// Shorthand for pairing a store with the test-facing handle.
pub fn recording_store() -> (Arc<RecordingStore>, Arc<dyn CacheStore>) {
  let store = Arc::new(RecordingStore::new());
  let dyn_store: Arc<dyn CacheStore> = store.clone();
  (store, dyn_store)
}
