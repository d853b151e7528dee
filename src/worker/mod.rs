//! The offline cache engine.
//!
//! [`Worker`] ties together the lifecycle (install/activate), the client
//! registry and the per-request strategies. Requests from clients that are not
//! controlled by a namespace pass straight through to the network.

mod classify;
mod clients;
mod fallback;
mod lifecycle;
mod strategy;

use std::sync::Arc;

use color_eyre::Result;
use tracing::warn;

use crate::cache::{CacheStore, Served};
use crate::config::Config;
use crate::http::{Network, Request};

use clients::Clients;
use fallback::FallbackProvider;
use lifecycle::{LifecycleManager, LifecycleOptions};
use strategy::StrategyEngine;

pub use clients::ClientId;
pub use lifecycle::{ActivationReport, LifecycleState, StartOutcome};

pub struct Worker {
  lifecycle: LifecycleManager,
  engine: StrategyEngine,
  clients: Arc<Clients>,
}

impl Worker {
  /// Build the engine around an injected store and network.
  pub fn new(config: &Config, store: Arc<dyn CacheStore>, network: Arc<dyn Network>) -> Result<Self> {
    let clients = Arc::new(Clients::new());

    let fallback = FallbackProvider::new(
      Arc::clone(&store),
      &config.offline_page_url()?,
      config.placeholder_url()?.as_ref(),
    );
    let engine = StrategyEngine::new(
      Arc::clone(&store),
      Arc::clone(&network),
      fallback,
      config.origin(),
    );
    let lifecycle = LifecycleManager::new(
      store,
      network,
      config.version(),
      config.precache_urls()?,
      LifecycleOptions {
        skip_waiting: config.lifecycle.skip_waiting,
        claim_clients: config.lifecycle.claim_clients,
      },
      Arc::clone(&clients),
    );

    Ok(Self {
      lifecycle,
      engine,
      clients,
    })
  }

  pub async fn start(&self) -> Result<StartOutcome> {
    self.lifecycle.start().await
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle.activate().await
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  #[cfg(test)]
  pub fn serving(&self) -> Option<crate::cache::Namespace> {
    self.lifecycle.serving()
  }

  /// Register a page. It is controlled right away if a namespace is being served.
  pub fn register_client(&self) -> ClientId {
    self.clients.register(self.lifecycle.serving())
  }

  pub fn unregister_client(&self, id: ClientId) {
    self.clients.unregister(id);
  }

  /// Answer one request from `client`.
  ///
  /// Failures stay local to this request and come back as [`Served::failed`].
  pub async fn handle(&self, client: ClientId, request: &Request) -> Served {
    let result = match self.clients.controller(client) {
      Some(namespace) => self.engine.respond(&namespace, request).await,
      None => self.engine.bypass(request).await,
    };

    result.unwrap_or_else(|e| {
      warn!(%client, url = %request.url, error = %e, "request failed");
      Served::failed()
    })
  }

  /// Wait for background cache writes to land.
  pub async fn flush(&self) {
    self.engine.flush().await;
  }
}
