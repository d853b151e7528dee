//! Install and activation of a cache version.
//!
//! ```text
//! Uninitialized -> Installing -> Installed -> Activating -> Active
//! ```
//!
//! Install fetches the whole precache manifest before writing anything, so a
//! failed install leaves the store as it was. Activation deletes every other
//! namespace and only then claims clients, so an open page never sees two
//! versions mixed.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::{join_all, try_join_all};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStore, CacheVersion, EntryKey, Namespace};
use crate::http::{CacheEntry, Network, Request, Response};

use super::clients::Clients;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninitialized,
  Installing,
  Installed,
  Activating,
  Active,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Uninitialized => "uninitialized",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Active => "active",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
  /// Activate straight after install
  pub skip_waiting: bool,
  /// Take over already registered clients on activation
  pub claim_clients: bool,
}

#[cfg(test)]
impl Default for LifecycleOptions {
  fn default() -> Self {
    Self {
      skip_waiting: true,
      claim_clients: true,
    }
  }
}

/// What activation did to the store and the clients.
#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  pub deleted: Vec<Namespace>,
  /// Stale namespaces that could not be deleted (left in place, never read)
  pub failed: Vec<Namespace>,
  pub claimed: usize,
}

#[derive(Debug)]
pub enum StartOutcome {
  /// Installed and activated the current version
  Active {
    namespace: Namespace,
    report: ActivationReport,
  },
  /// Installed, waiting for an explicit activation
  Waiting { namespace: Namespace },
  /// Install failed; serving an earlier namespace of the same app
  Degraded { namespace: Namespace, error: Report },
}

struct Inner {
  state: LifecycleState,
  /// Namespace new clients are put under
  serving: Option<Namespace>,
}

pub struct LifecycleManager {
  store: Arc<dyn CacheStore>,
  network: Arc<dyn Network>,
  version: CacheVersion,
  manifest: Vec<Url>,
  options: LifecycleOptions,
  clients: Arc<Clients>,
  inner: RwLock<Inner>,
}

impl LifecycleManager {
  pub fn new(
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    version: CacheVersion,
    manifest: Vec<Url>,
    options: LifecycleOptions,
    clients: Arc<Clients>,
  ) -> Self {
    Self {
      store,
      network,
      version,
      manifest,
      options,
      clients,
      inner: RwLock::new(Inner {
        state: LifecycleState::Uninitialized,
        serving: None,
      }),
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.inner.read().unwrap_or_else(PoisonError::into_inner).state
  }

  pub fn serving(&self) -> Option<Namespace> {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .serving
      .clone()
  }

  /// Move to `to` if the current state is one of `from`. Returns the prior state.
  fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> Result<LifecycleState> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    let prior = inner.state;
    if !from.contains(&prior) {
      return Err(eyre!("Cannot move to {} while {}", to, prior));
    }
    inner.state = to;
    Ok(prior)
  }

  fn set_state(&self, state: LifecycleState) {
    self.inner.write().unwrap_or_else(PoisonError::into_inner).state = state;
  }

  fn set_serving(&self, namespace: Namespace) {
    self
      .inner
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .serving = Some(namespace);
  }

  /// Populate the current namespace with the precache manifest.
  ///
  /// On failure the previous state is restored and the error returned; a
  /// later call may retry.
  pub async fn install(&self) -> Result<()> {
    use LifecycleState::*;

    let prior = self.transition(&[Uninitialized, Installed, Active], Installing)?;
    info!(version = %self.version, assets = self.manifest.len(), "installing");

    match self.populate().await {
      Ok(()) => {
        self.set_state(if prior == Active { Active } else { Installed });
        info!(namespace = %self.version.namespace(), "installed");
        Ok(())
      }
      Err(e) => {
        self.set_state(prior);
        warn!(version = %self.version, error = %e, "install failed");
        Err(e)
      }
    }
  }

  async fn populate(&self) -> Result<()> {
    let namespace = self.version.namespace();

    let fetched = try_join_all(self.manifest.iter().map(|url| self.precache(url))).await?;

    let existed = self.store.list_namespaces().await?.contains(&namespace);
    self.store.open(&namespace).await?;

    for (key, response) in fetched {
      if let Err(e) = self
        .store
        .put(&namespace, &key, CacheEntry::capture(response))
        .await
      {
        if !existed {
          if let Err(cleanup) = self.store.delete(&namespace).await {
            warn!(namespace = %namespace, error = %cleanup, "failed to remove partial install");
          }
        }
        return Err(eyre!("Failed to precache {}: {}", key, e));
      }
    }

    Ok(())
  }

  /// Fetch one manifest entry. Any status outside 2xx fails the install.
  async fn precache(&self, url: &Url) -> Result<(EntryKey, Response)> {
    let response = self
      .network
      .fetch(&Request::get(url.clone()))
      .await
      .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;
    if !response.ok() {
      return Err(eyre!("Failed to precache {}: status {}", url, response.status));
    }
    Ok((EntryKey::get(url), response))
  }

  /// Delete every namespace except the current one, then claim clients.
  pub async fn activate(&self) -> Result<ActivationReport> {
    self.transition(&[LifecycleState::Installed], LifecycleState::Activating)?;
    let current = self.version.namespace();

    let namespaces = match self.store.list_namespaces().await {
      Ok(namespaces) => namespaces,
      Err(e) => {
        warn!(error = %e, "failed to list namespaces, skipping eviction");
        Default::default()
      }
    };

    let stale: Vec<Namespace> = namespaces.into_iter().filter(|ns| *ns != current).collect();
    let results = join_all(stale.into_iter().map(|ns| async move {
      let result = self.store.delete(&ns).await;
      (ns, result)
    }))
    .await;

    // Every deletion has been attempted; only now may clients be claimed
    let mut report = ActivationReport::default();
    for (ns, result) in results {
      match result {
        Ok(()) => {
          info!(namespace = %ns, "deleted stale namespace");
          report.deleted.push(ns);
        }
        Err(e) => {
          warn!(namespace = %ns, error = %e, "failed to delete stale namespace");
          report.failed.push(ns);
        }
      }
    }

    self.set_serving(current.clone());
    if self.options.claim_clients {
      report.claimed = self.clients.claim(&current);
    }
    self.set_state(LifecycleState::Active);
    info!(namespace = %current, claimed = report.claimed, "activated");

    Ok(report)
  }

  /// Bring the engine up: install, then activate unless told to wait.
  ///
  /// When install fails, the newest earlier namespace of the same app keeps
  /// serving. Only when there is none does the install error come back.
  pub async fn start(&self) -> Result<StartOutcome> {
    let namespace = self.version.namespace();

    if let Err(error) = self.install().await {
      return match self.previous_namespace().await? {
        Some(previous) => {
          warn!(namespace = %previous, "serving previous version");
          self.set_serving(previous.clone());
          if self.options.claim_clients {
            self.clients.claim(&previous);
          }
          Ok(StartOutcome::Degraded {
            namespace: previous,
            error,
          })
        }
        None => Err(error),
      };
    }

    if self.state() == LifecycleState::Active {
      return Ok(StartOutcome::Active {
        namespace,
        report: ActivationReport::default(),
      });
    }
    if !self.options.skip_waiting {
      return Ok(StartOutcome::Waiting { namespace });
    }

    let report = self.activate().await?;
    Ok(StartOutcome::Active { namespace, report })
  }

  /// Newest stored namespace of this app not newer than the current version.
  async fn previous_namespace(&self) -> Result<Option<Namespace>> {
    let namespaces = self.store.list_namespaces().await?;

    // Hand back the stored name; `app-v01` parses to the same number as `app-v1`
    Ok(
      namespaces
        .into_iter()
        .filter_map(|ns| CacheVersion::parse(ns.as_str()).map(|v| (v, ns)))
        .filter(|(v, _)| v.app == self.version.app && v.number <= self.version.number)
        .max_by_key(|(v, _)| v.number)
        .map(|(_, ns)| ns),
    )
  }
}
