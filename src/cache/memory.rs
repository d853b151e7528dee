//! In-memory cache store, used for `--ephemeral` runs and in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::http::CacheEntry;

use super::traits::{CacheStore, EntryKey, Namespace};

type Namespaces = BTreeMap<Namespace, BTreeMap<EntryKey, CacheEntry>>;

#[derive(Default)]
pub struct MemoryStore {
  namespaces: Mutex<Namespaces>,
  quota_bytes: Option<u64>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Limit the total body bytes held across all namespaces.
  pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
    self.quota_bytes = quota_bytes;
    self
  }

  fn lock(&self) -> Result<MutexGuard<'_, Namespaces>> {
    self
      .namespaces
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[async_trait]
impl CacheStore for MemoryStore {
  async fn open(&self, namespace: &Namespace) -> Result<Namespace> {
    self.lock()?.entry(namespace.clone()).or_default();
    Ok(namespace.clone())
  }

  async fn put(&self, namespace: &Namespace, key: &EntryKey, entry: CacheEntry) -> Result<()> {
    let mut namespaces = self.lock()?;

    if let Some(quota) = self.quota_bytes {
      let used: u64 = namespaces
        .values()
        .flat_map(|entries| entries.values())
        .map(CacheEntry::size)
        .sum();
      let replaced = namespaces
        .get(namespace)
        .and_then(|entries| entries.get(key))
        .map(CacheEntry::size)
        .unwrap_or(0);
      if used - replaced + entry.size() > quota {
        return Err(eyre!(
          "Storage quota exceeded: writing {} bytes for {} (quota {} bytes)",
          entry.size(),
          key,
          quota
        ));
      }
    }

    let entries = namespaces
      .get_mut(namespace)
      .ok_or_else(|| eyre!("Namespace {} does not exist", namespace))?;
    entries.insert(key.clone(), entry);
    Ok(())
  }

  async fn get(&self, namespace: &Namespace, key: &EntryKey) -> Result<Option<CacheEntry>> {
    Ok(
      self
        .lock()?
        .get(namespace)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  async fn list_namespaces(&self) -> Result<BTreeSet<Namespace>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  async fn delete(&self, namespace: &Namespace) -> Result<()> {
    self.lock()?.remove(namespace);
    Ok(())
  }
}
