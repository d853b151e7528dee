//! Core traits and types for the caching system.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use reqwest::Method;
use url::Url;

use crate::http::{CacheEntry, Response};

/// Identifier of one versioned partition of the store (e.g. `ai-life-companion-v1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(String);

impl Namespace {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Namespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Application identifier plus a deploy counter.
///
/// The namespace name is derived from this value and nothing else, so install
/// and activation can never disagree on the format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheVersion {
  pub app: String,
  pub number: u32,
}

impl CacheVersion {
  pub fn new(app: impl Into<String>, number: u32) -> Self {
    Self {
      app: app.into(),
      number,
    }
  }

  pub fn namespace(&self) -> Namespace {
    Namespace(format!("{}-v{}", self.app, self.number))
  }

  /// Inverse of [`CacheVersion::namespace`]. Returns `None` for names in any other format.
  pub fn parse(name: &str) -> Option<Self> {
    let (app, number) = name.rsplit_once("-v")?;
    if app.is_empty() || number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
      return None;
    }
    Some(Self {
      app: app.to_string(),
      number: number.parse().ok()?,
    })
  }
}

impl fmt::Display for CacheVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} v{}", self.app, self.number)
  }
}

/// Store key for a request: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey(String);

impl EntryKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(format!("{} {}", method, url))
  }

  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for EntryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Trait for cache storage backends.
///
/// Entries are replaced whole on `put`; a reader sees either the old or the new
/// entry, never a mix. There is no per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// Create the namespace if absent. Returns the namespace as its own handle.
  async fn open(&self, namespace: &Namespace) -> Result<Namespace>;

  /// Store an entry, replacing any previous one. Fails if the namespace does not exist.
  async fn put(&self, namespace: &Namespace, key: &EntryKey, entry: CacheEntry) -> Result<()>;

  /// Look up an entry. Never changes what is stored.
  async fn get(&self, namespace: &Namespace, key: &EntryKey) -> Result<Option<CacheEntry>>;

  async fn list_namespaces(&self) -> Result<BTreeSet<Namespace>>;

  /// Remove a namespace and all its entries. Deleting an absent namespace is a no-op.
  async fn delete(&self, namespace: &Namespace) -> Result<()>;
}

/// A response handed back to the caller, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if it came from the store)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  /// A designated offline asset served in place of the requested one.
  pub fn fallback(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Fallback,
      cached_at: Some(entry.cached_at),
    }
  }

  pub fn failed() -> Self {
    Self {
      response: Response::error(),
      source: ResponseSource::Error,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Stored entry for the requested URL
  Cache,
  /// Offline page or placeholder standing in for the requested URL
  Fallback,
  /// Nothing could be served
  Error,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Fallback => "fallback",
      Self::Error => "error",
    };
    f.write_str(s)
  }
}
