//! Last-resort responses when neither the network nor the store can answer.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheStore, EntryKey, Namespace, Served};
use crate::http::RequestDescriptor;

use super::classify::RequestClass;

pub struct FallbackProvider {
  store: Arc<dyn CacheStore>,
  offline_page: EntryKey,
  placeholder_image: Option<EntryKey>,
}

impl FallbackProvider {
  pub fn new(store: Arc<dyn CacheStore>, offline_page: &Url, placeholder_image: Option<&Url>) -> Self {
    Self {
      store,
      offline_page: EntryKey::get(offline_page),
      placeholder_image: placeholder_image.map(EntryKey::get),
    }
  }

  /// Pick the designated stand-in for a failed request.
  ///
  /// - navigation: the offline page
  /// - image resource: the placeholder image
  /// - anything else: an error, never fabricated content
  pub async fn provide(
    &self,
    namespace: &Namespace,
    class: RequestClass,
    request: &RequestDescriptor,
  ) -> Result<Served> {
    let key = match class {
      RequestClass::Navigation => &self.offline_page,
      RequestClass::Resource if request.is_image() => match &self.placeholder_image {
        Some(key) => key,
        None => return Err(eyre!("No placeholder image configured for {}", request.url)),
      },
      _ => return Err(eyre!("No fallback available for {}", request.url)),
    };

    match self.store.get(namespace, key).await {
      Ok(Some(entry)) => {
        debug!(url = %request.url, fallback = %key, "serving fallback");
        Ok(Served::fallback(entry))
      }
      Ok(None) => {
        warn!(namespace = %namespace, fallback = %key, "fallback entry missing from cache");
        Err(eyre!("Fallback {} missing from {}", key, namespace))
      }
      Err(e) => Err(eyre!("Failed to read fallback {}: {}", key, e)),
    }
  }
}
