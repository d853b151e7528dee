//! Pages (clients) issuing requests, and which namespace controls each one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::cache::Namespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "client-{}", self.0)
  }
}

/// Registry of open clients.
///
/// An uncontrolled client (`None`) is not intercepted: its requests go
/// straight to the network.
#[derive(Default)]
pub struct Clients {
  next_id: AtomicU64,
  controllers: RwLock<HashMap<ClientId, Option<Namespace>>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, controller: Option<Namespace>) -> ClientId {
    let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self
      .controllers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, controller);
    id
  }

  pub fn unregister(&self, id: ClientId) {
    self
      .controllers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&id);
  }

  pub fn controller(&self, id: ClientId) -> Option<Namespace> {
    self
      .controllers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .cloned()
      .flatten()
  }

  /// Put every registered client under `namespace`. Returns how many changed controller.
  pub fn claim(&self, namespace: &Namespace) -> usize {
    let mut controllers = self
      .controllers
      .write()
      .unwrap_or_else(PoisonError::into_inner);

    let mut changed = 0;
    for controller in controllers.values_mut() {
      if controller.as_ref() != Some(namespace) {
        *controller = Some(namespace.clone());
        changed += 1;
      }
    }
    changed
  }
}
