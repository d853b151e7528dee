use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::Served;
use crate::http::Request;
use crate::worker::{ClientId, Worker};

/// A request observed at the interception boundary
#[derive(Debug)]
pub struct FetchEvent {
  pub client: ClientId,
  pub request: Request,
  respond_to: oneshot::Sender<Served>,
}

/// Dispatches every intercepted request to its own task.
///
/// Requests are interleaved, not queued: a slow fetch for one never holds up
/// another. Dropping the pending response cancels that request's task.
pub struct Interceptor {
  tx: mpsc::UnboundedSender<FetchEvent>,
}

impl Interceptor {
  /// Spawn the dispatch loop for `worker`.
  pub fn new(worker: Arc<Worker>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<FetchEvent>();

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
          let FetchEvent {
            client,
            request,
            mut respond_to,
          } = event;

          tokio::select! {
            served = worker.handle(client, &request) => {
              // The caller may have gone away in the meantime
              let _ = respond_to.send(served);
            }
            _ = respond_to.closed() => {
              debug!(%client, url = %request.url, "request cancelled");
            }
          }
        });
      }
    });

    Self { tx }
  }

  /// Send a request through the engine and wait for its response.
  pub async fn fetch(&self, client: ClientId, request: Request) -> Result<Served> {
    let (respond_to, response) = oneshot::channel();

    self
      .tx
      .send(FetchEvent {
        client,
        request,
        respond_to,
      })
      .map_err(|_| eyre!("Interceptor is shut down"))?;

    response
      .await
      .map_err(|_| eyre!("Request task ended without a response"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, ResponseSource};
  use crate::config::tests::example;
  use crate::http::{Destination, Response};
  use crate::testing::{url, MockNetwork};
  use std::time::Duration;

  async fn interceptor(network: Arc<MockNetwork>) -> (Interceptor, Arc<Worker>) {
    let worker = Arc::new(Worker::new(&example(), Arc::new(MemoryStore::new()), network).unwrap());
    worker.start().await.unwrap();
    (Interceptor::new(Arc::clone(&worker)), worker)
  }

  #[tokio::test]
  async fn test_concurrent_requests_are_answered_independently() {
    let network = Arc::new(MockNetwork::with_app_shell());
    network.route("/journal", Response::new(200, Vec::new(), "journal"));
    let (interceptor, worker) = interceptor(network.clone()).await;
    let page = worker.register_client();

    let (a, b, c) = tokio::join!(
      interceptor.fetch(page, Request::navigate(url("/journal"))),
      interceptor.fetch(page, Request::get(url("/icon.svg")).with_destination(Destination::Image)),
      interceptor.fetch(page, Request::get(url("/missing.js")).with_destination(Destination::Script)),
    );

    assert_eq!(a.unwrap().source, ResponseSource::Network);
    assert_eq!(b.unwrap().source, ResponseSource::Cache);
    assert_eq!(c.unwrap().response.status, 404);
  }

  #[tokio::test]
  async fn test_failed_request_does_not_affect_others() {
    let network = Arc::new(MockNetwork::with_app_shell());
    let (interceptor, worker) = interceptor(network.clone()).await;
    let page = worker.register_client();
    network.set_offline(true);

    let (bad, good) = tokio::join!(
      interceptor.fetch(page, Request::get(url("/app.js")).with_destination(Destination::Script)),
      interceptor.fetch(page, Request::navigate(url("/"))),
    );

    assert_eq!(bad.unwrap().source, ResponseSource::Error);
    assert_eq!(good.unwrap().source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_dropped_request_does_not_stall_dispatch() {
    let network = Arc::new(MockNetwork::with_app_shell());
    let (interceptor, worker) = interceptor(network).await;
    let page = worker.register_client();

    let abandoned = interceptor.fetch(page, Request::navigate(url("/")));
    drop(tokio::time::timeout(Duration::ZERO, abandoned).await);

    let served = interceptor
      .fetch(page, Request::get(url("/manifest.json")))
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
  }
}
