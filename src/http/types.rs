//! Request and response snapshots passed between the interceptor, the strategies and the store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;
use url::{Origin, Url};

/// How the request was issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  SameOrigin,
  #[default]
  Cors,
  NoCors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Destination {
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
  /// No destination hint (fetch/XHR calls)
  #[default]
  Empty,
}

/// An outbound request observed at the interception boundary.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  /// A plain `GET` subresource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      destination: Destination::default(),
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level document navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }
}

/// Immutable snapshot of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// The generic failed response handed to a caller when nothing could be served.
  pub fn error() -> Self {
    Self {
      status: 0,
      headers: Vec::new(),
      body: Bytes::new(),
    }
  }

  pub fn is_error(&self) -> bool {
    self.status == 0
  }

  /// Whether the status is in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A stored response together with the moment it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Capture a response now.
  pub fn capture(response: Response) -> Self {
    Self {
      response,
      cached_at: Utc::now(),
    }
  }

  /// Stored size, used for quota accounting.
  pub fn size(&self) -> u64 {
    self.response.body.len() as u64
  }
}

/// Per-request facts the classifier needs. Built once per request and then dropped.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
  pub url: Url,
  pub method: Method,
  pub same_origin: bool,
  pub navigation: bool,
  pub destination: Destination,
}

impl RequestDescriptor {
  pub fn new(request: &Request, app_origin: &Origin) -> Self {
    Self {
      url: request.url.clone(),
      method: request.method.clone(),
      same_origin: request.url.origin() == *app_origin,
      navigation: request.mode == RequestMode::Navigate,
      destination: request.destination,
    }
  }

  pub fn is_image(&self) -> bool {
    self.destination == Destination::Image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Origin {
    Url::parse("http://localhost:3000").unwrap().origin()
  }

  #[test]
  fn test_descriptor_same_origin() {
    let req = Request::get(Url::parse("http://localhost:3000/icon.svg").unwrap());
    let d = RequestDescriptor::new(&req, &origin());
    assert!(d.same_origin);
    assert!(!d.navigation);
  }

  #[test]
  fn test_descriptor_port_mismatch_is_cross_origin() {
    let req = Request::get(Url::parse("http://localhost:8000/api/journal").unwrap());
    let d = RequestDescriptor::new(&req, &origin());
    assert!(!d.same_origin);
  }

  #[test]
  fn test_navigate_sets_mode_and_destination() {
    let req = Request::navigate(Url::parse("http://localhost:3000/journal").unwrap());
    let d = RequestDescriptor::new(&req, &origin());
    assert!(d.navigation);
    assert_eq!(d.destination, Destination::Document);
  }

  #[test]
  fn test_response_header_lookup_is_case_insensitive() {
    let resp = Response::new(
      200,
      vec![("Content-Type".to_string(), "text/html".to_string())],
      "<html></html>",
    );
    assert_eq!(resp.header("content-type"), Some("text/html"));
    assert!(resp.ok());
    assert!(!resp.is_error());
  }

  #[test]
  fn test_error_response() {
    let resp = Response::error();
    assert!(resp.is_error());
    assert!(!resp.ok());
  }
}
