//! Request classification.

use reqwest::Method;

use crate::http::RequestDescriptor;

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Any method other than `GET`
  NonIdempotent,
  /// A `GET` to an origin other than the app's
  CrossOrigin,
  /// A same-origin top-level document load
  Navigation,
  /// Every other same-origin `GET`
  Resource,
}

/// Classify a request. The checks run in priority order, first match wins.
pub fn classify(request: &RequestDescriptor) -> RequestClass {
  if request.method != Method::GET {
    RequestClass::NonIdempotent
  } else if !request.same_origin {
    RequestClass::CrossOrigin
  } else if request.navigation {
    RequestClass::Navigation
  } else {
    RequestClass::Resource
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Destination, Request};
  use url::Url;

  fn describe(request: Request) -> RequestDescriptor {
    let origin = Url::parse("http://localhost:3000").unwrap().origin();
    RequestDescriptor::new(&request, &origin)
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_method_checked_first() {
    // A cross-origin navigation POST is still non-idempotent
    let req = Request::navigate(url("http://localhost:8000/login")).with_method(Method::POST);
    assert_eq!(classify(&describe(req)), RequestClass::NonIdempotent);

    let req = Request::get(url("http://localhost:3000/api/journal")).with_method(Method::PUT);
    assert_eq!(classify(&describe(req)), RequestClass::NonIdempotent);
  }

  #[test]
  fn test_head_is_not_get() {
    let req = Request::get(url("http://localhost:3000/")).with_method(Method::HEAD);
    assert_eq!(classify(&describe(req)), RequestClass::NonIdempotent);
  }

  #[test]
  fn test_cross_origin_before_navigation() {
    let req = Request::navigate(url("https://github.com/"));
    assert_eq!(classify(&describe(req)), RequestClass::CrossOrigin);

    let req = Request::get(url("http://localhost:8000/api/v1/journal"));
    assert_eq!(classify(&describe(req)), RequestClass::CrossOrigin);
  }

  #[test]
  fn test_navigation() {
    let req = Request::navigate(url("http://localhost:3000/reminders"));
    assert_eq!(classify(&describe(req)), RequestClass::Navigation);
  }

  #[test]
  fn test_resource() {
    let req = Request::get(url("http://localhost:3000/icon.svg")).with_destination(Destination::Image);
    assert_eq!(classify(&describe(req)), RequestClass::Resource);

    let req = Request::get(url("http://localhost:3000/manifest.json"));
    assert_eq!(classify(&describe(req)), RequestClass::Resource);
  }
}
