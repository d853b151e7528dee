pub mod client;
pub mod types;

pub use client::{HttpClient, Network};
pub use types::{CacheEntry, Destination, Request, RequestDescriptor, RequestMode, Response};
