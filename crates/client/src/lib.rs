//! Client-side request orchestration for the BI portal: every backend read
//! goes through a per-family TTL cache and single-flight register, and every
//! request (read or mutation) through one bounded FIFO queue.

#![warn(clippy::unwrap_used)]

pub mod http;
pub mod orchestrator;
pub mod services;
pub mod transport;

pub use http::HttpTransport;
pub use orchestrator::{CacheFamily, RequestClient, ResourceCache};
pub use services::Portal;
pub use transport::{ApiTransport, Method};
