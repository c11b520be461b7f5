#![warn(clippy::unwrap_used)]

pub mod clock;
pub mod key;
pub mod single_flight;
pub mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{build_key, build_key_for, endpoint_pattern, tenant_pattern};
pub use single_flight::{PendingHandle, PendingRequests};
pub use ttl::{TtlCache, DEFAULT_TTL};
