#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod tenant;
pub mod types;

pub use config::AppConfig;
pub use error::{PortalError, PortalResult, Rejection};
pub use tenant::TenantCode;
