//! Transport seam between the orchestration layer and the backend API.

use async_trait::async_trait;
use portal_core::{PortalResult, TenantCode};
use serde_json::Value;

/// Mutating HTTP verbs. Reads go through [`ApiTransport::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Executes backend calls. Implementations route to HTTP in production and
/// to in-memory fakes in tests.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Idempotent read. Safe to share between concurrent callers.
    async fn get(
        &self,
        path: &str,
        query: Option<&Value>,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Value>;

    /// Mutation. Never cached or de-duplicated.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Value>;
}
