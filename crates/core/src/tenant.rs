//! Tenant (platform) codes.
//!
//! A tenant code is an opaque short string naming the customer context a
//! request runs under. Cache keys embed it, so the sentinel used for "no
//! tenant" must never be a constructible code.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PortalError, PortalResult};

/// Segment written into cache keys when a request has no tenant.
pub const NO_TENANT: &str = "none";

/// A validated tenant/platform code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantCode(String);

impl TenantCode {
    /// Validate and wrap a tenant code.
    ///
    /// Rejects empty codes, codes containing whitespace or `:` (the cache key
    /// separator), and the reserved sentinel `none`.
    pub fn parse(code: impl Into<String>) -> PortalResult<Self> {
        let code = code.into();
        if code.is_empty() {
            return Err(PortalError::InvalidTenant("empty code".into()));
        }
        if code.eq_ignore_ascii_case(NO_TENANT) {
            return Err(PortalError::InvalidTenant(format!(
                "'{code}' is reserved"
            )));
        }
        if code.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(PortalError::InvalidTenant(format!(
                "'{code}' contains whitespace or ':'"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantCode {
    type Error = PortalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantCode> for String {
    fn from(code: TenantCode) -> Self {
        code.0
    }
}

impl std::str::FromStr for TenantCode {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
