//! Cache-key construction.
//!
//! Keys have the shape `tenant:<code|none>:<endpoint>[:<params>]`. The tenant
//! segment is always present so that the same endpoint read under two tenants
//! can never share an entry.

use portal_core::tenant::NO_TENANT;
use portal_core::{PortalError, PortalResult, TenantCode};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Build the cache key for a read of `endpoint` with optional query `params`
/// under an optional tenant.
///
/// Params are written in canonical form (object keys sorted at every depth),
/// so structurally equal params always produce the same key. `Null` params are
/// treated as absent.
pub fn build_key(endpoint: &str, params: Option<&Value>, tenant: Option<&TenantCode>) -> String {
    let mut key = String::with_capacity(endpoint.len() + 32);
    key.push_str("tenant:");
    key.push_str(tenant.map(TenantCode::as_str).unwrap_or(NO_TENANT));
    key.push(':');
    key.push_str(endpoint);

    if let Some(params) = params.filter(|p| !p.is_null()) {
        key.push(':');
        write_canonical(params, &mut key);
    }
    key
}

/// Like [`build_key`] for any serializable params type.
pub fn build_key_for<P>(
    endpoint: &str,
    params: Option<&P>,
    tenant: Option<&TenantCode>,
) -> PortalResult<String>
where
    P: Serialize + ?Sized,
{
    let params = params.map(serde_json::to_value).transpose()?;
    Ok(build_key(endpoint, params.as_ref(), tenant))
}

/// Pattern matching every key stored under `tenant`.
pub fn tenant_pattern(tenant: Option<&TenantCode>) -> PortalResult<Regex> {
    compile(&format!("^{}", regex::escape(&tenant_prefix(tenant))))
}

/// Pattern matching every read of `endpoint` (any params, and any sub-path
/// below it) under `tenant`.
pub fn endpoint_pattern(tenant: Option<&TenantCode>, endpoint: &str) -> PortalResult<Regex> {
    let endpoint = endpoint.trim_end_matches('/');
    compile(&format!(
        "^{}{}(?:[/:]|$)",
        regex::escape(&tenant_prefix(tenant)),
        regex::escape(endpoint)
    ))
}

fn tenant_prefix(tenant: Option<&TenantCode>) -> String {
    format!("tenant:{}:", tenant.map(TenantCode::as_str).unwrap_or(NO_TENANT))
}

fn compile(pattern: &str) -> PortalResult<Regex> {
    Regex::new(pattern).map_err(|e| PortalError::Internal(format!("invalid key pattern: {e}")))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant(code: &str) -> TenantCode {
        TenantCode::parse(code).unwrap()
    }

    #[test]
    fn test_key_shape() {
        assert_eq!(build_key("/x", None, None), "tenant:none:/x");
        assert_eq!(
            build_key("/x", Some(&json!({"a": 1})), Some(&tenant("acme"))),
            "tenant:acme:/x:{\"a\":1}"
        );
        assert_eq!(build_key("/x", Some(&Value::Null), None), "tenant:none:/x");
    }

    #[test]
    fn test_tenant_isolation() {
        let params = json!({"a": 1});
        let a = build_key("/x", Some(&params), Some(&tenant("tenantA")));
        let b = build_key("/x", Some(&params), Some(&tenant("tenantB")));
        let none = build_key("/x", Some(&params), None);
        assert_ne!(a, b);
        assert_ne!(a, none);
        assert_ne!(b, none);
    }

    #[test]
    fn test_structural_equality_of_params() {
        let one = json!({"b": [1, {"y": 2, "x": 1}], "a": "s"});
        let two = json!({"a": "s", "b": [1, {"x": 1, "y": 2}]});
        assert_eq!(build_key("/r", Some(&one), None), build_key("/r", Some(&two), None));

        let reordered_array = json!({"a": "s", "b": [{"x": 1, "y": 2}, 1]});
        assert_ne!(
            build_key("/r", Some(&one), None),
            build_key("/r", Some(&reordered_array), None)
        );
    }

    #[test]
    fn test_build_key_for_struct_params() {
        #[derive(Serialize)]
        struct Query {
            page: u32,
            size: u32,
        }
        let key = build_key_for("/stations", Some(&Query { page: 2, size: 20 }), None).unwrap();
        assert_eq!(key, "tenant:none:/stations:{\"page\":2,\"size\":20}");
    }

    #[test]
    fn test_endpoint_pattern_scope() {
        let acme = tenant("acme");
        let pattern = endpoint_pattern(Some(&acme), "/stations").unwrap();

        assert!(pattern.is_match(&build_key("/stations", None, Some(&acme))));
        assert!(pattern.is_match(&build_key("/stations", Some(&json!({"page": 1})), Some(&acme))));
        assert!(pattern.is_match(&build_key("/stations/7", None, Some(&acme))));

        assert!(!pattern.is_match(&build_key("/stations-archive", None, Some(&acme))));
        assert!(!pattern.is_match(&build_key("/stations", None, Some(&tenant("beta")))));
        assert!(!pattern.is_match(&build_key("/stations", None, None)));
    }

    #[test]
    fn test_tenant_pattern_scope() {
        let acme = tenant("acme");
        let pattern = tenant_pattern(Some(&acme)).unwrap();
        assert!(pattern.is_match(&build_key("/anything", None, Some(&acme))));
        assert!(!pattern.is_match(&build_key("/anything", None, Some(&tenant("acme2")))));
        assert!(tenant_pattern(None).unwrap().is_match("tenant:none:/me"));
    }
}
