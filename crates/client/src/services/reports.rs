use portal_cache::endpoint_pattern;
use portal_core::types::{DateRange, ReportDefinition, ReportResult};
use portal_core::{PortalResult, TenantCode};
use serde_json::json;

use crate::orchestrator::{CacheFamily, RequestClient, ResourceCache};
use crate::transport::Method;

const REPORTS: &str = "/reports";

#[derive(Clone)]
pub struct ReportService {
    client: RequestClient,
    reports: ResourceCache<Vec<ReportDefinition>>,
}

impl ReportService {
    pub fn new(client: &RequestClient) -> Self {
        Self {
            client: client.clone(),
            reports: client.resource("report_list"),
        }
    }

    pub async fn list_reports(
        &self,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Vec<ReportDefinition>> {
        self.client
            .get_json(&self.reports, REPORTS, None, tenant)
            .await
    }

    /// Run ad-hoc SQL. Queued like every request but never cached: the same
    /// statement may return different rows a moment later.
    pub async fn run_report(
        &self,
        sql: &str,
        range: &DateRange,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<ReportResult> {
        let body = json!({ "sql": sql, "range": range });
        self.client
            .send_json(Method::Post, "/reports/run", Some(body), tenant)
            .await
    }

    /// Create (no id) or update (with id) a saved report.
    pub async fn save_report(
        &self,
        report: &ReportDefinition,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<ReportDefinition> {
        let body = serde_json::to_value(report)?;
        let saved: ReportDefinition = match report.id {
            Some(id) => {
                self.client
                    .send_json(Method::Put, &format!("{REPORTS}/{id}"), Some(body), tenant)
                    .await?
            }
            None => {
                self.client
                    .send_json(Method::Post, REPORTS, Some(body), tenant)
                    .await?
            }
        };
        self.reports.invalidate(&endpoint_pattern(tenant, REPORTS)?);
        Ok(saved)
    }

    pub(crate) fn families(&self) -> Vec<&dyn CacheFamily> {
        vec![&self.reports]
    }
}
