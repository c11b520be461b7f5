use std::time::Duration;

use portal_core::types::{Dashboard, DashboardSummary, DateRange, WidgetData};
use portal_core::{PortalResult, TenantCode};

use crate::orchestrator::{CacheFamily, RequestClient, ResourceCache};

#[derive(Clone)]
pub struct DashboardService {
    client: RequestClient,
    summaries: ResourceCache<Vec<DashboardSummary>>,
    dashboards: ResourceCache<Dashboard>,
    widget_data: ResourceCache<WidgetData>,
}

impl DashboardService {
    pub fn new(client: &RequestClient) -> Self {
        Self {
            client: client.clone(),
            summaries: client.resource("dashboard_list"),
            dashboards: client.resource("dashboard"),
            // Widget figures move faster than layouts.
            widget_data: client.resource_with_ttl("widget_data", Duration::from_secs(60)),
        }
    }

    pub async fn list_dashboards(
        &self,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Vec<DashboardSummary>> {
        self.client
            .get_json(&self.summaries, "/dashboards", None, tenant)
            .await
    }

    pub async fn dashboard(&self, id: i64, tenant: Option<&TenantCode>) -> PortalResult<Dashboard> {
        self.client
            .get_json(&self.dashboards, &format!("/dashboards/{id}"), None, tenant)
            .await
    }

    pub async fn widget_data(
        &self,
        widget_id: i64,
        range: &DateRange,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<WidgetData> {
        let query = serde_json::to_value(range)?;
        self.client
            .get_json(
                &self.widget_data,
                &format!("/widgets/{widget_id}/data"),
                Some(query),
                tenant,
            )
            .await
    }

    pub(crate) fn families(&self) -> Vec<&dyn CacheFamily> {
        vec![&self.summaries, &self.dashboards, &self.widget_data]
    }
}
