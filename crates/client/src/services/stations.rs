use std::time::Duration;

use portal_cache::endpoint_pattern;
use portal_core::types::{Station, StationDraft, WorkOrder, WorkOrderStage};
use portal_core::{PortalResult, TenantCode};
use serde_json::{json, Value};

use crate::orchestrator::{CacheFamily, RequestClient, ResourceCache};
use crate::transport::Method;

const STATIONS: &str = "/stations";
const WORK_ORDERS: &str = "/work-orders";

/// Workshop stations and the work orders moving through them.
#[derive(Clone)]
pub struct StationService {
    client: RequestClient,
    stations: ResourceCache<Vec<Station>>,
    work_orders: ResourceCache<WorkOrder>,
}

impl StationService {
    pub fn new(client: &RequestClient) -> Self {
        Self {
            client: client.clone(),
            stations: client.resource("station_list"),
            // Scanned on the shop floor while orders move between stages.
            work_orders: client.resource_with_ttl("work_order", Duration::from_secs(30)),
        }
    }

    /// Stations of the tenant, optionally narrowed to one workshop.
    pub async fn list_stations(
        &self,
        workshop: Option<&str>,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Vec<Station>> {
        let query = workshop.map(|w| json!({ "workshop": w }));
        self.client
            .get_json(&self.stations, STATIONS, query, tenant)
            .await
    }

    pub async fn create_station(
        &self,
        draft: &StationDraft,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Station> {
        let body = serde_json::to_value(draft)?;
        let created = self
            .client
            .send_json(Method::Post, STATIONS, Some(body), tenant)
            .await?;
        self.invalidate_stations(tenant)?;
        Ok(created)
    }

    pub async fn update_station(
        &self,
        id: i64,
        draft: &StationDraft,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Station> {
        let body = serde_json::to_value(draft)?;
        let updated = self
            .client
            .send_json(Method::Put, &format!("{STATIONS}/{id}"), Some(body), tenant)
            .await?;
        self.invalidate_stations(tenant)?;
        Ok(updated)
    }

    pub async fn delete_station(&self, id: i64, tenant: Option<&TenantCode>) -> PortalResult<()> {
        let _: Value = self
            .client
            .send_json(Method::Delete, &format!("{STATIONS}/{id}"), None, tenant)
            .await?;
        self.invalidate_stations(tenant)
    }

    /// Look up the work order printed on a scanned QR label.
    pub async fn work_order_by_qr(
        &self,
        qr_code: &str,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<WorkOrder> {
        let query = json!({ "qr": qr_code });
        self.client
            .get_json(
                &self.work_orders,
                &format!("{WORK_ORDERS}/lookup"),
                Some(query),
                tenant,
            )
            .await
    }

    /// Move a work order to `stage`. Station load changes with it, so both
    /// families are invalidated for the tenant.
    pub async fn advance_work_order(
        &self,
        id: i64,
        stage: WorkOrderStage,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<WorkOrder> {
        let body = json!({ "stage": stage });
        let updated = self
            .client
            .send_json(
                Method::Post,
                &format!("{WORK_ORDERS}/{id}/stage"),
                Some(body),
                tenant,
            )
            .await?;
        self.work_orders
            .invalidate(&endpoint_pattern(tenant, WORK_ORDERS)?);
        self.invalidate_stations(tenant)?;
        Ok(updated)
    }

    fn invalidate_stations(&self, tenant: Option<&TenantCode>) -> PortalResult<()> {
        self.stations.invalidate(&endpoint_pattern(tenant, STATIONS)?);
        Ok(())
    }

    pub(crate) fn families(&self) -> Vec<&dyn CacheFamily> {
        vec![&self.stations, &self.work_orders]
    }
}
