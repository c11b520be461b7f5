use portal_cache::endpoint_pattern;
use portal_core::types::Platform;
use portal_core::{PortalResult, TenantCode};

use crate::orchestrator::{CacheFamily, RequestClient, ResourceCache};
use crate::transport::Method;

const PLATFORMS: &str = "/platforms";

/// Platform (tenant) administration. Platform reads are global, so they are
/// keyed under no tenant.
#[derive(Clone)]
pub struct PlatformService {
    client: RequestClient,
    platforms: ResourceCache<Vec<Platform>>,
}

impl PlatformService {
    pub fn new(client: &RequestClient) -> Self {
        Self {
            client: client.clone(),
            platforms: client.resource("platform_list"),
        }
    }

    pub async fn list_platforms(&self) -> PortalResult<Vec<Platform>> {
        self.client
            .get_json(&self.platforms, PLATFORMS, None, None)
            .await
    }

    pub async fn create_platform(&self, platform: &Platform) -> PortalResult<Platform> {
        let body = serde_json::to_value(platform)?;
        let created = self
            .client
            .send_json(Method::Post, PLATFORMS, Some(body), None)
            .await?;
        self.invalidate()?;
        Ok(created)
    }

    pub async fn update_platform(
        &self,
        code: &TenantCode,
        platform: &Platform,
    ) -> PortalResult<Platform> {
        let body = serde_json::to_value(platform)?;
        let updated = self
            .client
            .send_json(Method::Put, &format!("{PLATFORMS}/{code}"), Some(body), None)
            .await?;
        self.invalidate()?;
        Ok(updated)
    }

    fn invalidate(&self) -> PortalResult<()> {
        self.platforms.invalidate(&endpoint_pattern(None, PLATFORMS)?);
        Ok(())
    }

    pub(crate) fn families(&self) -> Vec<&dyn CacheFamily> {
        vec![&self.platforms]
    }
}
