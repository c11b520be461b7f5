use portal_cache::endpoint_pattern;
use portal_core::types::{Announcement, AnnouncementDraft};
use portal_core::{PortalResult, TenantCode};

use crate::orchestrator::{CacheFamily, RequestClient, ResourceCache};
use crate::transport::Method;

const ANNOUNCEMENTS: &str = "/announcements";

#[derive(Clone)]
pub struct AnnouncementService {
    client: RequestClient,
    announcements: ResourceCache<Vec<Announcement>>,
}

impl AnnouncementService {
    pub fn new(client: &RequestClient) -> Self {
        Self {
            client: client.clone(),
            announcements: client.resource("announcement_list"),
        }
    }

    pub async fn list_announcements(
        &self,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Vec<Announcement>> {
        self.client
            .get_json(&self.announcements, ANNOUNCEMENTS, None, tenant)
            .await
    }

    pub async fn publish_announcement(
        &self,
        draft: &AnnouncementDraft,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Announcement> {
        let body = serde_json::to_value(draft)?;
        let published = self
            .client
            .send_json(Method::Post, ANNOUNCEMENTS, Some(body), tenant)
            .await?;
        self.announcements
            .invalidate(&endpoint_pattern(tenant, ANNOUNCEMENTS)?);
        Ok(published)
    }

    pub(crate) fn families(&self) -> Vec<&dyn CacheFamily> {
        vec![&self.announcements]
    }
}
