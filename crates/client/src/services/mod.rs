//! Typed backend services. Each owns the read families it serves and
//! invalidates them after its own successful mutations.

mod announcements;
mod dashboards;
mod platforms;
mod reports;
mod stations;
mod user;

pub use announcements::AnnouncementService;
pub use dashboards::DashboardService;
pub use platforms::PlatformService;
pub use reports::ReportService;
pub use stations::StationService;
pub use user::UserService;

use portal_cache::tenant_pattern;
use portal_core::tenant::NO_TENANT;
use portal_core::{PortalResult, TenantCode};
use tracing::info;

use crate::orchestrator::{CacheFamily, RequestClient};

/// Every service wired onto one shared [`RequestClient`].
#[derive(Clone)]
pub struct Portal {
    pub users: UserService,
    pub dashboards: DashboardService,
    pub reports: ReportService,
    pub platforms: PlatformService,
    pub stations: StationService,
    pub announcements: AnnouncementService,
    client: RequestClient,
}

impl Portal {
    pub fn new(client: RequestClient) -> Self {
        Self {
            users: UserService::new(&client),
            dashboards: DashboardService::new(&client),
            reports: ReportService::new(&client),
            platforms: PlatformService::new(&client),
            stations: StationService::new(&client),
            announcements: AnnouncementService::new(&client),
            client,
        }
    }

    pub fn client(&self) -> &RequestClient {
        &self.client
    }

    fn families(&self) -> Vec<&dyn CacheFamily> {
        let mut families = Vec::new();
        families.extend(self.users.families());
        families.extend(self.dashboards.families());
        families.extend(self.reports.families());
        families.extend(self.platforms.families());
        families.extend(self.stations.families());
        families.extend(self.announcements.families());
        families
    }

    /// Evict expired entries from every family. Returns the number evicted.
    pub fn purge_expired(&self) -> usize {
        self.families().iter().map(|f| f.purge_expired()).sum()
    }

    /// Drop everything cached for `tenant`, e.g. after switching platform.
    pub fn forget_tenant(&self, tenant: Option<&TenantCode>) -> PortalResult<usize> {
        let pattern = tenant_pattern(tenant)?;
        let removed: usize = self.families().iter().map(|f| f.invalidate(&pattern)).sum();
        info!(
            tenant = tenant.map(TenantCode::as_str).unwrap_or(NO_TENANT),
            removed = removed,
            "Dropped cached reads for tenant"
        );
        Ok(removed)
    }

    /// Drop all cached reads and reject queued requests, e.g. on sign-out.
    /// Returns the number of queued requests rejected.
    pub fn reset(&self) -> usize {
        for family in self.families() {
            family.clear();
        }
        self.client.queue().clear()
    }

    /// Total cached entries across families, including expired ones not yet
    /// purged.
    pub fn cached_entries(&self) -> usize {
        self.families().iter().map(|f| f.len()).sum()
    }
}
