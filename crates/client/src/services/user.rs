use std::time::Duration;

use portal_core::types::CurrentUser;
use portal_core::PortalResult;

use crate::orchestrator::{CacheFamily, RequestClient, ResourceCache};

const ME: &str = "/auth/me";

/// The signed-in user. Several views ask for it on load; concurrent asks
/// share one request.
#[derive(Clone)]
pub struct UserService {
    client: RequestClient,
    me: ResourceCache<CurrentUser>,
}

impl UserService {
    pub fn new(client: &RequestClient) -> Self {
        Self {
            client: client.clone(),
            me: client.resource_with_ttl("user", Duration::from_secs(60)),
        }
    }

    /// Not tenant-scoped: the user exists across platforms.
    pub async fn current_user(&self) -> PortalResult<CurrentUser> {
        self.client.get_json(&self.me, ME, None, None).await
    }

    /// Forget the cached user, e.g. after a profile change.
    pub fn refresh(&self) {
        self.me.clear();
    }

    pub(crate) fn families(&self) -> Vec<&dyn CacheFamily> {
        vec![&self.me]
    }
}
