//! Composition of cache, single-flight register and request queue.
//!
//! A read first consults its family's [`TtlCache`]. On a miss it joins the
//! in-flight request for the same key, or starts one whose body runs through
//! the shared [`RequestQueue`] and fills the cache on success. Mutations skip
//! the cache and the register entirely; services invalidate the families
//! they touch once a mutation succeeds.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portal_cache::{build_key, Clock, PendingRequests, SystemClock, TtlCache};
use portal_core::{AppConfig, PortalResult, TenantCode};
use portal_queue::RequestQueue;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::transport::{ApiTransport, Method};

/// Cached read family holding values of one type.
pub struct ResourceCache<T> {
    cache: TtlCache<T>,
    pending: PendingRequests<T, portal_core::PortalError>,
    writes: Arc<Mutex<WriteLog>>,
}

impl<T> Clone for ResourceCache<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            pending: self.pending.clone(),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl<T> ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::with_clock(ttl, clock).named(name),
            pending: PendingRequests::new(),
            writes: Arc::new(Mutex::new(WriteLog::default())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.cache.name()
    }

    pub fn cache(&self) -> &TtlCache<T> {
        &self.cache
    }

    /// Number of reads currently in flight for this family.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Read `key` with the family's default TTL. See
    /// [`fetch_with_ttl`](Self::fetch_with_ttl).
    pub async fn fetch<F, Fut>(&self, queue: &RequestQueue, key: String, load: F) -> PortalResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PortalResult<T>> + Send + 'static,
    {
        let ttl = self.cache.default_ttl();
        self.fetch_with_ttl(queue, key, ttl, load).await
    }

    /// Serve `key` from cache, or load it at most once across concurrent
    /// callers. `load` runs through `queue`. Successful results are cached
    /// for `ttl`; failures reach every joined caller and are not cached.
    pub async fn fetch_with_ttl<F, Fut>(
        &self,
        queue: &RequestQueue,
        key: String,
        ttl: Duration,
        load: F,
    ) -> PortalResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PortalResult<T>> + Send + 'static,
    {
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let (handle, started) = self.pending.join_or_start(&key, || {
            let cache = self.cache.clone();
            let ticket = FlightTicket::begin(&self.writes);
            let queued = queue.enqueue(load);
            let key = key.clone();
            async move {
                let value = queued.await?;
                // Checked and written under the log lock, so an invalidation
                // either lands first and is seen, or lands after and clears
                // the entry.
                let writes = ticket.writes.lock();
                if writes.invalidated_since(ticket.started, &key) {
                    debug!(key = key.as_str(), "Skipped write-back after invalidation");
                } else {
                    cache.set(key, value.clone(), ttl);
                }
                drop(writes);
                Ok(value)
            }
        });
        if started {
            debug!(cache = self.name(), key = key.as_str(), "Cache miss, request started");
        }
        handle.await
    }

    /// Drop every cached entry whose key matches `pattern`. Reads of
    /// matching keys already in flight will not write their result back.
    pub fn invalidate(&self, pattern: &Regex) -> usize {
        let mut writes = self.writes.lock();
        writes.record(Invalidation::Pattern(pattern.clone()));
        self.cache.clear_matching(pattern)
    }

    pub fn invalidate_key(&self, key: &str) -> bool {
        let mut writes = self.writes.lock();
        writes.record(Invalidation::Key(key.to_string()));
        self.cache.delete(key)
    }

    pub fn clear(&self) {
        let mut writes = self.writes.lock();
        writes.record(Invalidation::All);
        self.cache.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

enum Invalidation {
    All,
    Key(String),
    Pattern(Regex),
}

impl Invalidation {
    fn covers(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Key(k) => k == key,
            Self::Pattern(pattern) => pattern.is_match(key),
        }
    }
}

/// Invalidations that happened while reads were in flight, kept only as long
/// as some read that started before them is still running.
#[derive(Default)]
struct WriteLog {
    epoch: u64,
    /// Start epoch of each running read, with a count per epoch.
    flights: BTreeMap<u64, usize>,
    invalidations: Vec<(u64, Invalidation)>,
}

impl WriteLog {
    fn begin(&mut self) -> u64 {
        *self.flights.entry(self.epoch).or_default() += 1;
        self.epoch
    }

    fn end(&mut self, started: u64) {
        if let Some(count) = self.flights.get_mut(&started) {
            *count -= 1;
            if *count == 0 {
                self.flights.remove(&started);
            }
        }
        match self.flights.keys().next().copied() {
            Some(oldest) => self.invalidations.retain(|(epoch, _)| *epoch > oldest),
            None => self.invalidations.clear(),
        }
    }

    fn record(&mut self, invalidation: Invalidation) {
        self.epoch += 1;
        if !self.flights.is_empty() {
            self.invalidations.push((self.epoch, invalidation));
        }
    }

    fn invalidated_since(&self, started: u64, key: &str) -> bool {
        self.invalidations
            .iter()
            .any(|(epoch, invalidation)| *epoch > started && invalidation.covers(key))
    }
}

/// Registers a read with the [`WriteLog`] for as long as it runs.
struct FlightTicket {
    writes: Arc<Mutex<WriteLog>>,
    started: u64,
}

impl FlightTicket {
    fn begin(writes: &Arc<Mutex<WriteLog>>) -> Self {
        let started = writes.lock().begin();
        Self {
            writes: Arc::clone(writes),
            started,
        }
    }
}

impl Drop for FlightTicket {
    fn drop(&mut self) {
        self.writes.lock().end(self.started);
    }
}

/// Type-erased view of a [`ResourceCache`], so maintenance and bulk
/// invalidation can walk families holding different value types.
pub trait CacheFamily: Send + Sync {
    fn family(&self) -> &'static str;
    fn purge_expired(&self) -> usize;
    fn invalidate(&self, pattern: &Regex) -> usize;
    fn clear(&self);
    fn len(&self) -> usize;
}

impl<T> CacheFamily for ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn family(&self) -> &'static str {
        self.name()
    }

    fn purge_expired(&self) -> usize {
        ResourceCache::purge_expired(self)
    }

    fn invalidate(&self, pattern: &Regex) -> usize {
        ResourceCache::invalidate(self, pattern)
    }

    fn clear(&self) {
        ResourceCache::clear(self)
    }

    fn len(&self) -> usize {
        self.cache.len()
    }
}

/// Entry point for every backend call. Cheap to clone; clones share the
/// queue and the transport.
#[derive(Clone)]
pub struct RequestClient {
    transport: Arc<dyn ApiTransport>,
    queue: RequestQueue,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RequestClient {
    pub fn new(transport: Arc<dyn ApiTransport>, queue: RequestQueue) -> Self {
        Self {
            transport,
            queue,
            default_ttl: portal_cache::DEFAULT_TTL,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn from_config(config: &AppConfig, transport: Arc<dyn ApiTransport>) -> Self {
        Self::new(transport, RequestQueue::from_config(&config.queue))
            .with_default_ttl(config.cache.default_ttl())
    }

    /// Clock used by caches created after this call.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn transport(&self) -> &Arc<dyn ApiTransport> {
        &self.transport
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// New read family using the client's default TTL.
    pub fn resource<T>(&self, name: &'static str) -> ResourceCache<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.resource_with_ttl(name, self.default_ttl)
    }

    pub fn resource_with_ttl<T>(&self, name: &'static str, ttl: Duration) -> ResourceCache<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        ResourceCache::new(name, ttl, Arc::clone(&self.clock))
    }

    /// Cached, de-duplicated GET of `path` decoded as `T`.
    pub async fn get_json<T>(
        &self,
        resource: &ResourceCache<T>,
        path: &str,
        query: Option<Value>,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let key = build_key(path, query.as_ref(), tenant);
        let transport = Arc::clone(&self.transport);
        let path = path.to_string();
        let tenant = tenant.cloned();
        resource
            .fetch(&self.queue, key, move || async move {
                let body = transport.get(&path, query.as_ref(), tenant.as_ref()).await?;
                Ok(serde_json::from_value(body)?)
            })
            .await
    }

    /// Queued mutation decoded as `T`. Never cached or de-duplicated.
    pub async fn send_json<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let path = path.to_string();
        let tenant = tenant.cloned();
        self.mutate(move || async move {
            let response = transport
                .send(method, &path, body.as_ref(), tenant.as_ref())
                .await?;
            Ok(serde_json::from_value(response)?)
        })
        .await
    }

    /// Run an arbitrary operation through the queue, bypassing the cache.
    pub async fn mutate<T, F, Fut>(&self, operation: F) -> PortalResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PortalResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.queue.enqueue(operation).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use portal_cache::ManualClock;
    use portal_core::PortalError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    fn family(clock: Arc<ManualClock>) -> ResourceCache<u32> {
        ResourceCache::new("test", Duration::from_secs(10), clock)
    }

    #[tokio::test]
    async fn test_fetch_caches_success() {
        let clock = Arc::new(ManualClock::new());
        let resource = family(clock.clone());
        let queue = RequestQueue::new(2);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value = resource
                .fetch(&queue, "k".into(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(5)
                })
                .await
                .unwrap();
            assert_eq!(value, 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(10));
        let calls_after = calls.clone();
        resource
            .fetch(&queue, "k".into(), move || async move {
                calls_after.fetch_add(1, Ordering::SeqCst);
                Ok(6)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2, "expired entry must be reloaded");
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let resource = family(Arc::new(ManualClock::new()));
        let queue = RequestQueue::new(1);

        let err = resource
            .fetch(&queue, "k".into(), || async {
                Err::<u32, _>(PortalError::Http {
                    status: 503,
                    message: "down".into(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err, PortalError::Http { status: 503, message: "down".into() });
        assert!(resource.cache().is_empty());

        let ok = resource.fetch(&queue, "k".into(), || async { Ok(1) }).await;
        assert_eq!(ok, Ok(1));
    }

    /// Start a fetch of `key` that settles with `value` once released, and
    /// wait until it is in flight.
    async fn held_fetch(
        resource: &ResourceCache<u32>,
        queue: &RequestQueue,
        key: &str,
        value: u32,
    ) -> (oneshot::Sender<()>, JoinHandle<PortalResult<u32>>) {
        let (release, gate) = oneshot::channel::<()>();
        let before = resource.in_flight();
        let task = {
            let resource = resource.clone();
            let queue = queue.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                resource
                    .fetch(&queue, key, move || async move {
                        gate.await.ok();
                        Ok(value)
                    })
                    .await
            })
        };
        while resource.in_flight() == before {
            tokio::task::yield_now().await;
        }
        (release, task)
    }

    #[tokio::test]
    async fn test_invalidation_during_flight_skips_write_back() {
        let resource = family(Arc::new(ManualClock::new()));
        let queue = RequestQueue::new(1);
        let (release, pending) = held_fetch(&resource, &queue, "k", 9).await;

        resource.invalidate(&Regex::new("^k$").unwrap());
        release.send(()).unwrap();

        assert_eq!(pending.await.unwrap(), Ok(9));
        assert!(resource.cache().get("k").is_none());
    }

    #[tokio::test]
    async fn test_unrelated_invalidation_keeps_write_back() {
        let resource = family(Arc::new(ManualClock::new()));
        let queue = RequestQueue::new(2);
        let (release, pending) = held_fetch(&resource, &queue, "tenant:acme:/x", 4).await;

        resource.invalidate(&Regex::new("^tenant:beta:").unwrap());
        resource.invalidate_key("tenant:acme:/y");
        release.send(()).unwrap();

        assert_eq!(pending.await.unwrap(), Ok(4));
        assert_eq!(resource.cache().get("tenant:acme:/x"), Some(4));
    }

    #[tokio::test]
    async fn test_invalidation_only_affects_flights_already_running() {
        let resource = family(Arc::new(ManualClock::new()));
        let queue = RequestQueue::new(2);
        let (release_old, old) = held_fetch(&resource, &queue, "a", 1).await;

        resource.clear();
        let (release_new, new) = held_fetch(&resource, &queue, "b", 2).await;

        release_new.send(()).unwrap();
        release_old.send(()).unwrap();
        assert_eq!(new.await.unwrap(), Ok(2));
        assert_eq!(old.await.unwrap(), Ok(1));

        assert_eq!(resource.cache().get("b"), Some(2), "started after the clear");
        assert_eq!(resource.cache().get("a"), None, "started before the clear");
    }

    #[tokio::test]
    async fn test_write_log_is_drained_when_reads_settle() {
        let resource = family(Arc::new(ManualClock::new()));
        let queue = RequestQueue::new(1);
        let (release, pending) = held_fetch(&resource, &queue, "k", 3).await;

        resource.invalidate(&Regex::new("^other$").unwrap());
        assert_eq!(resource.writes.lock().invalidations.len(), 1);

        release.send(()).unwrap();
        pending.await.unwrap().unwrap();
        while resource.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        let writes = resource.writes.lock();
        assert!(writes.flights.is_empty());
        assert!(writes.invalidations.is_empty());
    }

    #[test]
    fn test_write_log_without_flights_records_nothing() {
        let mut log = WriteLog::default();
        log.record(Invalidation::All);
        assert!(log.invalidations.is_empty());

        let started = log.begin();
        log.record(Invalidation::Key("k".into()));
        assert!(log.invalidated_since(started, "k"));
        assert!(!log.invalidated_since(started, "j"));
        log.end(started);
        assert!(log.invalidations.is_empty());
    }

    #[test]
    fn test_family_trait_object() {
        let resource = family(Arc::new(ManualClock::new()));
        resource.cache().insert("tenant:acme:/x", 1);
        resource.cache().insert("tenant:beta:/x", 2);

        let families: Vec<&dyn CacheFamily> = vec![&resource];
        let pattern = portal_cache::tenant_pattern(Some(&TenantCode::parse("acme").unwrap())).unwrap();
        let removed: usize = families.iter().map(|f| f.invalidate(&pattern)).sum();
        assert_eq!(removed, 1);
        assert_eq!(families[0].len(), 1);
        assert_eq!(families[0].family(), "test");
    }
}
