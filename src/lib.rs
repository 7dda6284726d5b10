#![deny(unsafe_code)]

use crate::bundle::CertificateBundle;
use crate::cache::{Cache, CacheError, NopCache};
use crate::issuer::CertificateIssuer;
use crate::time::{Clock, SystemClock};
use anyhow::{anyhow, Context};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub mod acme;
pub mod bundle;
pub mod cache;
pub mod chain;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod issuer;
pub mod server;
pub mod time;

#[cfg(test)]
pub(crate) mod testutil;

/// Deadline for a single durable-cache operation.
const CACHE_OP_TIMEOUT: Duration = Duration::from_millis(100);
/// Pause between background renewal sweeps. Coarse on purpose: with a
/// 30-day renewal window there are ~30 daily chances to succeed before a
/// certificate actually expires.
const RENEW_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default lead time before expiry at which renewal kicks in.
pub const DEFAULT_RENEW_BEFORE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

type AcquisitionFlight = Shared<BoxFuture<'static, Result<Arc<CertificateBundle>, AcquireError>>>;

/// Obtains and caches TLS certificates from an ACME CA. An in-memory map
/// sits in front of a durable cache; a background task renews certificates
/// well before they expire, so TLS handshakes never wait on the CA.
pub struct CertificateManager {
    cache: Box<dyn Cache>,
    known_hosts: Vec<String>,
    issuer: Arc<dyn CertificateIssuer>,
    renew_before: Duration,
    clock: Arc<dyn Clock>,
    certificates: RwLock<HashMap<String, Arc<CertificateBundle>>>,
    /// Single acquisition slot shared by all hosts: ACME CAs rate-limit
    /// aggressively, so at most one acquisition is in flight per manager and
    /// concurrent callers share its result.
    inflight: Mutex<Option<AcquisitionFlight>>,
}

#[derive(Debug)]
enum CacheLookup {
    Miss,
    Failure(anyhow::Error),
}

impl CertificateManager {
    pub fn builder() -> CertificateManagerBuilder {
        CertificateManagerBuilder::default()
    }

    /// Blocks until every known host has a certificate in the cache, then
    /// launches the background renewal task. Returns the accumulated
    /// per-host failures if any host could not be provisioned.
    pub async fn start(self: Arc<Self>) -> Result<(), StartError> {
        let failures = self.renew_all().await;
        if !failures.is_empty() {
            return Err(StartError { failures });
        }
        tokio::spawn(async move {
            self.renew_forever().await;
        });
        Ok(())
    }

    /// Certificate-selection hook for the host TLS stack; semantically
    /// `get(client_hello.server_name)`. Reads from the in-memory map,
    /// falling back to the durable cache.
    pub async fn get_certificate(&self, server_name: &str) -> anyhow::Result<Arc<CertificateBundle>> {
        let hostname = server_name.to_ascii_lowercase();
        match self.get_from_cache(&hostname).await {
            Ok(bundle) => Ok(bundle),
            Err(CacheLookup::Miss) => Err(anyhow!("no certificate available for {hostname}")),
            Err(CacheLookup::Failure(err)) => {
                Err(err.context(format!("loading certificate for {hostname}")))
            }
        }
    }

    /// Lock-only read of the in-memory map, for synchronous TLS resolver
    /// glue. `start` pre-populates the map for every known host.
    pub fn cached_certificate(&self, server_name: &str) -> Option<Arc<CertificateBundle>> {
        self.certificates
            .read()
            .get(&server_name.to_ascii_lowercase())
            .cloned()
    }

    async fn get_from_cache(&self, hostname: &str) -> Result<Arc<CertificateBundle>, CacheLookup> {
        if let Some(bundle) = self.certificates.read().get(hostname) {
            return Ok(bundle.clone());
        }

        let data = match tokio::time::timeout(CACHE_OP_TIMEOUT, self.cache.get(hostname)).await {
            Ok(Ok(data)) => data,
            Ok(Err(CacheError::Miss)) => return Err(CacheLookup::Miss),
            Ok(Err(err)) => return Err(CacheLookup::Failure(err.into())),
            Err(_) => return Err(CacheLookup::Failure(anyhow!(CacheError::Timeout))),
        };
        let bundle = match CertificateBundle::decode(&data) {
            Ok(bundle) => Arc::new(bundle),
            Err(err) => {
                // a corrupt entry is reported, then treated as absent so the
                // next renewal pass replaces it
                warn!("cached certificate for {hostname} is unusable: {err}");
                return Err(CacheLookup::Miss);
            }
        };
        self.certificates
            .write()
            .insert(hostname.to_string(), bundle.clone());
        Ok(bundle)
    }

    async fn put_in_cache(
        &self,
        hostname: &str,
        bundle: Arc<CertificateBundle>,
    ) -> anyhow::Result<()> {
        let encoded = bundle.encode()?;
        self.certificates
            .write()
            .insert(hostname.to_string(), bundle);
        match tokio::time::timeout(CACHE_OP_TIMEOUT, self.cache.put(hostname, &encoded)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(anyhow!(CacheError::Timeout)),
        }
    }

    async fn delete_from_cache(&self, hostname: &str) -> anyhow::Result<()> {
        self.certificates.write().remove(hostname);
        match tokio::time::timeout(CACHE_OP_TIMEOUT, self.cache.delete(hostname)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(anyhow!(CacheError::Timeout)),
        }
    }

    fn needs_renewal(&self, not_after: ::time::OffsetDateTime) -> bool {
        self.clock.utc_now() + self.renew_before > not_after
    }

    async fn renew_one(&self, hostname: &str) -> anyhow::Result<()> {
        let current = match self.get_from_cache(hostname).await {
            Ok(bundle) => Some(bundle),
            // a missing entry simply needs a first issuance
            Err(CacheLookup::Miss) => None,
            Err(CacheLookup::Failure(err)) => {
                return Err(err.context(format!("renew certificate for {hostname}")))
            }
        };
        if let Some(bundle) = current {
            if !self.needs_renewal(bundle.leaf().not_after) {
                debug!("certificate for {hostname} is not due for renewal");
                return Ok(());
            }
        }

        let bundle = self
            .acquire_coalesced(hostname)
            .await
            .with_context(|| format!("renew certificate for {hostname}"))?;
        self.delete_from_cache(hostname)
            .await
            .with_context(|| format!("unable to delete certificate from cache for {hostname}"))?;
        self.put_in_cache(hostname, bundle)
            .await
            .with_context(|| format!("unable to put certificate in cache for {hostname}"))?;
        Ok(())
    }

    async fn acquire_coalesced(
        &self,
        hostname: &str,
    ) -> Result<Arc<CertificateBundle>, AcquireError> {
        let (flight, owner) = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(flight) => (flight.clone(), false),
                None => {
                    let issuer = Arc::clone(&self.issuer);
                    let hostname = hostname.to_string();
                    let flight = async move {
                        issuer
                            .certificate_for_domain(&hostname)
                            .await
                            .map(Arc::new)
                            .map_err(AcquireError::new)
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    (flight, true)
                }
            }
        };
        let result = flight.clone().await;
        if owner {
            let mut slot = self.inflight.lock();
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
                *slot = None;
            }
        }
        result
    }

    /// Renews all known hosts in declaration order, accumulating failures.
    async fn renew_all(&self) -> Vec<anyhow::Error> {
        let mut failures = Vec::new();
        for hostname in &self.known_hosts {
            if let Err(err) = self.renew_one(hostname).await {
                failures.push(err);
            }
        }
        failures
    }

    async fn renew_forever(&self) {
        loop {
            let failures = self.renew_all().await;
            for err in failures {
                error!("unable to renew certificates: {err:#}");
            }
            tokio::time::sleep(RENEW_INTERVAL).await;
        }
    }
}

/// The shared outcome of a coalesced acquisition. Cloneable so every waiter
/// on the single-flight slot can observe the same failure.
#[derive(Debug, Clone)]
pub struct AcquireError(Arc<anyhow::Error>);

impl AcquireError {
    fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl Display for AcquireError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for AcquireError {}

/// One or more known hosts could not be provisioned during `start`.
#[derive(Debug)]
pub struct StartError {
    pub failures: Vec<anyhow::Error>,
}

impl Display for StartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let causes = self
            .failures
            .iter()
            .map(|err| format!("{err:#}"))
            .join("; ");
        write!(f, "unable to start due to the following errors: {causes}")
    }
}

impl std::error::Error for StartError {}

pub struct CertificateManagerBuilder {
    cache: Box<dyn Cache>,
    known_hosts: Vec<String>,
    issuer: Option<Arc<dyn CertificateIssuer>>,
    renew_before: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for CertificateManagerBuilder {
    fn default() -> Self {
        Self {
            cache: Box::new(NopCache),
            known_hosts: Vec::new(),
            issuer: None,
            renew_before: DEFAULT_RENEW_BEFORE,
            clock: Arc::new(SystemClock),
        }
    }
}

impl CertificateManagerBuilder {
    /// Durable cache backing the in-memory map. Defaults to a cache that
    /// stores nothing.
    #[must_use]
    pub fn cache(mut self, cache: impl Cache + 'static) -> Self {
        self.cache = Box::new(cache);
        self
    }

    /// Hostnames the manager proactively keeps certificates for. Hostnames
    /// are case-insensitive per DNS and normalized to lowercase.
    #[must_use]
    pub fn known_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_hosts = hosts
            .into_iter()
            .map(|host| host.into().to_ascii_lowercase())
            .collect();
        self
    }

    #[must_use]
    pub fn issuer(mut self, issuer: Arc<dyn CertificateIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// How long before expiry a replacement certificate is requested.
    #[must_use]
    pub fn renew_before(mut self, renew_before: Duration) -> Self {
        self.renew_before = renew_before;
        self
    }

    /// Overrides the time source, for tests.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<CertificateManager>> {
        let issuer = self
            .issuer
            .ok_or_else(|| anyhow!("certificate manager needs an issuer"))?;
        Ok(Arc::new(CertificateManager {
            cache: self.cache,
            known_hosts: self.known_hosts,
            issuer,
            renew_before: self.renew_before,
            clock: self.clock,
            certificates: RwLock::new(HashMap::new()),
            inflight: Mutex::new(None),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::generate_bundle;
    use crate::time::FrozenClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ::time::macros::datetime;
    use ::time::OffsetDateTime;

    fn days(n: i64) -> ::time::Duration {
        ::time::Duration::days(n)
    }

    const HOST: &str = "foo.example.com";
    const FROZEN_NOW: OffsetDateTime = datetime!(2006-01-02 03:04:00 UTC);
    const THIRTY_DAYS: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Cache that stores entries in memory and counts every operation.
    #[derive(Debug, Default)]
    struct CountingCache {
        store: Mutex<HashMap<String, Vec<u8>>>,
        gets: AtomicUsize,
        puts: AtomicUsize,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl Cache for CountingCache {
        async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.store.lock().get(key).cloned().ok_or(CacheError::Miss)
        }

        async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.store.lock().insert(key.to_string(), data.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.store.lock().remove(key);
            Ok(())
        }
    }

    /// Issuer that counts invocations and mints certificates with a fixed
    /// validity window.
    #[derive(Debug)]
    struct CountingIssuer {
        count: AtomicUsize,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    }

    impl CountingIssuer {
        fn new(not_before: OffsetDateTime, not_after: OffsetDateTime) -> Self {
            Self {
                count: AtomicUsize::new(0),
                not_before,
                not_after,
            }
        }

        fn calls(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CertificateIssuer for CountingIssuer {
        async fn certificate_for_domain(
            &self,
            hostname: &str,
        ) -> anyhow::Result<CertificateBundle> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(generate_bundle(hostname, 1, self.not_before, self.not_after))
        }
    }

    /// Issuer that takes a configurable amount of wall-clock time.
    #[derive(Debug)]
    struct SleepingIssuer {
        delay: Duration,
    }

    #[async_trait]
    impl CertificateIssuer for SleepingIssuer {
        async fn certificate_for_domain(
            &self,
            hostname: &str,
        ) -> anyhow::Result<CertificateBundle> {
            tokio::time::sleep(self.delay).await;
            let now = OffsetDateTime::now_utc();
            Ok(generate_bundle(hostname, 1, now, now))
        }
    }

    #[derive(Debug)]
    struct FailingIssuer;

    #[async_trait]
    impl CertificateIssuer for FailingIssuer {
        async fn certificate_for_domain(
            &self,
            _hostname: &str,
        ) -> anyhow::Result<CertificateBundle> {
            Err(anyhow!("the CA is on fire"))
        }
    }

    fn manager_with(
        cache: Arc<CountingCache>,
        issuer: Arc<dyn CertificateIssuer>,
    ) -> Arc<CertificateManager> {
        CertificateManager::builder()
            .cache(cache)
            .known_hosts([HOST])
            .issuer(issuer)
            .renew_before(THIRTY_DAYS)
            .clock(Arc::new(FrozenClock(FROZEN_NOW)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_blocks_until_certificates_are_ready() {
        let wait = Duration::from_secs(1);
        let cache = Arc::new(CountingCache::default());
        let manager = manager_with(cache, Arc::new(SleepingIssuer { delay: wait }));

        let started = std::time::Instant::now();
        manager.clone().start().await.unwrap();
        let elapsed = started.elapsed();
        assert!(
            elapsed >= wait,
            "start did not block, returned after {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_start_aggregates_failures() {
        let cache = Arc::new(CountingCache::default());
        let manager = manager_with(cache, Arc::new(FailingIssuer));
        let err = manager.clone().start().await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        let message = err.to_string();
        assert!(message.contains(HOST), "error does not name the host: {message}");
        assert!(message.contains("the CA is on fire"), "error lost its cause: {message}");
    }

    #[tokio::test]
    async fn test_get_put_get_cycle() {
        let cache = Arc::new(CountingCache::default());
        let issuer = Arc::new(CountingIssuer::new(FROZEN_NOW, FROZEN_NOW));
        let manager = manager_with(cache.clone(), issuer);

        let bundle = Arc::new(generate_bundle(HOST, 1, FROZEN_NOW, FROZEN_NOW));

        // a get before anything is stored must consult the durable cache
        assert!(matches!(
            manager.get_from_cache(HOST).await,
            Err(CacheLookup::Miss)
        ));
        assert_eq!(cache.gets.load(Ordering::SeqCst), 1);

        manager.put_in_cache(HOST, bundle.clone()).await.unwrap();
        assert_eq!(manager.certificates.read().len(), 1);
        assert_eq!(cache.puts.load(Ordering::SeqCst), 1);

        // served from memory: same serial, no extra durable-cache traffic
        let from_cache = manager.get_from_cache(HOST).await.unwrap();
        assert_eq!(from_cache.leaf().serial, bundle.leaf().serial);
        assert_eq!(manager.certificates.read().len(), 1);
        assert_eq!(cache.gets.load(Ordering::SeqCst), 1);
        assert_eq!(cache.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_both_layers() {
        let cache = Arc::new(CountingCache::default());
        let issuer = Arc::new(CountingIssuer::new(FROZEN_NOW, FROZEN_NOW));
        let manager = manager_with(cache.clone(), issuer);

        let bundle = Arc::new(generate_bundle(HOST, 1, FROZEN_NOW, FROZEN_NOW));
        manager.put_in_cache(HOST, bundle).await.unwrap();
        assert_eq!(manager.certificates.read().len(), 1);
        assert_eq!(cache.puts.load(Ordering::SeqCst), 1);

        manager.delete_from_cache(HOST).await.unwrap();
        assert_eq!(manager.certificates.read().len(), 0);
        assert_eq!(cache.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_renewal_skipped_when_not_due() {
        let cache = Arc::new(CountingCache::default());
        // issuer would mint 90-day certificates, but must not be asked
        let issuer = Arc::new(CountingIssuer::new(
            FROZEN_NOW,
            FROZEN_NOW + days(90),
        ));
        let manager = manager_with(cache, issuer.clone());

        let not_after = FROZEN_NOW + days(31);
        let bundle = Arc::new(generate_bundle(HOST, 1, FROZEN_NOW, not_after));
        manager.put_in_cache(HOST, bundle).await.unwrap();

        manager.renew_one(HOST).await.unwrap();

        assert_eq!(issuer.calls(), 0);
        let cached = manager.get_from_cache(HOST).await.unwrap();
        assert_eq!(cached.leaf().not_after, not_after);
    }

    #[tokio::test]
    async fn test_renewal_triggered_when_due() {
        let cache = Arc::new(CountingCache::default());
        let renewed_not_after = FROZEN_NOW + days(90);
        let issuer = Arc::new(CountingIssuer::new(FROZEN_NOW, renewed_not_after));
        let manager = manager_with(cache, issuer.clone());

        // 29 days left with a 30-day lead time: due for renewal
        let bundle = Arc::new(generate_bundle(
            HOST,
            1,
            FROZEN_NOW,
            FROZEN_NOW + days(29),
        ));
        manager.put_in_cache(HOST, bundle).await.unwrap();

        manager.renew_one(HOST).await.unwrap();

        assert_eq!(issuer.calls(), 1);
        let cached = manager.get_from_cache(HOST).await.unwrap();
        assert_eq!(cached.leaf().not_after, renewed_not_after);
    }

    #[tokio::test]
    async fn test_missing_entry_needs_renewal() {
        let cache = Arc::new(CountingCache::default());
        let issuer = Arc::new(CountingIssuer::new(
            FROZEN_NOW,
            FROZEN_NOW + days(90),
        ));
        let manager = manager_with(cache, issuer.clone());

        manager.renew_one(HOST).await.unwrap();
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_replaced() {
        let cache = Arc::new(CountingCache::default());
        cache
            .store
            .lock()
            .insert(HOST.to_string(), b"garbage that is not PEM".to_vec());
        let issuer = Arc::new(CountingIssuer::new(
            FROZEN_NOW,
            FROZEN_NOW + days(90),
        ));
        let manager = manager_with(cache.clone(), issuer.clone());

        manager.renew_one(HOST).await.unwrap();
        assert_eq!(issuer.calls(), 1);
        // the replacement entry must decode cleanly
        let stored = cache.store.lock().get(HOST).cloned().unwrap();
        CertificateBundle::decode(&stored).unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_renewals_share_one_acquisition() {
        let cache = Arc::new(CountingCache::default());
        let issuer = Arc::new(SlowCountingIssuer {
            inner: CountingIssuer::new(FROZEN_NOW, FROZEN_NOW + days(90)),
        });
        let manager = manager_with(cache, issuer.clone());

        let (first, second) = tokio::join!(
            manager.acquire_coalesced(HOST),
            manager.acquire_coalesced(HOST)
        );
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(issuer.inner.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));

        // once the flight has landed, a new acquisition starts fresh
        manager.acquire_coalesced(HOST).await.unwrap();
        assert_eq!(issuer.inner.calls(), 2);
    }

    #[derive(Debug)]
    struct SlowCountingIssuer {
        inner: CountingIssuer,
    }

    #[async_trait]
    impl CertificateIssuer for SlowCountingIssuer {
        async fn certificate_for_domain(
            &self,
            hostname: &str,
        ) -> anyhow::Result<CertificateBundle> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.certificate_for_domain(hostname).await
        }
    }

    #[tokio::test]
    async fn test_get_certificate_for_unknown_host_errors() {
        let cache = Arc::new(CountingCache::default());
        let issuer = Arc::new(CountingIssuer::new(FROZEN_NOW, FROZEN_NOW));
        let manager = manager_with(cache, issuer);
        let err = manager.get_certificate("unknown.example.com").await.unwrap_err();
        assert!(err.to_string().contains("unknown.example.com"));
    }

    #[tokio::test]
    async fn test_get_certificate_is_case_insensitive() {
        let cache = Arc::new(CountingCache::default());
        let issuer = Arc::new(CountingIssuer::new(FROZEN_NOW, FROZEN_NOW));
        let manager = manager_with(cache, issuer);
        let bundle = Arc::new(generate_bundle(HOST, 7, FROZEN_NOW, FROZEN_NOW));
        manager.put_in_cache(HOST, bundle).await.unwrap();

        let found = manager.get_certificate("FOO.Example.COM").await.unwrap();
        assert_eq!(found.leaf().serial, 7u32.into());
        assert!(manager.cached_certificate("FOO.example.com").is_some());
    }

    #[tokio::test]
    async fn test_rehydrates_from_durable_cache() {
        let cache = Arc::new(CountingCache::default());
        let issuer: Arc<dyn CertificateIssuer> =
            Arc::new(CountingIssuer::new(FROZEN_NOW, FROZEN_NOW));
        let first = manager_with(cache.clone(), issuer.clone());
        let bundle = Arc::new(generate_bundle(HOST, 3, FROZEN_NOW, FROZEN_NOW));
        first.put_in_cache(HOST, bundle).await.unwrap();

        // a second manager over the same durable cache starts cold
        let second = manager_with(cache, issuer);
        assert!(second.cached_certificate(HOST).is_none());
        let found = second.get_certificate(HOST).await.unwrap();
        assert_eq!(found.leaf().serial, 3u32.into());
        assert!(second.cached_certificate(HOST).is_some());
    }

    #[test]
    fn test_needs_renewal_is_monotone_in_now() {
        let issuer = Arc::new(FailingIssuer);
        let not_after = FROZEN_NOW + days(30);
        let mut was_due = false;
        for day in 0..60 {
            let now = FROZEN_NOW + days(day);
            let manager = CertificateManager::builder()
                .issuer(issuer.clone())
                .renew_before(THIRTY_DAYS)
                .clock(Arc::new(FrozenClock(now)))
                .build()
                .unwrap();
            let due = manager.needs_renewal(not_after);
            assert!(
                !was_due || due,
                "renewal flipped back to not-due at day {day}"
            );
            was_due = due;
        }
        assert!(was_due);
    }
}
