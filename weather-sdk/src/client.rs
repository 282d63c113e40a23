use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::{
    SdkConfig, WeatherError,
    cache::WeatherCache,
    clock::{Clock, SystemClock},
    mode::OperationMode,
    model::WeatherData,
    provider::{ResponseParser, WeatherFetcher},
    refresher::{RefreshStats, Refresher},
};

/// Shared handle returned by the [`Registry`](crate::Registry).
pub type ClientHandle = Arc<WeatherClient>;

/// Cached weather access for one credential.
///
/// In [`OperationMode::Polling`] the client also owns a [`Refresher`] that
/// keeps the cached locations warm. The refresher is running before the
/// constructor returns.
#[derive(Debug)]
pub struct WeatherClient {
    inner: Arc<ClientInner>,
    mode: OperationMode,
    refresher: Option<Refresher>,
}

impl WeatherClient {
    /// Build a client around explicit transport and parser.
    ///
    /// Fails with [`WeatherError::NoRuntime`] when polling is requested outside
    /// a Tokio runtime.
    pub fn with_collaborators(
        credential: impl Into<String>,
        mode: OperationMode,
        config: &SdkConfig,
        fetcher: Arc<dyn WeatherFetcher>,
        parser: Arc<dyn ResponseParser>,
    ) -> Result<Self, WeatherError> {
        Self::with_clock(credential, mode, config, fetcher, parser, Arc::new(SystemClock))
    }

    /// Like [`with_collaborators`](Self::with_collaborators), with capture
    /// stamps and relevance checks taken from `clock`.
    pub fn with_clock(
        credential: impl Into<String>,
        mode: OperationMode,
        config: &SdkConfig,
        fetcher: Arc<dyn WeatherFetcher>,
        parser: Arc<dyn ResponseParser>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WeatherError> {
        let inner = Arc::new(ClientInner {
            credential: credential.into(),
            cache: WeatherCache::with_clock(config.capacity, config.ttl(), clock),
            fetcher,
            parser,
            in_flight: DashMap::new(),
        });

        let refresher = match mode {
            OperationMode::Polling => {
                Some(Refresher::start(Arc::clone(&inner), config.poll_interval())?)
            }
            OperationMode::Request => None,
        };

        Ok(Self { inner, mode, refresher })
    }

    /// Current weather for `location`, served from cache while relevant.
    ///
    /// A miss or stale entry triggers fetch + parse + store. The fresh record
    /// is returned even if the cache was too full to keep it.
    pub async fn get_by_location(&self, location: &str) -> Result<Arc<WeatherData>, WeatherError> {
        self.inner.load(location).await
    }

    /// Stop the refresher and close the cache. Safe to call repeatedly.
    ///
    /// A refresh still in flight finishes its fetch but cannot store the
    /// result. Later reads still go upstream; nothing is cached again.
    pub fn shutdown(&self) {
        if let Some(refresher) = &self.refresher {
            refresher.stop();
        }
        self.inner.cache.close();
    }

    pub fn credential(&self) -> &str {
        &self.inner.credential
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn cache(&self) -> &WeatherCache {
        &self.inner.cache
    }

    /// Whether a background refresher is currently active.
    pub fn is_polling(&self) -> bool {
        self.refresher.as_ref().is_some_and(Refresher::is_running)
    }

    pub fn refresh_stats(&self) -> Option<RefreshStats> {
        self.refresher.as_ref().map(Refresher::stats)
    }
}

impl Drop for WeatherClient {
    fn drop(&mut self) {
        if let Some(refresher) = &self.refresher {
            refresher.stop();
        }
    }
}

/// State shared between a client and its refresher.
#[derive(Debug)]
pub(crate) struct ClientInner {
    credential: String,
    cache: WeatherCache,
    fetcher: Arc<dyn WeatherFetcher>,
    parser: Arc<dyn ResponseParser>,
    // One async lock per location with a fetch in progress.
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl ClientInner {
    pub(crate) fn cache(&self) -> &WeatherCache {
        &self.cache
    }

    /// Cache hit, or a single fetch per location shared by concurrent callers.
    pub(crate) async fn load(&self, location: &str) -> Result<Arc<WeatherData>, WeatherError> {
        if let Some(hit) = self.cache.get_relevant(location) {
            debug!(location, "cache hit");
            return Ok(hit);
        }

        // Declared first so it runs last, after the lock and slot are released,
        // even when this future is dropped mid-fetch.
        let _cleanup = InFlightCleanup { slots: &self.in_flight, location };
        let slot = Arc::clone(self.in_flight.entry(location.to_string()).or_default().value());
        let _guard = slot.lock().await;

        // Another caller may have stored a fresh record while we waited.
        match self.cache.get_relevant(location) {
            Some(hit) => {
                debug!(location, "cache filled by concurrent fetch");
                Ok(hit)
            }
            None => self.fetch_and_store(location).await,
        }
    }

    async fn fetch_and_store(&self, location: &str) -> Result<Arc<WeatherData>, WeatherError> {
        debug!(location, "cache miss, fetching");

        let raw = self.fetcher.fetch(location, &self.credential).await?;
        let observation = self.parser.parse(&raw)?;
        let record = Arc::new(WeatherData::capture_at(observation, self.cache.now()));

        if !self.cache.put(location, Arc::clone(&record)) {
            info!(location, "cache full, record served without caching");
        }

        Ok(record)
    }
}

/// Drops the per-location lock entry once nobody else holds it.
struct InFlightCleanup<'a> {
    slots: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    location: &'a str,
}

impl Drop for InFlightCleanup<'_> {
    fn drop(&mut self) {
        self.slots.remove_if(self.location, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::TokioClock;
    use crate::provider::{HttpFetcher, JsonParser, testing::ScriptedFetcher, testing::sample_body};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(ttl_ms: u64, poll_interval_ms: u64, capacity: usize) -> SdkConfig {
        SdkConfig { ttl_ms, poll_interval_ms, capacity, ..Default::default() }
    }

    fn client(fetcher: &Arc<ScriptedFetcher>, mode: OperationMode, cfg: &SdkConfig) -> WeatherClient {
        WeatherClient::with_clock(
            "KEY",
            mode,
            cfg,
            fetcher.clone(),
            Arc::new(JsonParser),
            Arc::new(TokioClock::new()),
        )
        .expect("client builds")
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_avoids_network() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let client = client(&fetcher, OperationMode::Request, &SdkConfig::default());

        let first = client.get_by_location("Paris").await.unwrap();
        let second = client.get_by_location("Paris").await.unwrap();

        assert_eq!(fetcher.calls("Paris"), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_triggers_refetch() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let client = client(&fetcher, OperationMode::Request, &config(50, 60_000, 10));

        let first = client.get_by_location("Paris").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = client.get_by_location("Paris").await.unwrap();

        assert_eq!(fetcher.calls("Paris"), 2);
        assert!(second.captured_at() > first.captured_at());
        assert_ne!(first.temperature.temp, second.temperature.temp);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_just_inside_ttl_is_served_from_cache() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let client = client(&fetcher, OperationMode::Request, &config(50, 60_000, 10));

        client.get_by_location("Paris").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        client.get_by_location("Paris").await.unwrap();
        assert_eq!(fetcher.calls("Paris"), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.get_by_location("Paris").await.unwrap();
        assert_eq!(fetcher.calls("Paris"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_still_returns_fresh_record() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let client = client(&fetcher, OperationMode::Request, &config(60_000, 60_000, 2));

        client.get_by_location("Paris").await.unwrap();
        client.get_by_location("Rome").await.unwrap();
        let extra = client.get_by_location("Oslo").await.unwrap();

        assert_eq!(extra.location_name(), "Oslo");
        assert_eq!(client.cache().len(), 2);
        assert!(!client.cache().contains("Oslo"));

        // Not cached, so the next read goes upstream again.
        client.get_by_location("Oslo").await.unwrap();
        assert_eq!(fetcher.calls("Oslo"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_error_propagates_and_caches_nothing() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.fail("Paris");
        let client = client(&fetcher, OperationMode::Request, &SdkConfig::default());

        let err = client.get_by_location("Paris").await.unwrap_err();

        assert!(matches!(err, WeatherError::Upstream { status: 503, .. }));
        assert!(client.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(50)));
        let client = Arc::new(client(&fetcher, OperationMode::Request, &SdkConfig::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_by_location("Paris").await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fetcher.calls("Paris"), 1);
        assert!(client.inner.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetch_releases_location_lock() {
        let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(100)));
        let client = client(&fetcher, OperationMode::Request, &SdkConfig::default());

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), client.get_by_location("Paris")).await;

        assert!(timed_out.is_err());
        assert!(client.inner.in_flight.is_empty());
        assert!(client.cache().is_empty());

        client.get_by_location("Paris").await.unwrap();
        assert_eq!(fetcher.calls("Paris"), 2);
        assert!(client.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn end_to_end_over_http() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/Paris/KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sample_body("Paris", 280.1)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let base = reqwest::Url::parse(&format!("{}/api", mock_server.uri())).unwrap();
        let fetcher = HttpFetcher::new(base, Duration::from_secs(5)).unwrap();
        let client = WeatherClient::with_collaborators(
            "KEY",
            OperationMode::Request,
            &SdkConfig::default(),
            Arc::new(fetcher),
            Arc::new(JsonParser),
        )
        .unwrap();

        let record = client.get_by_location("Paris").await.unwrap();
        client.get_by_location("Paris").await.unwrap();

        assert_eq!(record.temperature.temp, 280.1);
        assert_eq!(record.weather.main, "Clouds");
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"name\": \"Paris\"}"))
            .mount(&mock_server)
            .await;

        let base = reqwest::Url::parse(&mock_server.uri()).unwrap();
        let client = WeatherClient::with_collaborators(
            "KEY",
            OperationMode::Request,
            &SdkConfig::default(),
            Arc::new(HttpFetcher::new(base, Duration::from_secs(5)).unwrap()),
            Arc::new(JsonParser),
        )
        .unwrap();

        let err = client.get_by_location("Paris").await.unwrap_err();
        assert!(matches!(err, WeatherError::Parse(_)));
        assert!(client.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_client_starts_refresher_immediately() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let client = client(&fetcher, OperationMode::Polling, &SdkConfig::default());

        assert!(client.is_polling());
        assert_eq!(client.mode(), OperationMode::Polling);
    }

    #[test]
    fn polling_outside_runtime_fails() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let err = WeatherClient::with_collaborators(
            "KEY",
            OperationMode::Polling,
            &SdkConfig::default(),
            fetcher,
            Arc::new(JsonParser),
        )
        .unwrap_err();

        assert!(matches!(err, WeatherError::NoRuntime));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent() {
        let fetcher = Arc::new(ScriptedFetcher::default());

        let polling = client(&fetcher, OperationMode::Polling, &SdkConfig::default());
        polling.get_by_location("Paris").await.unwrap();
        polling.shutdown();
        polling.shutdown();
        assert!(!polling.is_polling());
        assert!(polling.cache().is_empty());
        assert!(polling.cache().is_closed());

        let request = client(&fetcher, OperationMode::Request, &SdkConfig::default());
        request.shutdown();
        request.shutdown();
        assert!(!request.is_polling());
        assert!(request.refresh_stats().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reads_after_shutdown_are_not_cached() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let client = client(&fetcher, OperationMode::Request, &SdkConfig::default());

        client.shutdown();
        let record = client.get_by_location("Paris").await.unwrap();

        assert_eq!(record.location_name(), "Paris");
        assert!(client.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_in_flight_at_shutdown_leaves_cache_empty() {
        let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(30)));
        let client = client(&fetcher, OperationMode::Polling, &config(50, 100, 10));

        // Stored at t=30; the tick at t=100 starts a refresh that lands at t=130.
        client.get_by_location("Paris").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fetcher.calls("Paris"), 2);

        client.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fetcher.calls("Paris"), 2);
        assert!(client.cache().is_empty());
    }
}
