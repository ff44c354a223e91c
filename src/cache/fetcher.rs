//! Cache-then-fetch pipeline shared by every upstream client
//!
//! Each client owns one `CachedFetcher<T>` per endpoint and supplies the cache
//! key; the fetcher handles lookup, timed fetch, status check, parsing, storing
//! and the stale fallback.

use std::time::Duration;

use tracing::{debug, warn};

use super::{CachedData, ResponseCache};
use crate::data::SourceId;
use crate::fetch::{FetchRequest, FetchResult, TimedFetch};

/// Parses a raw upstream body into its normalized shape
pub type ParseFn<T> = fn(&str) -> FetchResult<T>;

/// Generic cached fetch for one upstream endpoint
#[derive(Clone)]
pub struct CachedFetcher<T> {
    source: SourceId,
    http: TimedFetch,
    cache: ResponseCache,
    ttl: Duration,
    timeout: Duration,
    parse: ParseFn<T>,
}

impl<T> std::fmt::Debug for CachedFetcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFetcher")
            .field("source", &self.source)
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> CachedFetcher<T> {
    pub fn new(
        source: SourceId,
        http: TimedFetch,
        cache: ResponseCache,
        ttl: Duration,
        timeout: Duration,
        parse: ParseFn<T>,
    ) -> Self {
        Self {
            source,
            http,
            cache,
            ttl,
            timeout,
            parse,
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Returns the cached value for `key` or fetches it
    ///
    /// # Behavior
    /// - Fresh cache entry: returned without touching the network
    /// - Miss or expired: fetched, parsed, stored, returned with `is_expired = false`
    /// - Fetch failure: the expired entry is returned with `is_expired = true` if one
    ///   exists, otherwise the error
    pub async fn fetch(&self, key: &str, request: FetchRequest) -> FetchResult<CachedData<T>> {
        if let Some(cached) = self.cache.read::<T>(key) {
            if !cached.is_expired {
                debug!(source = %self.source, key, "Cache hit");
                return Ok(cached);
            }
        }

        match self.http.fetch_parsed(&request, self.timeout, self.parse).await {
            Ok(data) => {
                self.cache.put(key, data.clone(), self.ttl);
                Ok(CachedData::fresh(data))
            }
            Err(err) => {
                if let Some(stale) = self.cache.read::<T>(key) {
                    warn!(
                        source = %self.source,
                        key,
                        error = %err,
                        cached_at = %stale.cached_at,
                        "Upstream failed, serving stale cache entry"
                    );
                    return Ok(CachedData {
                        is_expired: true,
                        ..stale
                    });
                }
                warn!(source = %self.source, key, error = %err, "Upstream failed with no cached fallback");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use chrono::Utc;
    use httpmock::prelude::*;

    fn parse_number(body: &str) -> FetchResult<f64> {
        body.trim()
            .parse::<f64>()
            .map_err(|e| FetchError::ParseFailure(e.to_string()))
    }

    fn fetcher(cache: &ResponseCache, ttl: Duration) -> CachedFetcher<f64> {
        CachedFetcher::new(
            SourceId::Kp,
            TimedFetch::new(),
            cache.clone(),
            ttl,
            Duration::from_millis(500),
            parse_number,
        )
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/kp");
                then.status(200).body("4.33");
            })
            .await;
        let cache = ResponseCache::new();
        let fetcher = fetcher(&cache, Duration::from_secs(60));

        let first = fetcher
            .fetch("kp_latest", FetchRequest::get(server.url("/kp")))
            .await
            .expect("first fetch");
        let second = fetcher
            .fetch("kp_latest", FetchRequest::get(server.url("/kp")))
            .await
            .expect("second fetch");

        assert_eq!(first.data, 4.33);
        assert!(!first.is_expired);
        assert_eq!(second.data, 4.33);
        assert_eq!(mock.hits_async().await, 1, "second call should be served from cache");
        assert_eq!(cache.get::<f64>("kp_latest"), Some(4.33));
    }

    #[tokio::test]
    async fn test_failure_serves_stale_entry() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/kp");
                then.status(500);
            })
            .await;
        let cache = ResponseCache::new();
        cache.put("kp_latest", 2.0_f64, Duration::ZERO);
        let fetcher = fetcher(&cache, Duration::from_secs(60));

        let result = fetcher
            .fetch("kp_latest", FetchRequest::get(server.url("/kp")))
            .await
            .expect("stale entry should be served");

        assert_eq!(result.data, 2.0);
        assert!(result.is_expired);
        assert!(result.cached_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_failure_without_cache_is_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/kp");
                then.status(404);
            })
            .await;
        let cache = ResponseCache::new();
        let fetcher = fetcher(&cache, Duration::from_secs(60));

        let result = fetcher
            .fetch("kp_latest", FetchRequest::get(server.url("/kp")))
            .await;

        assert_eq!(result.unwrap_err(), FetchError::UpstreamStatus(404));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_does_not_poison_cache() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/kp");
                then.status(200).body("not-a-number");
            })
            .await;
        let cache = ResponseCache::new();
        let fetcher = fetcher(&cache, Duration::from_secs(60));

        let result = fetcher
            .fetch("kp_latest", FetchRequest::get(server.url("/kp")))
            .await;

        assert!(matches!(result, Err(FetchError::ParseFailure(_))));
        assert!(cache.read::<f64>("kp_latest").is_none());
    }

    #[tokio::test]
    async fn test_timeout_serves_stale_entry() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/kp");
                then.status(200).delay(Duration::from_secs(3)).body("9");
            })
            .await;
        let cache = ResponseCache::new();
        cache.put("kp_latest", 3.67_f64, Duration::ZERO);
        let fetcher = fetcher(&cache, Duration::from_secs(60));

        let result = fetcher
            .fetch("kp_latest", FetchRequest::get(server.url("/kp")))
            .await
            .expect("stale entry should be served");

        assert_eq!(result.data, 3.67);
        assert!(result.is_expired);
    }
}
