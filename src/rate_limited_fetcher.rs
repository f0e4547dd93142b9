// src/rate_limited_fetcher.rs

use crate::settings::RateLimit;
use crate::utils::short_url;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

/// Transport-level failure for a single GET.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("HTTP error status: {0}")]
    Status(u16),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("JSON decode failed: {0}")]
    Decode(String),
}

/// Raw HTTP access used by the fetcher. Injected so tests can run against a mock.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError>;
}

/// `reqwest`-backed transport.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Result of a governed fetch. `data` is `None` when every attempt failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub url: String,
    pub data: Option<serde_json::Value>,
    pub attempts: u32,
}

impl FetchResponse {
    fn empty(url: String, attempts: u32) -> Self {
        Self {
            url,
            data: None,
            attempts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

/// Point-in-time view of the limiter, mostly for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetcherStats {
    pub in_window: usize,
    pub queued: usize,
    pub paused: bool,
    pub backoff: Duration,
}

struct PendingRequest {
    url: String,
    retries: u32,
    reply: oneshot::Sender<FetchResponse>,
}

struct LimiterState {
    /// Dispatch instants inside the current window, oldest first.
    dispatched: VecDeque<Instant>,
    queue: VecDeque<PendingRequest>,
    paused_until: Option<Instant>,
    backoff: Duration,
}

impl LimiterState {
    fn cleanup(&mut self, now: Instant, period: Duration) {
        while let Some(oldest) = self.dispatched.front() {
            if now.duration_since(*oldest) >= period {
                self.dispatched.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_paused(&mut self, now: Instant) -> bool {
        match self.paused_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.paused_until = None;
                false
            }
            None => false,
        }
    }
}

struct Shared {
    config: RateLimit,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<LimiterState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn has_capacity(&self, state: &LimiterState) -> bool {
        state.dispatched.len() < self.config.requests_per_period.max(1)
    }

    /// Drains the queue while the window has room and the breaker is closed.
    fn flush_queue(self: &Arc<Self>) {
        let mut state = self.state();
        let now = Instant::now();
        state.cleanup(now, self.config.period());
        if state.is_paused(now) {
            return;
        }
        while self.has_capacity(&state) {
            let Some(request) = state.queue.pop_front() else {
                break;
            };
            self.dispatch(&mut state, request, now);
        }
    }

    /// Consumes a window slot and runs the request on its own task.
    fn dispatch(self: &Arc<Self>, state: &mut LimiterState, request: PendingRequest, now: Instant) {
        state.dispatched.push_back(now);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            debug!("Fetching URL: {}", short_url(&request.url));
            let request_timeout = shared.config.request_timeout();
            let result = match timeout(request_timeout, shared.transport.get_json(&request.url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(request_timeout)),
            };
            shared.complete(request, result);
        });
    }

    fn complete(&self, request: PendingRequest, result: Result<serde_json::Value, FetchError>) {
        let attempts = request.retries + 1;
        match result {
            Ok(data) => {
                debug!("Fetched URL: {}", short_url(&request.url));
                self.state().backoff = self.config.initial_backoff();
                let _ = request.reply.send(FetchResponse {
                    url: request.url,
                    data: Some(data),
                    attempts,
                });
            }
            Err(e) => {
                let mut state = self.state();
                warn!(
                    "⚠️ Error fetching URL (attempt {}/{}): {} - {}",
                    attempts,
                    self.config.max_retries + 1,
                    short_url(&request.url),
                    e
                );
                if request.retries < self.config.max_retries {
                    state.queue.push_back(PendingRequest {
                        retries: request.retries + 1,
                        ..request
                    });
                } else {
                    warn!(
                        "Giving up on URL after {} attempts, resolving empty: {}",
                        attempts,
                        short_url(&request.url)
                    );
                    let _ = request.reply.send(FetchResponse::empty(request.url, attempts));
                }
                self.handle_failure(&mut state);
            }
        }
    }

    /// Opens the shared breaker for the current backoff, then grows it.
    fn handle_failure(&self, state: &mut LimiterState) {
        let until = Instant::now() + state.backoff;
        state.paused_until = Some(match state.paused_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        info!("Pausing outbound requests for {:?}", state.backoff);
        state.backoff = state.backoff.mul_f64(self.config.backoff_multiplier.max(1.0));
    }
}

/// Burst-tolerant fetcher governing every outbound call against one sliding window.
///
/// Up to `requests_per_period` requests are dispatched per `period_ms`. Overflow is
/// queued FIFO and drained by a background tick every `flush_interval_ms`. A failed
/// request is re-queued up to `max_retries` times and then resolves empty, so callers
/// never see an error. Any failure pauses all dispatching for the current backoff,
/// which starts at `initial_backoff_ms`, grows by `backoff_multiplier` per failure and
/// resets on the next success.
///
/// Must be created inside a tokio runtime. Share one instance (behind `Arc`) across
/// every collaborator that talks to the same upstreams.
pub struct RateLimitedFetcher {
    shared: Arc<Shared>,
    flusher: JoinHandle<()>,
}

impl RateLimitedFetcher {
    pub fn new(config: RateLimit, transport: Arc<dyn HttpTransport>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(LimiterState {
                dispatched: VecDeque::new(),
                queue: VecDeque::new(),
                paused_until: None,
                backoff: config.initial_backoff(),
            }),
            config,
            transport,
        });

        let flush_shared = Arc::clone(&shared);
        let flusher = tokio::spawn(async move {
            let mut ticker = interval(flush_shared.config.flush_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                flush_shared.flush_queue();
            }
        });

        Self { shared, flusher }
    }

    /// Fetcher over the default `reqwest` transport.
    pub fn with_reqwest(config: RateLimit) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Fetches one URL through the governor. Never fails: exhausted retries resolve empty.
    pub async fn fetch(&self, url: &str) -> FetchResponse {
        let (reply, receiver) = oneshot::channel();
        let request = PendingRequest {
            url: url.to_string(),
            retries: 0,
            reply,
        };

        {
            let mut state = self.shared.state();
            let now = Instant::now();
            state.cleanup(now, self.shared.config.period());
            let can_dispatch = state.queue.is_empty()
                && self.shared.has_capacity(&state)
                && !state.is_paused(now);
            if can_dispatch {
                self.shared.dispatch(&mut state, request, now);
            } else {
                state.queue.push_back(request);
            }
        }

        match receiver.await {
            Ok(response) => response,
            Err(_) => {
                warn!("Fetch task dropped before replying: {}", short_url(url));
                FetchResponse::empty(url.to_string(), 0)
            }
        }
    }

    /// Fetches every URL concurrently through the same governor; output follows input order.
    pub async fn multi_fetch(&self, urls: &[String]) -> Vec<FetchResponse> {
        join_all(urls.iter().map(|url| self.fetch(url))).await
    }

    pub fn stats(&self) -> FetcherStats {
        let mut state = self.shared.state();
        let now = Instant::now();
        state.cleanup(now, self.shared.config.period());
        let paused = state.is_paused(now);
        FetcherStats {
            in_window: state.dispatched.len(),
            queued: state.queue.len(),
            paused,
            backoff: state.backoff,
        }
    }
}

impl Drop for RateLimitedFetcher {
    fn drop(&mut self) {
        self.flusher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Records every dispatch and fails a URL its configured number of times.
    struct MockTransport {
        calls: Mutex<Vec<(String, Instant)>>,
        failures_before_success: HashMap<String, u32>,
        seen: Mutex<HashMap<String, u32>>,
    }

    impl MockTransport {
        fn new(failures_before_success: HashMap<String, u32>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failures_before_success,
                seen: Mutex::new(HashMap::new()),
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }

        fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|(u, _)| u == url).count()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
            self.calls.lock().unwrap().push((url.to_string(), Instant::now()));
            let attempt = {
                let mut seen = self.seen.lock().unwrap();
                let entry = seen.entry(url.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };
            let failures = self.failures_before_success.get(url).copied().unwrap_or(0);
            if attempt <= failures {
                return Err(FetchError::Status(500));
            }
            Ok(serde_json::json!({ "url": url }))
        }
    }

    fn test_config() -> RateLimit {
        RateLimit {
            requests_per_period: 4,
            period_ms: 100,
            flush_interval_ms: 10,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 1.5,
            max_retries: 2,
            request_timeout_ms: 5_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_fetch_respects_sliding_window() {
        let config = test_config();
        let per_period = config.requests_per_period;
        let period = config.period();
        let transport = Arc::new(MockTransport::new(HashMap::new()));
        let fetcher = RateLimitedFetcher::new(config, transport.clone());

        let urls: Vec<String> = (0..per_period * 3).map(|i| format!("https://x/{}", i)).collect();
        let responses = fetcher.multi_fetch(&urls).await;

        assert_eq!(responses.len(), urls.len());
        for (response, url) in responses.iter().zip(&urls) {
            assert_eq!(&response.url, url);
            assert!(!response.is_empty());
        }

        let mut times = transport.call_times();
        times.sort();
        assert_eq!(times.len(), urls.len());
        for i in 0..times.len().saturating_sub(per_period) {
            let gap = times[i + per_period].duration_since(times[i]);
            assert!(
                gap >= period,
                "more than {} dispatches within {:?}: gap {:?}",
                per_period,
                period,
                gap
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let url = "https://x/flaky".to_string();
        let transport = Arc::new(MockTransport::new(HashMap::from([(url.clone(), 2)])));
        let fetcher = RateLimitedFetcher::new(test_config(), transport.clone());

        let response = fetcher.fetch(&url).await;
        assert!(!response.is_empty());
        assert_eq!(response.attempts, 3);
        assert_eq!(transport.call_count(&url), 3);
        // Success resets the backoff
        assert_eq!(fetcher.stats().backoff, Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_resolve_empty() {
        let url = "https://x/down".to_string();
        let transport = Arc::new(MockTransport::new(HashMap::from([(url.clone(), u32::MAX)])));
        let fetcher = RateLimitedFetcher::new(test_config(), transport.clone());

        let response = fetcher.fetch(&url).await;
        assert!(response.is_empty());
        assert_eq!(response.attempts, 3);
        assert_eq!(transport.call_count(&url), 3);
        // 1000ms * 1.5^3 after three failures
        assert_eq!(fetcher.stats().backoff, Duration::from_millis(3_375));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_pauses_all_dispatching() {
        let bad = "https://x/bad".to_string();
        let good = "https://x/good".to_string();
        let mut config = test_config();
        config.max_retries = 0;
        let transport = Arc::new(MockTransport::new(HashMap::from([(bad.clone(), 1)])));
        let fetcher = RateLimitedFetcher::new(config, transport.clone());

        let failed = fetcher.fetch(&bad).await;
        assert!(failed.is_empty());
        assert!(fetcher.stats().paused);

        let started = Instant::now();
        let ok = fetcher.fetch(&good).await;
        assert!(!ok.is_empty());
        assert!(Instant::now().duration_since(started) >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_bad_url_does_not_block_batch() {
        let urls: Vec<String> = (0..6).map(|i| format!("https://x/{}", i)).collect();
        let transport = Arc::new(MockTransport::new(HashMap::from([(urls[2].clone(), u32::MAX)])));
        let fetcher = RateLimitedFetcher::new(test_config(), transport);

        let responses = fetcher.multi_fetch(&urls).await;
        assert_eq!(responses.len(), 6);
        assert!(responses[2].is_empty());
        assert_eq!(responses.iter().filter(|r| !r.is_empty()).count(), 5);
    }

    /// Accepts the request and never answers.
    #[derive(Default)]
    struct HangingTransport {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl HttpTransport for HangingTransport {
        async fn get_json(&self, _url: &str) -> Result<serde_json::Value, FetchError> {
            *self.calls.lock().unwrap() += 1;
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out_and_retries() {
        let transport = Arc::new(HangingTransport::default());
        let fetcher = RateLimitedFetcher::new(test_config(), transport.clone());

        let started = Instant::now();
        let response = fetcher.fetch("https://x/silent").await;

        assert!(response.is_empty());
        assert_eq!(response.attempts, 3);
        assert_eq!(*transport.calls.lock().unwrap(), 3);
        // Three 5s timeouts, each one growing the shared backoff
        assert!(Instant::now().duration_since(started) >= Duration::from_secs(15));
        assert_eq!(fetcher.stats().backoff, Duration::from_millis(3_375));
    }
}
