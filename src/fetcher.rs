use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::FetchError;

/// Anything that can turn an identifier into a document body.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<String, FetchError>;
}

/// Real HTTP source: one shared client carrying the politeness headers.
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(headers: &BTreeMap<String, String>, timeout: Duration) -> Result<Self> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {:?}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {}", name))?;
            map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(map)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

/// Inclusive bounds of the random pre-request pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn from_secs(min: f64, max: f64) -> Self {
        Self {
            min: Duration::from_secs_f64(min),
            max: Duration::from_secs_f64(max),
        }
    }

    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Uniform draw from `[min, max]`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::from_secs(0.5, 2.0)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_concurrency: usize,
    pub delay: DelayRange,
    pub show_progress: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            delay: DelayRange::default(),
            show_progress: true,
        }
    }
}

/// Terminal state of one identifier.
#[derive(Debug)]
pub struct FetchOutcome {
    pub url: String,
    pub result: Result<String, FetchError>,
}

impl FetchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fetch stats returned after completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

impl FetchStats {
    pub fn from_outcomes(outcomes: &[FetchOutcome]) -> Self {
        let ok = outcomes.iter().filter(|o| o.is_ok()).count();
        Self {
            total: outcomes.len(),
            ok,
            errors: outcomes.len() - ok,
        }
    }
}

pub struct Fetcher<S> {
    source: Arc<S>,
    config: FetchConfig,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: S, config: FetchConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch every identifier, at most `max_concurrency` at a time.
    ///
    /// Returns once each identifier has produced exactly one outcome.
    /// Outcomes arrive in completion order, which carries no meaning.
    pub async fn fetch_all<I>(&self, urls: I) -> Vec<FetchOutcome>
    where
        I: IntoIterator<Item = String>,
    {
        let urls: Vec<String> = urls.into_iter().collect();
        let total = urls.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let pb = if self.config.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        // Each task reports its own url; a url still pending once the set
        // drains belongs to a task that panicked.
        let mut pending: HashMap<String, usize> = HashMap::with_capacity(total);
        let mut tasks = JoinSet::new();
        for url in urls {
            *pending.entry(url.clone()).or_default() += 1;
            let source = Arc::clone(&self.source);
            let sem = Arc::clone(&semaphore);
            let delay = self.config.delay;

            tasks.spawn(async move {
                let result = fetch_one(source.as_ref(), &sem, delay, &url).await;
                FetchOutcome { url, result }
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut aborted = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Some(n) = pending.get_mut(&outcome.url) {
                        *n -= 1;
                    }
                    match &outcome.result {
                        Ok(body) => info!(url = %outcome.url, bytes = body.len(), "downloaded"),
                        Err(e) => warn!(url = %outcome.url, "fetch failed: {}", e),
                    }
                    outcomes.push(outcome);
                }
                Err(e) => aborted.push(e.to_string()),
            }
            pb.inc(1);
        }

        let orphans = pending
            .into_iter()
            .flat_map(|(url, n)| std::iter::repeat(url).take(n));
        for (url, reason) in orphans.zip(aborted) {
            warn!(url = %url, "fetch task aborted: {}", reason);
            outcomes.push(FetchOutcome {
                result: Err(FetchError::Aborted {
                    url: url.clone(),
                    reason,
                }),
                url,
            });
        }

        pb.finish_and_clear();
        let stats = FetchStats::from_outcomes(&outcomes);
        info!(
            "Fetched {} pages ({} ok, {} errors)",
            stats.total, stats.ok, stats.errors
        );
        outcomes
    }
}

/// Slot, pause, request. The permit lives until the body is read or the
/// request has failed.
async fn fetch_one<S: PageSource + ?Sized>(
    source: &S,
    semaphore: &Semaphore,
    delay: DelayRange,
    url: &str,
) -> Result<String, FetchError> {
    let _permit = semaphore.acquire().await.map_err(|_| FetchError::Closed)?;
    tokio::time::sleep(delay.sample()).await;
    info!(url = %url, "requesting");
    source.get(url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory source that records how many requests overlap.
    #[derive(Default)]
    struct CountingSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<String>>,
        fail: HashSet<String>,
        latency: Duration,
    }

    #[async_trait]
    impl PageSource for CountingSource {
        async fn get(&self, url: &str) -> Result<String, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(url.to_string());
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(url) {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                })
            } else {
                Ok(format!("<h1>{}</h1>", url))
            }
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://www.csfd.cz/film/{}/", i)).collect()
    }

    fn quiet(max_concurrency: usize) -> FetchConfig {
        FetchConfig {
            max_concurrency,
            delay: DelayRange::none(),
            show_progress: false,
        }
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_cap() {
        let source = CountingSource {
            latency: Duration::from_millis(20),
            ..Default::default()
        };
        let fetcher = Fetcher::new(source, quiet(3));
        let outcomes = fetcher.fetch_all(urls(12)).await;

        assert_eq!(outcomes.len(), 12);
        let peak = fetcher.source.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight was {}", peak);
        assert!(peak >= 1);
        assert_eq!(fetcher.source.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_is_isolated() {
        let all = urls(6);
        let bad = all[2].clone();
        let source = CountingSource {
            fail: HashSet::from([bad.clone()]),
            latency: Duration::from_millis(5),
            ..Default::default()
        };
        let fetcher = Fetcher::new(source, quiet(2));
        let outcomes = fetcher.fetch_all(all.clone()).await;

        assert_eq!(outcomes.len(), all.len());
        for o in &outcomes {
            if o.url == bad {
                assert!(matches!(o.result, Err(FetchError::Status { status: 503, .. })));
            } else {
                assert_eq!(o.result.as_deref().unwrap(), format!("<h1>{}</h1>", o.url));
            }
        }
        assert_eq!(
            FetchStats::from_outcomes(&outcomes),
            FetchStats { total: 6, ok: 5, errors: 1 }
        );
    }

    #[tokio::test]
    async fn one_outcome_per_identifier() {
        let all = urls(20);
        let fetcher = Fetcher::new(CountingSource::default(), quiet(4));
        let outcomes = fetcher.fetch_all(all.clone()).await;

        let seen: HashSet<_> = outcomes.iter().map(|o| o.url.clone()).collect();
        assert_eq!(seen.len(), outcomes.len());
        assert_eq!(seen, all.into_iter().collect::<HashSet<_>>());
        assert_eq!(fetcher.source.calls.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn all_failing_still_completes() {
        let all = urls(5);
        let source = CountingSource {
            fail: all.iter().cloned().collect(),
            ..Default::default()
        };
        let fetcher = Fetcher::new(source, quiet(1));
        let outcomes = fetcher.fetch_all(all).await;
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| !o.is_ok()));
        // Every permit came back despite the failures.
        assert_eq!(fetcher.source.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let fetcher = Fetcher::new(CountingSource::default(), quiet(5));
        assert!(fetcher.fetch_all(Vec::new()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_happens_inside_the_slot() {
        let source = CountingSource::default();
        let config = FetchConfig {
            max_concurrency: 1,
            delay: DelayRange::from_secs(1.0, 1.0),
            show_progress: false,
        };
        let fetcher = Fetcher::new(source, config);
        let start = tokio::time::Instant::now();
        fetcher.fetch_all(urls(3)).await;
        // One slot: the three pauses cannot overlap.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn delay_sample_stays_in_range() {
        let range = DelayRange::from_secs(0.5, 2.0);
        for _ in 0..200 {
            let d = range.sample();
            assert!(d >= range.min && d <= range.max, "{:?}", d);
        }
        assert_eq!(DelayRange::none().sample(), Duration::ZERO);
    }

    #[test]
    fn http_source_rejects_bad_header() {
        let mut headers = BTreeMap::new();
        headers.insert("Bad Header".to_string(), "x".to_string());
        assert!(HttpSource::new(&headers, Duration::from_secs(5)).is_err());
    }

    /// Panics on one url, serves the rest.
    struct PanickingSource {
        bad: String,
    }

    #[async_trait]
    impl PageSource for PanickingSource {
        async fn get(&self, url: &str) -> Result<String, FetchError> {
            if url == self.bad {
                panic!("parser blew up on {}", url);
            }
            Ok(String::from("<h1>ok</h1>"))
        }
    }

    #[tokio::test]
    async fn panicking_task_still_yields_an_outcome() {
        let all = urls(4);
        let bad = all[2].clone();
        let fetcher = Fetcher::new(PanickingSource { bad: bad.clone() }, quiet(2));
        let outcomes = fetcher.fetch_all(all.clone()).await;

        assert_eq!(outcomes.len(), 4);
        let seen: HashSet<_> = outcomes.iter().map(|o| o.url.clone()).collect();
        assert_eq!(seen, all.into_iter().collect::<HashSet<_>>());
        for o in &outcomes {
            if o.url == bad {
                assert!(matches!(&o.result, Err(FetchError::Aborted { url, .. }) if *url == bad));
            } else {
                assert!(o.is_ok());
            }
        }
    }

    // ── HttpSource against a local socket ──

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, read the request and answer with `response`.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(response.as_bytes()).await;
            let _ = sock.shutdown().await;
        });
        format!("http://{}/film/1/", addr)
    }

    fn http(timeout: Duration) -> HttpSource {
        HttpSource::new(&BTreeMap::new(), timeout).unwrap()
    }

    #[tokio::test]
    async fn http_success_returns_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 17\r\nConnection: close\r\n\r\n<h1>Forrest</h1>\n",
        )
        .await;
        let body = http(Duration::from_secs(5)).get(&url).await.unwrap();
        assert_eq!(body, "<h1>Forrest</h1>\n");
    }

    #[tokio::test]
    async fn http_error_status_is_classified() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let err = http(Duration::from_secs(5)).get(&url).await.unwrap_err();
        assert!(
            matches!(err, FetchError::Status { status: 503, ref url } if url.ends_with("/film/1/")),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn http_stall_is_a_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(sock);
        });

        let url = format!("http://{}/film/1/", addr);
        let err = http(Duration::from_millis(200)).get(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn http_refused_connection_is_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{}/film/1/", addr);
        let err = http(Duration::from_secs(5)).get(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }), "{:?}", err);
    }
}
