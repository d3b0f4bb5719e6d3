use crate::bloom::{FilterConfig, FilterMode, MembershipFilter};
use crate::error::{Result, ScanError};
use crate::result::{CrawlEvent, CrawlSummary, FailureReason, FetchOutcome, RoundSummary};
use crate::scope::DomainScope;
use crate::store::PageStore;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

pub type EventCallback = Arc<dyn Fn(CrawlEvent) + Send + Sync>;

pub const DEFAULT_MARKER: &str = "on-sale";
pub const DEFAULT_CAPACITY: usize = 100_000;
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.001;

/// Only links starting with this prefix are scheduled; `https://` links are
/// never followed.
pub const ACCEPTED_SCHEME_PREFIX: &str = "http://";

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Case-sensitive substring that flags a page as matched.
    pub marker: String,
    pub capacity: usize,
    pub false_positive_rate: f64,
    /// Directory holding one filter file per domain scope.
    pub filter_dir: PathBuf,
    pub filter_mode: FilterMode,
    /// Cap on in-flight fetches within a round. `None` fetches the whole
    /// frontier at once.
    pub max_concurrency: Option<usize>,
    /// Per-request timeout. `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
            capacity: DEFAULT_CAPACITY,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            filter_dir: std::env::temp_dir(),
            filter_mode: FilterMode::Fresh,
            max_concurrency: None,
            timeout: None,
        }
    }
}

impl CrawlerConfig {
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_false_positive_rate(mut self, rate: f64) -> Self {
        self.false_positive_rate = rate;
        self
    }

    pub fn with_filter_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.filter_dir = dir.into();
        self
    }

    pub fn with_filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }

    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Filter file for a scope: `<filter_dir>/<domain><tld>.bloom`.
    pub fn filter_path(&self, scope: &DomainScope) -> PathBuf {
        self.filter_dir.join(format!("{}.bloom", scope.handle()))
    }
}

/// Everything a fetch worker needs, cheap to clone into spawned tasks.
#[derive(Clone)]
struct FetchContext {
    client: Client,
    store: Arc<dyn PageStore>,
    marker: Arc<str>,
    event_callback: Option<EventCallback>,
}

impl FetchContext {
    fn emit(&self, event: CrawlEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    fn fail(&self, url: &str, reason: FailureReason) -> FetchOutcome {
        warn!("url {}: {}", url, reason);
        self.emit(CrawlEvent::FetchFailed {
            url: url.to_string(),
            reason: reason.clone(),
        });
        FetchOutcome::Failed {
            url: url.to_string(),
            reason,
        }
    }

    async fn fetch(&self, url: &str, scope: &DomainScope) -> FetchOutcome {
        debug!("Fetching {}", url);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return self.fail(url, FailureReason::Transport(e.to_string())),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return self.fail(url, FailureReason::Status(status.as_u16()));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return self.fail(url, FailureReason::Body(e.to_string())),
        };

        let matched = body.contains(self.marker.as_ref());

        // Stores may block (SQLite); keep them off the async workers.
        let store = self.store.clone();
        let record_url = url.to_string();
        match tokio::task::spawn_blocking(move || store.save(&record_url, matched)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.fail(url, FailureReason::Store(e.to_string())),
            Err(e) => {
                let reason = FailureReason::Join(ScanError::from(e).to_string());
                return self.fail(url, reason);
            }
        }

        let links = extract_links(&body, scope);
        debug!("{} matched={} links={}", url, matched, links.len());
        self.emit(CrawlEvent::PageFetched {
            url: url.to_string(),
            matched,
            links: links.len(),
        });

        FetchOutcome::Fetched {
            url: url.to_string(),
            matched,
            links,
        }
    }
}

pub struct Crawler {
    client: Client,
    store: Arc<dyn PageStore>,
    config: CrawlerConfig,
    event_callback: Option<EventCallback>,
}

impl Crawler {
    pub fn new(store: Arc<dyn PageStore>) -> Result<Self> {
        Self::with_config(store, CrawlerConfig::default())
    }

    pub fn with_config(store: Arc<dyn PageStore>, config: CrawlerConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("salecrawl/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(50);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            store,
            config,
            event_callback: None,
        })
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    fn context(&self) -> FetchContext {
        FetchContext {
            client: self.client.clone(),
            store: self.store.clone(),
            marker: Arc::from(self.config.marker.as_str()),
            event_callback: self.event_callback.clone(),
        }
    }

    fn emit(&self, event: CrawlEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Crawl every `http://` page reachable from `start_url` inside its
    /// registered domain, one breadth-first round at a time.
    ///
    /// Previous page records are cleared first. Individual fetch failures do
    /// not fail the crawl; they are counted in the returned summary.
    pub async fn crawl(&self, start_url: &str) -> Result<CrawlSummary> {
        Url::parse(start_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", start_url, e)))?;

        let started = Instant::now();
        self.store.clear_all()?;

        let scope = DomainScope::resolve(start_url);
        info!("Starting crawl of {} (scope {})", start_url, scope);
        self.emit(CrawlEvent::CrawlStarted {
            start_url: start_url.to_string(),
            scope: scope.clone(),
        });

        let mut filter = MembershipFilter::open(&FilterConfig {
            capacity: self.config.capacity,
            false_positive_rate: self.config.false_positive_rate,
            path: self.config.filter_path(&scope),
            mode: self.config.filter_mode,
        })?;

        let mut summary = CrawlSummary::new(start_url, scope.clone());
        let mut frontier = BTreeSet::from([start_url.to_string()]);
        let mut round = 0;

        while !frontier.is_empty() {
            round += 1;
            let snapshot: Vec<String> = std::mem::take(&mut frontier).into_iter().collect();
            debug!("Round {} frontier {:?}", round, snapshot);
            self.emit(CrawlEvent::RoundStarted {
                round,
                frontier: snapshot.len(),
            });

            // Mark before dispatch so nothing in this round can be re-queued,
            // including URLs whose fetch is about to fail.
            filter.add_all(&snapshot);

            let outcomes = self.run_round(&snapshot, &scope).await;
            let discovered = union_links(&outcomes);
            frontier = next_frontier(&discovered, &filter);

            let round_summary = RoundSummary {
                round,
                fetched: outcomes.iter().filter(|o| o.is_fetched()).count(),
                matched: outcomes.iter().filter(|o| o.matched() == Some(true)).count(),
                failed: outcomes.iter().filter(|o| !o.is_fetched()).count(),
                discovered: discovered.len(),
                next_frontier: frontier.len(),
            };
            debug!("Round {} results {:?}", round, round_summary);
            self.emit(CrawlEvent::RoundFinished(round_summary.clone()));
            summary.record_round(round_summary);
        }

        filter.close()?;
        summary.elapsed = started.elapsed();

        info!(
            "Crawl complete. {} rounds, {} pages fetched, {} matched, {} failed",
            summary.rounds.len(),
            summary.pages_fetched,
            summary.pages_matched,
            summary.pages_failed
        );
        self.emit(CrawlEvent::CrawlFinished {
            rounds: summary.rounds.len(),
            pages_fetched: summary.pages_fetched,
            pages_matched: summary.pages_matched,
        });

        Ok(summary)
    }

    /// Fetch every URL concurrently and wait for all of them. One outcome per
    /// input URL; order is not significant.
    pub async fn run_round(&self, urls: &[String], scope: &DomainScope) -> Vec<FetchOutcome> {
        let semaphore = self
            .config
            .max_concurrency
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        let mut handles = Vec::with_capacity(urls.len());
        for url in urls {
            let context = self.context();
            let scope = scope.clone();
            let semaphore = semaphore.clone();
            let task_url = url.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                context.fetch(&task_url, &scope).await
            });
            handles.push((url.clone(), handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(url, handle)| async move { (url, handle.await) }),
        )
        .await;

        joined
            .into_iter()
            .map(|(url, result)| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = FailureReason::Join(ScanError::from(e).to_string());
                    self.context().fail(&url, reason)
                }
            })
            .collect()
    }

    /// Fetch a single page, record it and return its in-scope links.
    pub async fn fetch(&self, url: &str, scope: &DomainScope) -> FetchOutcome {
        self.context().fetch(url, scope).await
    }
}

/// Literal `href` values of every anchor whose target resolves to `scope`,
/// in document order with duplicates kept.
pub fn extract_links(html: &str, scope: &DomainScope) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter(|href| scope.contains_url(href))
        .map(str::to_string)
        .collect()
}

/// Union of all links returned by a round, exact duplicates removed.
pub fn union_links(outcomes: &[FetchOutcome]) -> HashSet<String> {
    outcomes
        .iter()
        .flat_map(|outcome| outcome.links().iter().cloned())
        .collect()
}

/// Links not yet seen by `filter` that carry the accepted scheme prefix.
pub fn next_frontier(links: &HashSet<String>, filter: &MembershipFilter) -> BTreeSet<String> {
    links
        .iter()
        .filter(|link| link.starts_with(ACCEPTED_SCHEME_PREFIX) && !filter.contains(link))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn html_with_links(links: &[String]) -> String {
        let mut html = String::from("<html><body>");
        for link in links {
            html.push_str(&format!(r#"<a href="{}">link</a>"#, link));
        }
        html.push_str("</body></html>");
        html
    }

    async fn mount_page(server: &MockServer, page: &str, body: String, times: u64) {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(body),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    fn crawler(store: Arc<MemoryStore>, dir: &TempDir) -> Crawler {
        let config = CrawlerConfig::default().with_filter_dir(dir.path());
        Crawler::with_config(store, config).unwrap()
    }

    /// Test basic link discovery
    #[tokio::test]
    async fn test_link_discovery() {
        let server = MockServer::start().await;
        let uri = server.uri();

        mount_page(
            &server,
            "/",
            html_with_links(&[format!("{}/page1", uri), format!("{}/page2", uri)]),
            1,
        )
        .await;
        mount_page(&server, "/page1", "<html><body>P1</body></html>".into(), 1).await;
        mount_page(&server, "/page2", "<html><body>P2</body></html>".into(), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(store.clone(), &dir).crawl(&uri).await.unwrap();

        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.rounds.len(), 2);
        assert_eq!(store.records().len(), 3);
    }

    #[tokio::test]
    async fn test_each_url_fetched_at_most_once() {
        let server = MockServer::start().await;
        let uri = server.uri();
        let root = format!("{}/", uri);
        let a = format!("{}/a", uri);
        let b = format!("{}/b", uri);

        // Every page links to every other page, twice.
        let all = vec![root.clone(), a.clone(), b.clone(), a.clone(), b.clone()];
        mount_page(&server, "/", html_with_links(&all), 1).await;
        mount_page(&server, "/a", html_with_links(&all), 1).await;
        mount_page(&server, "/b", html_with_links(&all), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(store.clone(), &dir).crawl(&root).await.unwrap();

        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(store.records().len(), 3);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_terminates_after_diameter_rounds() {
        let server = MockServer::start().await;
        let uri = server.uri();

        mount_page(&server, "/", html_with_links(&[format!("{}/p1", uri)]), 1).await;
        mount_page(&server, "/p1", html_with_links(&[format!("{}/p2", uri)]), 1).await;
        mount_page(&server, "/p2", html_with_links(&[format!("{}/p3", uri)]), 1).await;
        mount_page(&server, "/p3", html_with_links(&[format!("{}/", uri)]), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(store, &dir)
            .crawl(&format!("{}/", uri))
            .await
            .unwrap();

        assert_eq!(summary.rounds.len(), 4);
        assert_eq!(summary.rounds.last().unwrap().next_frontier, 0);
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let server = MockServer::start().await;
        let uri = server.uri();
        let missing = format!("{}/missing", uri);
        let ok = format!("{}/ok", uri);
        let deep = format!("{}/deep", uri);

        mount_page(&server, "/", html_with_links(&[missing.clone(), ok.clone()]), 1).await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        mount_page(&server, "/ok", html_with_links(&[deep.clone()]), 1).await;
        mount_page(&server, "/deep", "<p>on-sale</p>".into(), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(store.clone(), &dir).crawl(&uri).await.unwrap();

        assert_eq!(summary.pages_failed, 1);
        assert_eq!(store.matched(&missing), None);
        assert_eq!(store.matched(&ok), Some(false));
        assert_eq!(store.matched(&deep), Some(true));
    }

    /// Store that refuses to save URLs ending in a given path.
    struct RejectingStore {
        inner: MemoryStore,
        rejected_suffix: &'static str,
    }

    impl PageStore for RejectingStore {
        fn clear_all(&self) -> Result<()> {
            self.inner.clear_all()
        }

        fn save(&self, url: &str, matched: bool) -> Result<()> {
            if url.ends_with(self.rejected_suffix) {
                return Err(ScanError::Store("disk full".to_string()));
            }
            self.inner.save(url, matched)
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_a_failed_fetch() {
        let server = MockServer::start().await;
        let uri = server.uri();
        let locked = format!("{}/locked", uri);
        let open = format!("{}/open", uri);
        let hidden = format!("{}/hidden", uri);

        mount_page(&server, "/", html_with_links(&[locked.clone(), open.clone()]), 1).await;
        mount_page(&server, "/locked", html_with_links(&[hidden.clone()]), 2).await;
        mount_page(&server, "/open", "<p>on-sale</p>".into(), 1).await;
        mount_page(&server, "/hidden", "<p>on-sale</p>".into(), 0).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            rejected_suffix: "/locked",
        });
        let config = CrawlerConfig::default().with_filter_dir(dir.path());
        let crawler = Crawler::with_config(store.clone(), config).unwrap();

        let outcome = crawler
            .fetch(&locked, &DomainScope::resolve(&locked))
            .await;
        match &outcome {
            FetchOutcome::Failed {
                reason: FailureReason::Store(message),
                ..
            } => assert!(message.contains("disk full")),
            other => panic!("expected store failure, got {:?}", other),
        }
        assert!(outcome.links().is_empty());

        let summary = crawler.crawl(&uri).await.unwrap();
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(store.inner.matched(&locked), None);
        assert_eq!(store.inner.matched(&open), Some(true));
        assert_eq!(store.inner.matched(&hidden), None);
    }

    /// Store that records which thread each save ran on.
    #[derive(Default)]
    struct ThreadRecordingStore {
        threads: StdMutex<Vec<std::thread::ThreadId>>,
    }

    impl PageStore for ThreadRecordingStore {
        fn clear_all(&self) -> Result<()> {
            Ok(())
        }

        fn save(&self, _url: &str, _matched: bool) -> Result<()> {
            self.threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
            Ok(())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_store_writes_run_off_the_runtime_thread() {
        let server = MockServer::start().await;
        mount_page(&server, "/", "<p>on-sale</p>".into(), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(ThreadRecordingStore::default());
        let config = CrawlerConfig::default().with_filter_dir(dir.path());
        let crawler = Crawler::with_config(store.clone(), config).unwrap();

        let url = format!("{}/", server.uri());
        let outcome = crawler.fetch(&url, &DomainScope::resolve(&url)).await;
        assert!(outcome.is_fetched());

        let threads = store.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_fetch_reports_status_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let url = format!("{}/gone", server.uri());
        let outcome = crawler(store.clone(), &dir)
            .fetch(&url, &DomainScope::resolve(&url))
            .await;

        assert_eq!(
            outcome,
            FetchOutcome::Failed {
                url,
                reason: FailureReason::Status(500)
            }
        );
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_is_absorbed() {
        // Bind then drop a listener so the port is very likely closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}/", port);

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(store.clone(), &dir).crawl(&url).await.unwrap();

        assert_eq!(summary.pages_fetched, 0);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.rounds.len(), 1);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_marker_detection_is_case_sensitive() {
        let server = MockServer::start().await;
        let uri = server.uri();

        mount_page(
            &server,
            "/",
            html_with_links(&[format!("{}/upper", uri), format!("{}/lower", uri)]),
            1,
        )
        .await;
        mount_page(&server, "/upper", "<p>ON-SALE today</p>".into(), 1).await;
        mount_page(&server, "/lower", "<p>now on-sale!</p>".into(), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(store.clone(), &dir).crawl(&uri).await.unwrap();

        assert_eq!(store.matched(&format!("{}/upper", uri)), Some(false));
        assert_eq!(store.matched(&format!("{}/lower", uri)), Some(true));
        assert_eq!(summary.pages_matched, 1);
    }

    #[tokio::test]
    async fn test_custom_marker() {
        let server = MockServer::start().await;
        mount_page(&server, "/", "<p>clearance</p>".into(), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = CrawlerConfig::default()
            .with_filter_dir(dir.path())
            .with_marker("clearance");
        let crawler = Crawler::with_config(store.clone(), config).unwrap();
        let summary = crawler.crawl(&server.uri()).await.unwrap();

        assert_eq!(summary.pages_matched, 1);
    }

    #[tokio::test]
    async fn test_relative_and_https_links_not_followed() {
        let server = MockServer::start().await;
        let uri = server.uri();
        let https = uri.replacen("http://", "https://", 1);

        mount_page(
            &server,
            "/",
            html_with_links(&["/relative".to_string(), format!("{}/secure", https)]),
            1,
        )
        .await;
        mount_page(&server, "/relative", String::new(), 0).await;
        mount_page(&server, "/secure", String::new(), 0).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(store, &dir).crawl(&uri).await.unwrap();

        assert_eq!(summary.rounds.len(), 1);
        assert_eq!(summary.rounds[0].discovered, 1);
        assert_eq!(summary.rounds[0].next_frontier, 0);
    }

    #[tokio::test]
    async fn test_clears_previous_records() {
        let server = MockServer::start().await;
        mount_page(&server, "/", "<p>hi</p>".into(), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.save("http://stale.example.com/", true).unwrap();

        crawler(store.clone(), &dir).crawl(&server.uri()).await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(store.matched("http://stale.example.com/"), None);
    }

    #[tokio::test]
    async fn test_reuse_mode_skips_urls_from_previous_run() {
        let server = MockServer::start().await;
        let uri = server.uri();
        mount_page(&server, "/", html_with_links(&[format!("{}/a", uri)]), 2).await;
        mount_page(&server, "/a", "<p>a</p>".into(), 1).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = CrawlerConfig::default()
            .with_filter_dir(dir.path())
            .with_filter_mode(FilterMode::Reuse);
        let crawler = Crawler::with_config(store.clone(), config).unwrap();

        let first = crawler.crawl(&uri).await.unwrap();
        let second = crawler.crawl(&uri).await.unwrap();

        assert_eq!(first.pages_fetched, 2);
        assert_eq!(second.pages_fetched, 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_fresh_mode_recrawls_everything() {
        let server = MockServer::start().await;
        let uri = server.uri();
        mount_page(&server, "/", html_with_links(&[format!("{}/a", uri)]), 2).await;
        mount_page(&server, "/a", "<p>a</p>".into(), 2).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let crawler = crawler(store, &dir);

        assert_eq!(crawler.crawl(&uri).await.unwrap().pages_fetched, 2);
        assert_eq!(crawler.crawl(&uri).await.unwrap().pages_fetched, 2);
        assert!(dir.path().join("127.0.0.1.bloom").exists());
    }

    #[tokio::test]
    async fn test_bounded_concurrency_still_visits_everything() {
        let server = MockServer::start().await;
        let uri = server.uri();
        let links: Vec<String> = (1..=8).map(|i| format!("{}/page{}", uri, i)).collect();
        mount_page(&server, "/", html_with_links(&links), 1).await;
        for i in 1..=8 {
            mount_page(&server, &format!("/page{}", i), "<p>x</p>".into(), 1).await;
        }

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = CrawlerConfig::default()
            .with_filter_dir(dir.path())
            .with_max_concurrency(Some(2));
        let crawler = Crawler::with_config(store.clone(), config).unwrap();
        let summary = crawler.crawl(&uri).await.unwrap();

        assert_eq!(summary.pages_fetched, 9);
        assert_eq!(summary.rounds[1].fetched, 8);
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let server = MockServer::start().await;
        let uri = server.uri();
        mount_page(&server, "/", html_with_links(&[format!("{}/x", uri)]), 1).await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let events: Arc<StdMutex<Vec<CrawlEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();

        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let crawler = crawler(store, &dir).with_event_callback(Arc::new(move |event: CrawlEvent| {
            sink.lock().unwrap().push(event);
        }));
        crawler.crawl(&uri).await.unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(CrawlEvent::CrawlStarted { .. })));
        assert!(matches!(events.last(), Some(CrawlEvent::CrawlFinished { rounds: 2, .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            CrawlEvent::FetchFailed {
                reason: FailureReason::Status(404),
                ..
            }
        )));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, CrawlEvent::RoundStarted { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_invalid_start_url() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let result = crawler(store, &dir).crawl("not a url").await;
        assert!(matches!(result, Err(ScanError::InvalidUrl(_))));
    }

    #[test]
    fn test_extract_links_keeps_order_and_duplicates() {
        let scope = DomainScope::resolve("http://a.com/");
        let html = r#"<html><body>
            <a href="http://a.com/2">two</a>
            <a href="http://www.a.com/1">one</a>
            <a href="http://a.com/2">two again</a>
            <a href="http://b.com/">elsewhere</a>
            <a href="/relative">relative</a>
            <a>no href</a>
        </body></html>"#;

        assert_eq!(
            extract_links(html, &scope),
            vec!["http://a.com/2", "http://www.a.com/1", "http://a.com/2"]
        );
    }

    #[test]
    fn test_extract_links_from_broken_html() {
        let scope = DomainScope::resolve("http://a.com/");
        let html = r#"<div><a href="http://a.com/x">unclosed <p><a href='http://a.com/y'"#;
        let links = extract_links(html, &scope);
        assert_eq!(links[0], "http://a.com/x");
    }

    #[test]
    fn test_scope_and_scheme_filtering() {
        let scope = DomainScope::resolve("http://a.com/");
        let html = html_with_links(&[
            "http://a.com/x".to_string(),
            "http://b.com/y".to_string(),
            "https://a.com/z".to_string(),
            "ftp://a.com/w".to_string(),
        ]);

        let outcome = FetchOutcome::Fetched {
            url: "http://a.com/".to_string(),
            matched: false,
            links: extract_links(&html, &scope),
        };
        assert_eq!(
            outcome.links(),
            ["http://a.com/x", "https://a.com/z", "ftp://a.com/w"]
        );

        let mut filter = MembershipFilter::with_capacity(100, 0.001).unwrap();
        filter.insert("http://a.com/");
        let next = next_frontier(&union_links(&[outcome]), &filter);

        assert_eq!(next, BTreeSet::from(["http://a.com/x".to_string()]));
    }

    #[test]
    fn test_seen_links_never_reenter_frontier() {
        let mut filter = MembershipFilter::with_capacity(100, 0.001).unwrap();
        filter.add_all(["http://a.com/", "http://a.com/x"]);

        let outcomes = vec![
            FetchOutcome::Fetched {
                url: "http://a.com/x".to_string(),
                matched: false,
                links: vec!["http://a.com/".to_string(), "http://a.com/y".to_string()],
            },
            FetchOutcome::Fetched {
                url: "http://a.com/z".to_string(),
                matched: true,
                links: vec!["http://a.com/x".to_string(), "http://a.com/y".to_string()],
            },
            FetchOutcome::Failed {
                url: "http://a.com/w".to_string(),
                reason: FailureReason::Status(503),
            },
        ];

        let union = union_links(&outcomes);
        assert_eq!(union.len(), 3);
        assert_eq!(
            next_frontier(&union, &filter),
            BTreeSet::from(["http://a.com/y".to_string()])
        );
    }
}
