use crate::data::Database;
use salecrawl_scanner::crawler::{
    DEFAULT_CAPACITY, DEFAULT_FALSE_POSITIVE_RATE, DEFAULT_MARKER,
};
use salecrawl_scanner::{
    CrawlEvent, CrawlSummary, Crawler, CrawlerConfig, DomainScope, FilterMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

/// Options for configuring a crawl operation
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub url: String,
    pub marker: String,
    pub capacity: usize,
    pub false_positive_rate: f64,
    /// Where filter files live. Defaults to the OS temp directory.
    pub filter_dir: Option<PathBuf>,
    /// Keep URLs seen by earlier runs against the same domain excluded.
    pub reuse_filter: bool,
    pub max_concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl CrawlOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            marker: DEFAULT_MARKER.to_string(),
            capacity: DEFAULT_CAPACITY,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            filter_dir: None,
            reuse_filter: false,
            max_concurrency: None,
            timeout_secs: None,
        }
    }

    pub fn to_config(&self) -> CrawlerConfig {
        let mut config = CrawlerConfig::default()
            .with_marker(self.marker.clone())
            .with_capacity(self.capacity)
            .with_false_positive_rate(self.false_positive_rate)
            .with_filter_mode(if self.reuse_filter {
                FilterMode::Reuse
            } else {
                FilterMode::Fresh
            })
            .with_max_concurrency(self.max_concurrency)
            .with_timeout(self.timeout_secs.map(Duration::from_secs));
        if let Some(ref dir) = self.filter_dir {
            config = config.with_filter_dir(dir.clone());
        }
        config
    }
}

/// Callback for reporting crawl events as they happen
pub type CrawlEventCallback = Arc<dyn Fn(CrawlEvent) + Send + Sync>;

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Execute a crawl with the given options, storing page records in `db`.
/// The run is recorded in the run history whether it completes or fails.
pub async fn execute_crawl(
    options: CrawlOptions,
    db: Arc<Database>,
    event_callback: Option<CrawlEventCallback>,
) -> Result<CrawlSummary, String> {
    let scope = DomainScope::resolve(&options.url);
    let run_id = db
        .create_run(&options.url, &scope.to_string())
        .map_err(|e| format!("Failed to record crawl run: {}", e))?;

    let mut crawler = Crawler::with_config(db.clone(), options.to_config())
        .map_err(|e| format!("Failed to build crawler: {}", e))?;
    if let Some(callback) = event_callback {
        crawler = crawler.with_event_callback(callback);
    }

    match crawler.crawl(&options.url).await {
        Ok(summary) => {
            db.complete_run(run_id, &summary)
                .map_err(|e| format!("Failed to record crawl completion: {}", e))?;
            info!("Run {} completed", run_id);
            Ok(summary)
        }
        Err(e) => {
            error!("Run {} failed: {}", run_id, e);
            if let Err(db_err) = db.fail_run(run_id) {
                error!("Failed to mark run {} as failed: {}", run_id, db_err);
            }
            Err(format!("Failed to crawl {}: {}", options.url, e))
        }
    }
}
