use crate::scope::DomainScope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a fetch produced no page record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Connection, DNS or TLS failure reported by the HTTP client.
    Transport(String),
    /// The server answered with something other than 200.
    Status(u16),
    /// The response body could not be read.
    Body(String),
    /// The page was fetched but the record could not be persisted.
    Store(String),
    /// The worker task panicked or was aborted.
    Join(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(e) => write!(f, "transport error: {}", e),
            FailureReason::Status(code) => write!(f, "status code {}", code),
            FailureReason::Body(e) => write!(f, "body read error: {}", e),
            FailureReason::Store(e) => write!(f, "store error: {}", e),
            FailureReason::Join(e) => write!(f, "worker failed: {}", e),
        }
    }
}

/// Result of one fetch worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchOutcome {
    /// 200 response. `links` are the in-scope anchor targets in document
    /// order, duplicates included.
    Fetched {
        url: String,
        matched: bool,
        links: Vec<String>,
    },
    Failed {
        url: String,
        reason: FailureReason,
    },
}

impl FetchOutcome {
    pub fn url(&self) -> &str {
        match self {
            FetchOutcome::Fetched { url, .. } | FetchOutcome::Failed { url, .. } => url,
        }
    }

    pub fn links(&self) -> &[String] {
        match self {
            FetchOutcome::Fetched { links, .. } => links,
            FetchOutcome::Failed { .. } => &[],
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }

    pub fn matched(&self) -> Option<bool> {
        match self {
            FetchOutcome::Fetched { matched, .. } => Some(*matched),
            FetchOutcome::Failed { .. } => None,
        }
    }
}

/// Per-round counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: usize,
    pub fetched: usize,
    pub matched: usize,
    pub failed: usize,
    /// Distinct in-scope links returned by the round's workers.
    pub discovered: usize,
    pub next_frontier: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub start_url: String,
    pub scope: DomainScope,
    pub rounds: Vec<RoundSummary>,
    pub pages_fetched: usize,
    pub pages_matched: usize,
    pub pages_failed: usize,
    pub elapsed: Duration,
}

impl CrawlSummary {
    pub fn new(start_url: &str, scope: DomainScope) -> Self {
        Self {
            start_url: start_url.to_string(),
            scope,
            ..Self::default()
        }
    }

    pub(crate) fn record_round(&mut self, round: RoundSummary) {
        self.pages_fetched += round.fetched;
        self.pages_matched += round.matched;
        self.pages_failed += round.failed;
        self.rounds.push(round);
    }
}

/// Structured progress events emitted while a crawl runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CrawlEvent {
    CrawlStarted {
        start_url: String,
        scope: DomainScope,
    },
    RoundStarted {
        round: usize,
        frontier: usize,
    },
    PageFetched {
        url: String,
        matched: bool,
        links: usize,
    },
    FetchFailed {
        url: String,
        reason: FailureReason,
    },
    RoundFinished(RoundSummary),
    CrawlFinished {
        rounds: usize,
        pages_fetched: usize,
        pages_matched: usize,
    },
}
