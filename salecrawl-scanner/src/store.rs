use crate::error::Result;
use std::sync::Mutex;

/// Sink for page records produced by the crawler.
///
/// Fetch workers call [`PageStore::save`] from concurrent tasks, so
/// implementations must be shareable across threads.
pub trait PageStore: Send + Sync {
    /// Remove every stored record.
    fn clear_all(&self) -> Result<()>;

    /// Record that `url` was fetched and whether its body carried the marker.
    fn save(&self, url: &str, matched: bool) -> Result<()>;
}

/// Store that keeps records in memory. Handy for library users that only
/// want the crawl summary, and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<(String, bool)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, bool)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn matched(&self, url: &str) -> Option<bool> {
        self.records()
            .into_iter()
            .find(|(u, _)| u == url)
            .map(|(_, matched)| matched)
    }
}

impl PageStore for MemoryStore {
    fn clear_all(&self) -> Result<()> {
        self.records
            .lock()
            .map_err(|e| crate::ScanError::Store(e.to_string()))?
            .clear();
        Ok(())
    }

    fn save(&self, url: &str, matched: bool) -> Result<()> {
        self.records
            .lock()
            .map_err(|e| crate::ScanError::Store(e.to_string()))?
            .push((url.to_string(), matched));
        Ok(())
    }
}
