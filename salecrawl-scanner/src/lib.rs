pub mod bloom;
pub mod crawler;
pub mod error;
pub mod result;
pub mod scope;
pub mod store;

pub use bloom::{FilterConfig, FilterMode, MembershipFilter};
pub use crawler::{Crawler, CrawlerConfig, EventCallback};
pub use error::ScanError;
pub use result::{CrawlEvent, CrawlSummary, FailureReason, FetchOutcome, RoundSummary};
pub use scope::DomainScope;
pub use store::PageStore;
