pub mod crawl;
pub mod data;
pub mod report;

pub use salecrawl_scanner as scanner;
