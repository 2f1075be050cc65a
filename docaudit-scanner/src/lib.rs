pub mod classify;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod job;
pub mod recorder;
pub mod result;
pub mod scope;
pub mod url_norm;

pub use classify::{Classifier, TagRule};
pub use crawler::{Crawler, ProgressCallback};
pub use error::{CrawlError, FetchError, PersistenceError};
pub use fetch::{FetchedPage, Fetcher, HttpFetcher};
pub use job::{CrawlJobDefinition, CrawlScope};
pub use recorder::{CrawlJobRun, CrawlJobRunSummary, RunCounts, RunState, RunStore};
pub use result::{BrokenLink, KeywordCounts, LinkEdge, PageRecord};
