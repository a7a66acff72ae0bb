//! qcat-search: the Search Synchroniser and Query Service.
//!
//! The search index is a derived view of the Answer Store holding Public
//! documents only. Each configuration code gets an alias
//! `<prefix><code>` backed by numbered indices `<alias>_<n>`.

pub mod backend;
pub mod elasticsearch;
pub mod error;
pub mod indexer;
pub mod mapping;
pub mod memory;
pub mod projection;
pub mod query;
pub mod retry;
pub mod service;

pub use backend::SearchBackend;
pub use elasticsearch::ElasticsearchBackend;
pub use error::SearchError;
pub use indexer::{CancellationFlag, IndexSettings, RebuildReport, RetryReport, SearchIndexer};
pub use mapping::{build_mapping, Analyzers};
pub use memory::MemorySearchBackend;
pub use projection::{project, Author, LinkedSummary};
pub use query::{Filter, Hit, SearchHits, SearchQuery, Sort, TextField};
pub use retry::{IndexRetryQueue, RetryItem, RetryOp};
pub use service::{
    resolve_configurations, Facet, ListItem, ListPage, ListQuery, QueryService,
    DEFAULT_CONFIGURATIONS,
};
