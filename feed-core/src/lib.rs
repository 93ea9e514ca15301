pub mod config;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod ipc;
pub mod parse;
pub mod pipeline;
pub mod recovery;
pub mod schedule;
pub mod sqlite;
pub mod storage;
pub mod sync;

pub use config::{AppConfig, CycleConfig};
pub use dedup::{ComparisonFilter, NewArticleFilter};
pub use error::{BatchError, ErrorKind, PipelineError, StoreError};
pub use feed::{Article, CachedValidators, FeedSubscription, NewArticle, PendingArticle};
pub use feed::{StoredDocument, Webhook};
pub use fetch::{FetchOutcome, Fetcher, HttpFetcher};
pub use ipc::{BatchJob, MessageSink, WorkerMessage, WorkerRequest};
pub use parse::{FeedParser, SyndicationParser};
pub use pipeline::{open_store, BatchSummary, LinkOutcome, LinkStatus, Pipeline};
pub use recovery::{confirm_delivery, replay_pending_articles};
pub use schedule::{AssignedSchedule, AssignedScheduleStore, Schedule, ScheduleAssigner};
pub use sqlite::SqliteStore;
pub use storage::{ArticleStore, MemoryStore};
