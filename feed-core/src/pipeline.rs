//! Per-cycle batch processing.
//!
//! A batch maps links to the subscriptions sharing them. Every link runs
//! fetch → parse → dedup → sync → stage → report on its own, concurrently
//! with its siblings. A link's failure is reported as a `failed` message and
//! never affects another link; only setup errors abort the batch.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::config::{AppConfig, CycleConfig};
use crate::dedup::{ComparisonFilter, NewArticleFilter};
use crate::error::{BatchError, ErrorKind, FetchError, PipelineError};
use crate::feed::{CachedValidators, FeedSubscription, NewArticle, StoredDocument};
use crate::fetch::{FetchOutcome, Fetcher, HttpFetcher};
use crate::ipc::{BatchJob, MessageSink, WorkerMessage};
use crate::parse::{FeedParser, SyndicationParser};
use crate::sqlite::SqliteStore;
use crate::storage::{ArticleStore, MemoryStore};
use crate::sync::{
    apply_inserts, apply_updates, compute_inserts_and_updates, union_comparison_keys, SyncMeta,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Success,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    pub link: String,
    pub status: LinkStatus,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<LinkOutcome>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == LinkStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn status_of(&self, link: &str) -> Option<LinkStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.link == link)
            .map(|outcome| outcome.status)
    }
}

struct LinkContext<'a> {
    link: &'a str,
    subscriptions: &'a [FeedSubscription],
    validators: Option<&'a CachedValidators>,
    docs: Vec<StoredDocument>,
    schedule_name: &'a str,
    run_num: u64,
    config: &'a CycleConfig,
    databaseless: bool,
    debug: bool,
}

/// Picks the store a batch runs against.
///
/// The job's own database uri wins over `fallback_uri`. Without any uri the
/// job is switched to databaseless mode, so the post-sync snapshot travels
/// back in the `success` messages instead of vanishing with the process.
pub async fn open_store(
    job: &mut BatchJob,
    fallback_uri: Option<&str>,
    max_connections: u32,
) -> Result<Arc<dyn ArticleStore>, BatchError> {
    if job.is_databaseless() {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let uri = job.config.database_uri.as_deref().or(fallback_uri);
    match uri {
        Some(uri) => {
            let store = SqliteStore::connect(uri, max_connections)
                .await
                .map_err(BatchError::Connect)?;
            Ok(Arc::new(store))
        }
        None => {
            info!(schedule = %job.schedule_name, "no store configured, running databaseless");
            job.memory_collections.get_or_insert_with(HashMap::new);
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn FeedParser>,
    filter: Arc<dyn NewArticleFilter>,
    store: Arc<dyn ArticleStore>,
    sink: Arc<dyn MessageSink>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn FeedParser>,
        filter: Arc<dyn NewArticleFilter>,
        store: Arc<dyn ArticleStore>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            filter,
            store,
            sink,
        }
    }

    /// HTTP fetching, RSS/Atom parsing and the comparison filter.
    pub fn with_defaults(
        config: &AppConfig,
        store: Arc<dyn ArticleStore>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, FetchError> {
        Ok(Self::new(
            Arc::new(HttpFetcher::from_config(&config.feeds)?),
            Arc::new(SyndicationParser),
            Arc::new(ComparisonFilter),
            store,
            sink,
        ))
    }

    /// Processes every link of `job` and returns once all of them settled.
    pub async fn run_batch(&self, job: BatchJob) -> Result<BatchSummary, BatchError> {
        let databaseless = job.is_databaseless();
        let links: Vec<String> = job.current_batch.keys().cloned().collect();
        let mut documents = match job.memory_collections {
            Some(collections) => collections,
            None => self
                .store
                .load_documents(&links)
                .await
                .map_err(BatchError::LoadDocuments)?,
        };
        info!(
            schedule = %job.schedule_name,
            links = links.len(),
            run = job.run_num,
            databaseless,
            "processing batch"
        );

        let pipelines = job.current_batch.iter().map(|(link, subscriptions)| {
            let ctx = LinkContext {
                link,
                subscriptions,
                validators: job.headers.get(link),
                docs: documents.remove(link).unwrap_or_default(),
                schedule_name: &job.schedule_name,
                run_num: job.run_num,
                config: &job.config,
                databaseless,
                debug: job.debug_urls.iter().any(|url| url == link),
            };
            self.process_link(ctx)
        });
        let outcomes = join_all(pipelines).await;

        let summary = BatchSummary { outcomes };
        info!(
            schedule = %job.schedule_name,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "batch complete"
        );
        Ok(summary)
    }

    async fn process_link(&self, mut ctx: LinkContext<'_>) -> LinkOutcome {
        if ctx.debug {
            info!(link = %ctx.link, "Isolated processor received in batch");
        }
        let link = ctx.link.to_owned();
        match self.try_process_link(&mut ctx).await {
            Ok(()) => LinkOutcome {
                link,
                status: LinkStatus::Success,
            },
            Err(err) => {
                if ctx.debug {
                    info!(link = %link, "Sending failed status");
                }
                let failed = WorkerMessage::Failed {
                    link: link.clone(),
                    rss_list: ctx.subscriptions.to_vec(),
                };
                if let Err(send_err) = self.sink.send(failed).await {
                    error!(link = %link, error = %send_err, "failed to report link failure");
                }

                let kind = err.kind();
                if kind.is_expected() {
                    if ctx.config.log_link_errors {
                        warn!(link = %link, error = %err, "Skipping link");
                    }
                } else {
                    error!(link = %link, error = %err, "Cycle logic");
                }
                LinkOutcome {
                    link,
                    status: LinkStatus::Failed(kind),
                }
            }
        }
    }

    async fn try_process_link(&self, ctx: &mut LinkContext<'_>) -> Result<(), PipelineError> {
        let validators = match ctx.validators {
            Some(cached) => cached.pair(ctx.link)?,
            None => None,
        };

        if ctx.debug {
            info!(link = %ctx.link, "Fetching URL");
        }
        let fetched = match self.fetcher.fetch(ctx.link, validators).await? {
            FetchOutcome::NotModified => {
                if ctx.debug {
                    info!(link = %ctx.link, "304 response, sending success status");
                }
                return self.report_success(ctx, false).await;
            }
            FetchOutcome::Fetched(fetched) => fetched,
        };

        // sent right away so the next cycle can revalidate even if this one fails below
        if let Some(CachedValidators {
            last_modified: Some(last_modified),
            etag: Some(etag),
        }) = fetched.validators
        {
            if ctx.debug {
                info!(link = %ctx.link, "Sending back headers");
            }
            self.sink
                .send(WorkerMessage::Headers {
                    link: ctx.link.to_owned(),
                    last_modified,
                    etag,
                })
                .await?;
        }

        if ctx.debug {
            info!(link = %ctx.link, "Parsing stream");
        }
        let articles = self
            .parser
            .parse(&fetched.body, ctx.link, fetched.charset.as_deref())
            .await?;
        if articles.is_empty() {
            if ctx.debug {
                info!(link = %ctx.link, "No articles found, sending success status");
            }
            return self.report_success(ctx, false).await;
        }

        // must see the documents before sync rewrites them
        let new_articles = self
            .filter
            .compute_new(&articles, &ctx.docs, ctx.subscriptions)?;

        let keys = union_comparison_keys(ctx.subscriptions);
        let plan = compute_inserts_and_updates(
            &articles,
            &ctx.docs,
            &keys,
            SyncMeta {
                feed_url: ctx.link,
                schedule_name: ctx.schedule_name,
            },
        );
        let databaseless = ctx.databaseless;
        apply_inserts(
            self.store.as_ref(),
            &plan.to_insert,
            databaseless.then_some(&mut ctx.docs),
        )
        .await?;
        apply_updates(
            self.store.as_ref(),
            &plan.to_update,
            databaseless.then_some(&mut ctx.docs),
        )
        .await?;

        if ctx.run_num != 0 || ctx.config.send_first_cycle {
            if ctx.debug {
                info!(
                    link = %ctx.link,
                    "Sending article status for {} articles",
                    new_articles.len()
                );
            }
            self.send_articles(new_articles).await?;
        }

        self.report_success(ctx, databaseless).await
    }

    /// Stages every article, then reports each one whether or not its staging worked.
    async fn send_articles(&self, articles: Vec<NewArticle>) -> Result<(), PipelineError> {
        let staged = join_all(
            articles
                .iter()
                .map(|article| self.store.stage_pending_article(article)),
        )
        .await;

        for (article, result) in articles.into_iter().zip(staged) {
            let pending_article = match result {
                Ok(pending) => Some(pending),
                Err(err) => {
                    error!(
                        link = %article.feed.url,
                        article = %article.article.id,
                        error = %err,
                        "Failed to store pending article before sending"
                    );
                    None
                }
            };
            self.sink
                .send(WorkerMessage::PendingArticle {
                    pending_article,
                    article,
                })
                .await?;
        }
        Ok(())
    }

    async fn report_success(
        &self,
        ctx: &mut LinkContext<'_>,
        with_memory_collection: bool,
    ) -> Result<(), PipelineError> {
        let memory_collection = with_memory_collection.then(|| std::mem::take(&mut ctx.docs));
        self.sink
            .send(WorkerMessage::Success {
                link: ctx.link.to_owned(),
                memory_collection,
            })
            .await?;
        Ok(())
    }
}
