use std::process::ExitCode;
use std::sync::Arc;

use feed_core::error::{BatchError, FetchError, PipelineError};
use feed_core::ipc::JsonLinesSink;
use feed_core::{
    open_store, replay_pending_articles, AppConfig, BatchJob, MessageSink, Pipeline, SqliteStore,
    WorkerRequest,
};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Error)]
enum WorkerError {
    #[error("failed to read request: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("malformed request: {0}")]
    Request(#[from] serde_json::Error),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] FetchError),
    #[error("replay failed: {0}")]
    Replay(#[from] PipelineError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = init_tracing();
    let config = AppConfig::load_or_default();
    apply_log_level(&filter, &config.log.level);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "worker aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> FilterHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    // stdout carries the message stream
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
    handle
}

/// `RUST_LOG` keeps precedence over the configured level.
fn apply_log_level(handle: &FilterHandle, level: &str) {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return;
    }
    if let Err(err) = handle.reload(EnvFilter::new(level)) {
        warn!(error = %err, level, "failed to apply configured log level");
    }
}

async fn run(config: AppConfig) -> Result<(), WorkerError> {
    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let request: WorkerRequest = serde_json::from_str(&raw)?;

    let sink: Arc<dyn MessageSink> = Arc::new(JsonLinesSink::new(tokio::io::stdout()));
    match request {
        WorkerRequest::Batch(job) => run_batch(&config, job, sink).await,
        WorkerRequest::ReplayPending { database_uri } => {
            let store = SqliteStore::connect(&database_uri, config.database.max_connections)
                .await
                .map_err(BatchError::Connect)?;
            let count = replay_pending_articles(&store, sink.as_ref()).await?;
            info!(count, "replay finished");
            Ok(())
        }
    }
}

async fn run_batch(
    config: &AppConfig,
    mut job: BatchJob,
    sink: Arc<dyn MessageSink>,
) -> Result<(), WorkerError> {
    let store = open_store(
        &mut job,
        config.database.uri.as_deref(),
        config.database.max_connections,
    )
    .await?;

    let pipeline = Pipeline::with_defaults(config, store, sink)?;
    let summary = pipeline.run_batch(job).await?;
    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "worker finished"
    );
    Ok(())
}
