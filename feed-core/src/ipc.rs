//! Worker ↔ orchestrator messages.
//!
//! Messages are plain serde values tagged by `status`, so the same types serve
//! an in-process channel and a newline-delimited JSON stream between processes.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::config::CycleConfig;
use crate::error::IpcError;
use crate::feed::{CachedValidators, FeedSubscription, NewArticle, PendingArticle, StoredDocument};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Fresh validators to cache for the link's next cycle.
    #[serde(rename_all = "camelCase")]
    Headers {
        link: String,
        last_modified: String,
        etag: String,
    },
    /// One new article, staged or not.
    #[serde(rename_all = "camelCase")]
    PendingArticle {
        /// `None` when staging failed; `article` is still delivered.
        pending_article: Option<PendingArticle>,
        article: NewArticle,
    },
    #[serde(rename_all = "camelCase")]
    Success {
        link: String,
        /// Post-sync documents, only in databaseless mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_collection: Option<Vec<StoredDocument>>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        link: String,
        rss_list: Vec<FeedSubscription>,
    },
}

impl WorkerMessage {
    pub fn link(&self) -> Option<&str> {
        match self {
            WorkerMessage::Headers { link, .. }
            | WorkerMessage::Success { link, .. }
            | WorkerMessage::Failed { link, .. } => Some(link),
            WorkerMessage::PendingArticle { article, .. } => Some(&article.feed.url),
        }
    }
}

/// One cycle's work for one worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    /// link -> subscriptions sharing that link
    pub current_batch: HashMap<String, Vec<FeedSubscription>>,
    #[serde(default)]
    pub headers: HashMap<String, CachedValidators>,
    /// Links that get step-by-step logging.
    #[serde(default, rename = "debugURLs")]
    pub debug_urls: Vec<String>,
    pub schedule_name: String,
    #[serde(default)]
    pub run_num: u64,
    /// Present only in databaseless mode.
    #[serde(default)]
    pub memory_collections: Option<HashMap<String, Vec<StoredDocument>>>,
    #[serde(default)]
    pub config: CycleConfig,
}

impl BatchJob {
    pub fn is_databaseless(&self) -> bool {
        self.memory_collections.is_some()
    }
}

/// Everything a worker process can be asked to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerRequest {
    Batch(BatchJob),
    #[serde(rename_all = "camelCase")]
    ReplayPending { database_uri: String },
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: WorkerMessage) -> Result<(), IpcError>;
}

/// In-process sink backed by a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

/// Creates a connected sink / receiver pair.
pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<WorkerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, message: WorkerMessage) -> Result<(), IpcError> {
        self.tx.send(message).map_err(|_| IpcError::Closed)
    }
}

/// Writes each message as one JSON line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> MessageSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: WorkerMessage) -> Result<(), IpcError> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        // a single locked write keeps lines from concurrent links intact
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Parses one line written by [`JsonLinesSink`].
pub fn decode_message(line: &str) -> Result<WorkerMessage, IpcError> {
    Ok(serde_json::from_str(line.trim_end())?)
}
