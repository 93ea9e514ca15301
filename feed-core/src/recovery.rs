//! Redelivery of articles that were staged but never confirmed.
//!
//! Staged articles stay in the store until the consumer confirms them, so a
//! crash between staging and delivery leads to a duplicate at worst, never a
//! lost article.

use tracing::{info, warn};

use crate::error::{PipelineError, StoreError};
use crate::ipc::{MessageSink, WorkerMessage};
use crate::storage::ArticleStore;

/// Re-sends every staged article as a `pendingArticle` message.
///
/// Returns how many were sent. Stops at the first sink failure; the remaining
/// articles stay staged for the next replay.
pub async fn replay_pending_articles(
    store: &dyn ArticleStore,
    sink: &dyn MessageSink,
) -> Result<usize, PipelineError> {
    let pending = store.list_pending_articles().await?;
    if pending.is_empty() {
        info!("no pending articles to replay");
        return Ok(0);
    }

    let total = pending.len();
    for staged in pending {
        let article = staged.article.clone();
        sink.send(WorkerMessage::PendingArticle {
            pending_article: Some(staged),
            article,
        })
        .await?;
    }
    info!(count = total, "replayed pending articles");
    Ok(total)
}

/// Drops a staged article once its delivery has been confirmed.
pub async fn confirm_delivery(store: &dyn ArticleStore, id: &str) -> Result<bool, StoreError> {
    let removed = store.remove_pending_article(id).await?;
    if !removed {
        warn!(id, "confirmed delivery of an unknown pending article");
    }
    Ok(removed)
}
