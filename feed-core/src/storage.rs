use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::feed::{NewArticle, PendingArticle, StoredDocument};

/// Per-link document storage plus the pending-article staging area.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Stored documents for every given link; links without any are absent.
    async fn load_documents(
        &self,
        links: &[String],
    ) -> Result<HashMap<String, Vec<StoredDocument>>, StoreError>;

    async fn insert_documents(&self, documents: &[StoredDocument]) -> Result<(), StoreError>;

    async fn update_documents(&self, documents: &[StoredDocument]) -> Result<(), StoreError>;

    async fn stage_pending_article(
        &self,
        article: &NewArticle,
    ) -> Result<PendingArticle, StoreError>;

    async fn list_pending_articles(&self) -> Result<Vec<PendingArticle>, StoreError>;

    /// Returns whether a staged article was removed.
    async fn remove_pending_article(&self, id: &str) -> Result<bool, StoreError>;
}

/// Process-local store used when no database is configured.
///
/// Documents are normally carried in the batch's memory collections instead;
/// this store mainly holds staged pending articles for the worker's lifetime.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Vec<StoredDocument>>>,
    pending: RwLock<Vec<PendingArticle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn load_documents(
        &self,
        links: &[String],
    ) -> Result<HashMap<String, Vec<StoredDocument>>, StoreError> {
        let documents = self.documents.read().await;
        Ok(links
            .iter()
            .filter_map(|link| documents.get(link).map(|docs| (link.clone(), docs.clone())))
            .collect())
    }

    async fn insert_documents(&self, documents: &[StoredDocument]) -> Result<(), StoreError> {
        let mut inner = self.documents.write().await;
        for doc in documents {
            let slot = inner.entry(doc.feed_url.clone()).or_default();
            match slot.iter_mut().find(|existing| existing.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => slot.push(doc.clone()),
            }
        }
        Ok(())
    }

    async fn update_documents(&self, documents: &[StoredDocument]) -> Result<(), StoreError> {
        let mut inner = self.documents.write().await;
        for doc in documents {
            let existing = inner
                .get_mut(&doc.feed_url)
                .and_then(|slot| slot.iter_mut().find(|existing| existing.id == doc.id));
            match existing {
                Some(existing) => existing.properties = doc.properties.clone(),
                None => debug!(id = %doc.id, link = %doc.feed_url, "update for unknown document"),
            }
        }
        Ok(())
    }

    async fn stage_pending_article(
        &self,
        article: &NewArticle,
    ) -> Result<PendingArticle, StoreError> {
        let pending = PendingArticle::stage(article.clone());
        self.pending.write().await.push(pending.clone());
        Ok(pending)
    }

    async fn list_pending_articles(&self) -> Result<Vec<PendingArticle>, StoreError> {
        Ok(self.pending.read().await.clone())
    }

    async fn remove_pending_article(&self, id: &str) -> Result<bool, StoreError> {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|staged| staged.id != id);
        Ok(pending.len() != before)
    }
}
