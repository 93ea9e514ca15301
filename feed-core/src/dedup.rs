use std::collections::{HashMap, HashSet};

use crate::error::DedupError;
use crate::feed::{Article, FeedSubscription, NewArticle, StoredDocument};

/// Decides which parsed articles are new for which subscriptions of a link.
///
/// Always called with the stored documents as they were *before* this
/// cycle's sync step.
pub trait NewArticleFilter: Send + Sync {
    fn compute_new(
        &self,
        articles: &[Article],
        stored: &[StoredDocument],
        subscriptions: &[FeedSubscription],
    ) -> Result<Vec<NewArticle>, DedupError>;
}

/// Id based filter with per-subscription comparison overrides.
///
/// An unseen article is new unless one of the subscription's negative keys
/// carries a value that is already stored. A seen article is new again when
/// one of the positive keys carries a value never stored before, provided
/// that key is already being tracked for the link.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComparisonFilter;

impl NewArticleFilter for ComparisonFilter {
    fn compute_new(
        &self,
        articles: &[Article],
        stored: &[StoredDocument],
        subscriptions: &[FeedSubscription],
    ) -> Result<Vec<NewArticle>, DedupError> {
        let seen_ids: HashSet<&str> = stored.iter().map(|doc| doc.id.as_str()).collect();
        let mut seen_values: HashMap<&str, HashSet<&str>> = HashMap::new();
        for doc in stored {
            for (key, value) in &doc.properties {
                seen_values
                    .entry(key.as_str())
                    .or_default()
                    .insert(value.as_str());
            }
        }
        let is_stored = |key: &str, value: &str| {
            seen_values
                .get(key)
                .map(|values| values.contains(value))
                .unwrap_or(false)
        };

        let mut new_articles = Vec::new();
        let mut emitted = HashSet::new();
        for article in articles {
            if !emitted.insert(article.id.as_str()) {
                continue;
            }
            for feed in subscriptions.iter().filter(|feed| feed.is_enabled()) {
                let is_new = if seen_ids.contains(article.id.as_str()) {
                    feed.pcomparisons.iter().any(|key| {
                        seen_values.contains_key(key.as_str())
                            && article
                                .value(key)
                                .map(|value| !is_stored(key, value))
                                .unwrap_or(false)
                    })
                } else {
                    !feed.ncomparisons.iter().any(|key| {
                        article
                            .value(key)
                            .map(|value| is_stored(key, value))
                            .unwrap_or(false)
                    })
                };
                if is_new {
                    new_articles.push(NewArticle {
                        article: article.clone(),
                        feed: feed.clone(),
                    });
                }
            }
        }
        Ok(new_articles)
    }
}
