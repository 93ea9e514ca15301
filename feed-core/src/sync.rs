use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::StoreError;
use crate::feed::{Article, FeedSubscription, StoredDocument};
use crate::storage::ArticleStore;

#[derive(Debug, Clone, Copy)]
pub struct SyncMeta<'a> {
    pub feed_url: &'a str,
    pub schedule_name: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_insert: Vec<StoredDocument>,
    pub to_update: Vec<StoredDocument>,
}

/// Every negative and positive comparison key declared by any subscription of a link.
pub fn union_comparison_keys(subscriptions: &[FeedSubscription]) -> BTreeSet<String> {
    subscriptions
        .iter()
        .flat_map(|feed| feed.ncomparisons.iter().chain(feed.pcomparisons.iter()))
        .filter(|key| key.as_str() != "id")
        .cloned()
        .collect()
}

/// Diffs freshly parsed articles against the stored documents of one link.
///
/// An article matches the document with its id, otherwise the first document
/// sharing its value under any of `keys`. Unmatched articles become inserts
/// carrying their values for `keys`; matched documents whose tracked values
/// differ or are missing become updates.
pub fn compute_inserts_and_updates(
    articles: &[Article],
    stored: &[StoredDocument],
    keys: &BTreeSet<String>,
    meta: SyncMeta<'_>,
) -> SyncPlan {
    let by_id: HashMap<&str, &StoredDocument> =
        stored.iter().map(|doc| (doc.id.as_str(), doc)).collect();
    let mut handled = HashSet::new();
    let mut plan = SyncPlan::default();

    for article in articles {
        if !handled.insert(article.id.as_str()) {
            continue;
        }
        let matched = by_id
            .get(article.id.as_str())
            .copied()
            .or_else(|| match_by_key(article, stored, keys));
        match matched {
            None => plan.to_insert.push(StoredDocument {
                id: article.id.clone(),
                feed_url: meta.feed_url.to_owned(),
                schedule_name: meta.schedule_name.to_owned(),
                properties: tracked_values(article, keys),
            }),
            Some(doc) => {
                let mut updated = doc.clone();
                let mut changed = false;
                for (key, value) in tracked_values(article, keys) {
                    if updated.properties.get(&key) != Some(&value) {
                        updated.properties.insert(key, value);
                        changed = true;
                    }
                }
                if changed {
                    plan.to_update.push(updated);
                }
            }
        }
    }
    plan
}

fn match_by_key<'a>(
    article: &Article,
    stored: &'a [StoredDocument],
    keys: &BTreeSet<String>,
) -> Option<&'a StoredDocument> {
    stored.iter().find(|doc| {
        keys.iter().any(|key| match (article.value(key), doc.properties.get(key)) {
            (Some(value), Some(stored_value)) => value == stored_value.as_str(),
            _ => false,
        })
    })
}

fn tracked_values(article: &Article, keys: &BTreeSet<String>) -> BTreeMap<String, String> {
    keys.iter()
        .filter_map(|key| article.value(key).map(|value| (key.clone(), value.to_owned())))
        .collect()
}

/// Applies inserts to `memory` in place when given, otherwise to `store`.
pub async fn apply_inserts(
    store: &dyn ArticleStore,
    to_insert: &[StoredDocument],
    memory: Option<&mut Vec<StoredDocument>>,
) -> Result<(), StoreError> {
    match memory {
        Some(collection) => {
            collection.extend_from_slice(to_insert);
            Ok(())
        }
        None => store.insert_documents(to_insert).await,
    }
}

/// Applies updates to `memory` in place when given, otherwise to `store`.
pub async fn apply_updates(
    store: &dyn ArticleStore,
    to_update: &[StoredDocument],
    memory: Option<&mut Vec<StoredDocument>>,
) -> Result<(), StoreError> {
    match memory {
        Some(collection) => {
            for doc in to_update {
                if let Some(existing) = collection.iter_mut().find(|existing| existing.id == doc.id) {
                    existing.properties = doc.properties.clone();
                }
            }
            Ok(())
        }
        None => store.update_documents(to_update).await,
    }
}
