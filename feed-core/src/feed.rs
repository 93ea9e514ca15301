use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, PipelineError};

const DEFAULT_DISABLE_REASON: &str = "No reason specified";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// One feed monitored for one guild/channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedSubscription {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub url: String,
    pub guild: String,
    #[serde(default)]
    pub disabled: Option<String>,
    /// Keys whose already-stored values block an otherwise unseen article.
    #[serde(default)]
    pub ncomparisons: Vec<String>,
    /// Keys whose never-stored values let an already seen article through.
    #[serde(default)]
    pub pcomparisons: Vec<String>,
    #[serde(default)]
    pub webhook: Option<Webhook>,
}

impl FeedSubscription {
    pub fn new(
        title: impl Into<String>,
        channel: impl Into<String>,
        url: impl Into<String>,
        guild: impl Into<String>,
    ) -> Result<Self, FeedError> {
        let (title, channel, url, guild) = (title.into(), channel.into(), url.into(), guild.into());
        if title.is_empty() {
            return Err(FeedError::Missing("title"));
        }
        if channel.is_empty() {
            return Err(FeedError::Missing("channel"));
        }
        if url.is_empty() {
            return Err(FeedError::Missing("url"));
        }
        if guild.is_empty() {
            return Err(FeedError::Missing("guild"));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            channel,
            url,
            guild,
            disabled: None,
            ncomparisons: Vec::new(),
            pcomparisons: Vec::new(),
            webhook: None,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.disabled.is_none()
    }

    pub fn enable(&mut self) {
        self.disabled = None;
    }

    pub fn disable(&mut self, reason: Option<&str>) {
        self.disabled = Some(reason.unwrap_or(DEFAULT_DISABLE_REASON).to_owned());
    }
}

/// Conditional-fetch validators cached for a link between cycles.
///
/// Both values travel together. A pair with only one side set is a
/// configuration error for the link.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachedValidators {
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
}

impl CachedValidators {
    pub fn new(last_modified: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            last_modified: Some(last_modified.into()),
            etag: Some(etag.into()),
        }
    }

    /// Returns `(last_modified, etag)` when both are set, `None` when neither is.
    pub fn pair(&self, link: &str) -> Result<Option<(&str, &str)>, PipelineError> {
        match (self.last_modified.as_deref(), self.etag.as_deref()) {
            (Some(last_modified), Some(etag)) => Ok(Some((last_modified, etag))),
            (None, None) => Ok(None),
            _ => Err(PipelineError::Config(format!(
                "Headers exist for a link, but missing lastModified and etag ({link})"
            ))),
        }
    }
}

/// A normalized item parsed out of a feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Article {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Value used when this article is compared under `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        if key == "id" {
            return Some(&self.id);
        }
        self.properties.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn from_rss_item(item: &rss::Item) -> Option<Self> {
        let guid = item.guid().map(|guid| guid.value().to_owned());
        let id = guid
            .clone()
            .or_else(|| item.link().map(ToOwned::to_owned))
            .or_else(|| item.title().map(ToOwned::to_owned))
            .filter(|id| !id.is_empty())?;

        let pubdate = item.pub_date().map(|value| {
            DateTime::parse_from_rfc2822(value)
                .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
                .unwrap_or_else(|_| value.to_owned())
        });

        let author = item
            .dublin_core_ext()
            .and_then(|dc| dc.creators().first().map(|s| s.to_string()))
            .or_else(|| item.author().map(|s| s.to_string()));

        let category = item
            .categories()
            .first()
            .map(|cat| cat.name().to_string())
            .or_else(|| {
                item.dublin_core_ext()
                    .and_then(|dc| dc.subjects().first().map(|s| s.to_string()))
            });

        let mut article = Self::new(id);
        article.insert_opt("guid", guid);
        article.insert_opt("title", item.title().map(ToOwned::to_owned));
        article.insert_opt("link", item.link().map(ToOwned::to_owned));
        article.insert_opt("description", item.description().map(ToOwned::to_owned));
        article.insert_opt("pubdate", pubdate);
        article.insert_opt("author", author);
        article.insert_opt("category", category);
        Some(article)
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Option<Self> {
        let link = entry.links().first().map(|link| link.href().to_owned());
        let title = Some(entry.title().value.clone()).filter(|t| !t.is_empty());
        let id = Some(entry.id().to_owned())
            .filter(|id| !id.is_empty())
            .or_else(|| link.clone())
            .or_else(|| title.clone())?;

        let published = entry
            .published()
            .unwrap_or_else(|| entry.updated())
            .with_timezone(&Utc)
            .to_rfc3339();

        let mut article = Self::new(id.clone());
        article.insert_opt("guid", Some(id));
        article.insert_opt("title", title);
        article.insert_opt("link", link);
        article.insert_opt("description", entry.summary().map(|s| s.value.clone()));
        article.insert_opt("pubdate", Some(published));
        article.insert_opt("author", entry.authors().first().map(|p| p.name().to_owned()));
        article.insert_opt("category", entry.categories().first().map(|c| c.term().to_owned()));
        Some(article)
    }

    fn insert_opt(&mut self, key: &str, value: Option<String>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.properties.insert(key.to_owned(), value);
        }
    }
}

/// A previously seen article for one link, as kept by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub feed_url: String,
    pub schedule_name: String,
    /// Only the comparison keys tracked for this link.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// An article judged new for one particular subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewArticle {
    pub article: Article,
    pub feed: FeedSubscription,
}

/// A new article staged in the store ahead of delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingArticle {
    pub id: String,
    pub article: NewArticle,
    pub staged_at: DateTime<Utc>,
}

impl PendingArticle {
    pub fn stage(article: NewArticle) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            article,
            staged_at: Utc::now(),
        }
    }
}
