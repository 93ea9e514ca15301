//! Schedule assignment.
//!
//! Every feed subscription is bound to exactly one polling schedule per shard.
//! Bindings are decided once and persisted as [`AssignedSchedule`] records;
//! an existing record is never re-decided implicitly. Rules, strongest first:
//!
//! 1. a schedule that lists the feed id, or one of whose keywords occurs in the
//!    feed url (schedules are scanned in their configured order);
//! 2. the supporter schedule, for feeds owned by a supporter guild, unless the
//!    feed lives on the excluded domain;
//! 3. [`DEFAULT_SCHEDULE`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::feed::FeedSubscription;

pub const DEFAULT_SCHEDULE: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Schedule {
    pub name: String,
    /// Feed ids this schedule always owns.
    pub feeds: Vec<String>,
    /// Substrings matched against feed urls.
    pub keywords: Vec<String>,
}

impl Schedule {
    pub fn owns(&self, feed: &FeedSubscription) -> bool {
        self.feeds.iter().any(|id| *id == feed.id)
            || self
                .keywords
                .iter()
                .any(|keyword| !keyword.is_empty() && feed.url.contains(keyword.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupporterConfig {
    pub enabled: bool,
    pub schedule_name: Option<String>,
    /// Feeds on this domain stay on the default schedule even for supporters.
    pub excluded_domain: String,
    pub guilds: Vec<String>,
}

impl Default for SupporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule_name: None,
            excluded_domain: "feed43.com".to_string(),
            guilds: Vec::new(),
        }
    }
}

impl SupporterConfig {
    fn is_excluded(&self, feed_url: &str) -> bool {
        let domain = self.excluded_domain.as_str();
        if domain.is_empty() {
            return false;
        }
        match url::Url::parse(feed_url) {
            Ok(parsed) => parsed
                .host_str()
                .map(|host| host == domain || host.ends_with(&format!(".{domain}")))
                .unwrap_or(false),
            Err(_) => feed_url.contains(domain),
        }
    }
}

/// Durable binding of a feed to a schedule on one shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignedSchedule {
    pub feed: String,
    pub schedule: String,
    pub url: String,
    pub guild: String,
    pub shard: i32,
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn schedules(&self) -> Result<Vec<Schedule>, StoreError>;
}

#[async_trait]
pub trait SupporterSource: Send + Sync {
    async fn valid_guilds(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait AssignedScheduleStore: Send + Sync {
    async fn find_assigned(
        &self,
        feed_id: &str,
        shard: i32,
    ) -> Result<Option<AssignedSchedule>, StoreError>;

    async fn save_assigned(&self, record: &AssignedSchedule) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    async fn delete_assigned(&self, feed_id: &str, shard: i32) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct ConfiguredSchedules(pub Vec<Schedule>);

#[async_trait]
impl ScheduleSource for ConfiguredSchedules {
    async fn schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfiguredSupporters(pub Vec<String>);

#[async_trait]
impl SupporterSource for ConfiguredSupporters {
    async fn valid_guilds(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAssignments {
    records: RwLock<HashMap<(String, i32), AssignedSchedule>>,
}

impl MemoryAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AssignedScheduleStore for MemoryAssignments {
    async fn find_assigned(
        &self,
        feed_id: &str,
        shard: i32,
    ) -> Result<Option<AssignedSchedule>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&(feed_id.to_owned(), shard)).cloned())
    }

    async fn save_assigned(&self, record: &AssignedSchedule) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert((record.feed.clone(), record.shard), record.clone());
        Ok(())
    }

    async fn delete_assigned(&self, feed_id: &str, shard: i32) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        Ok(records.remove(&(feed_id.to_owned(), shard)).is_some())
    }
}

/// Evaluates the schedule rules for a feed that has no binding yet.
pub fn resolve_schedule(
    feed: &FeedSubscription,
    supporter_guilds: &[String],
    schedules: &[Schedule],
    supporters: &SupporterConfig,
) -> String {
    if let Some(schedule) = schedules.iter().find(|schedule| schedule.owns(feed)) {
        return schedule.name.clone();
    }
    if supporters.enabled && supporter_guilds.iter().any(|guild| *guild == feed.guild) {
        if let Some(name) = supporters.schedule_name.as_ref() {
            if !supporters.is_excluded(&feed.url) {
                return name.clone();
            }
        }
    }
    DEFAULT_SCHEDULE.to_string()
}

pub struct ScheduleAssigner {
    assignments: Arc<dyn AssignedScheduleStore>,
    schedules: Arc<dyn ScheduleSource>,
    supporter_guilds: Arc<dyn SupporterSource>,
    supporters: SupporterConfig,
}

impl ScheduleAssigner {
    pub fn new(
        assignments: Arc<dyn AssignedScheduleStore>,
        schedules: Arc<dyn ScheduleSource>,
        supporter_guilds: Arc<dyn SupporterSource>,
        supporters: SupporterConfig,
    ) -> Self {
        Self {
            assignments,
            schedules,
            supporter_guilds,
            supporters,
        }
    }

    /// Serves both registries from the loaded configuration.
    pub fn from_config(assignments: Arc<dyn AssignedScheduleStore>, config: &AppConfig) -> Self {
        Self::new(
            assignments,
            Arc::new(ConfiguredSchedules(config.schedules.clone())),
            Arc::new(ConfiguredSupporters(config.supporters.guilds.clone())),
            config.supporters.clone(),
        )
    }

    /// Decides the schedule for `feed` on `shard`, or `None` when a binding
    /// already exists. Registries are only queried for inputs not supplied;
    /// the supporter registry is skipped entirely while supporters are disabled,
    /// since its guilds could not change the outcome.
    pub async fn determine_schedule(
        &self,
        feed: &FeedSubscription,
        shard: i32,
        supporter_guilds: Option<&[String]>,
        schedules: Option<&[Schedule]>,
    ) -> Result<Option<String>, StoreError> {
        if self.assignments.find_assigned(&feed.id, shard).await?.is_some() {
            debug!(feed = %feed.id, shard, "schedule already assigned");
            return Ok(None);
        }

        let fetched_guilds;
        let supporter_guilds: &[String] = match supporter_guilds {
            Some(guilds) => guilds,
            None if self.supporters.enabled => {
                fetched_guilds = self.supporter_guilds.valid_guilds().await?;
                fetched_guilds.as_slice()
            }
            None => &[],
        };

        let fetched_schedules;
        let schedules: &[Schedule] = match schedules {
            Some(schedules) => schedules,
            None => {
                fetched_schedules = self.schedules.schedules().await?;
                fetched_schedules.as_slice()
            }
        };

        Ok(Some(resolve_schedule(
            feed,
            supporter_guilds,
            schedules,
            &self.supporters,
        )))
    }

    /// Decides and persists a binding. Creates nothing when one already exists.
    pub async fn assign_schedule(
        &self,
        feed: &FeedSubscription,
        shard: i32,
        supporter_guilds: Option<&[String]>,
        schedules: Option<&[Schedule]>,
    ) -> Result<Option<String>, StoreError> {
        let Some(schedule) = self
            .determine_schedule(feed, shard, supporter_guilds, schedules)
            .await?
        else {
            return Ok(None);
        };
        let record = AssignedSchedule {
            feed: feed.id.clone(),
            schedule: schedule.clone(),
            url: feed.url.clone(),
            guild: feed.guild.clone(),
            shard,
        };
        self.assignments.save_assigned(&record).await?;
        debug!(feed = %feed.id, shard, schedule = %schedule, "assigned schedule");
        Ok(Some(schedule))
    }

    /// Drops the binding for `feed` on `shard`; succeeds when there is none.
    pub async fn remove_schedule(
        &self,
        feed: &FeedSubscription,
        shard: i32,
    ) -> Result<(), StoreError> {
        if self.assignments.delete_assigned(&feed.id, shard).await? {
            debug!(feed = %feed.id, shard, "removed assigned schedule");
        }
        Ok(())
    }

    pub async fn reassign_schedule(
        &self,
        feed: &FeedSubscription,
        shard: i32,
        supporter_guilds: Option<&[String]>,
        schedules: Option<&[Schedule]>,
    ) -> Result<Option<String>, StoreError> {
        self.remove_schedule(feed, shard).await?;
        self.assign_schedule(feed, shard, supporter_guilds, schedules)
            .await
    }
}
