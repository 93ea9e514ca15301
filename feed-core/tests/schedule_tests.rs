use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use feed_core::error::StoreError;
use feed_core::schedule::{
    AssignedSchedule, AssignedScheduleStore, MemoryAssignments, Schedule, ScheduleAssigner,
    ScheduleSource, SupporterConfig, SupporterSource,
};
use feed_core::{AppConfig, FeedSubscription};

#[derive(Default)]
struct CountingSchedules {
    schedules: Vec<Schedule>,
    calls: AtomicUsize,
}

#[async_trait]
impl ScheduleSource for CountingSchedules {
    async fn schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.schedules.clone())
    }
}

#[derive(Default)]
struct CountingSupporters {
    guilds: Vec<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl SupporterSource for CountingSupporters {
    async fn valid_guilds(&self) -> Result<Vec<String>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.guilds.clone())
    }
}

struct Harness {
    assignments: Arc<MemoryAssignments>,
    schedules: Arc<CountingSchedules>,
    supporters: Arc<CountingSupporters>,
    assigner: ScheduleAssigner,
}

fn harness(schedules: Vec<Schedule>, guilds: Vec<String>, supporters: SupporterConfig) -> Harness {
    let assignments = Arc::new(MemoryAssignments::new());
    let schedule_source = Arc::new(CountingSchedules {
        schedules,
        ..Default::default()
    });
    let supporter_source = Arc::new(CountingSupporters {
        guilds,
        ..Default::default()
    });
    let assigner = ScheduleAssigner::new(
        assignments.clone(),
        schedule_source.clone(),
        supporter_source.clone(),
        supporters,
    );
    Harness {
        assignments,
        schedules: schedule_source,
        supporters: supporter_source,
        assigner,
    }
}

fn feed(id: &str, url: &str, guild: &str) -> FeedSubscription {
    FeedSubscription::new("Feed", "channel", url, guild)
        .unwrap()
        .with_id(id)
}

fn supporters_on(schedule: &str) -> SupporterConfig {
    SupporterConfig {
        enabled: true,
        schedule_name: Some(schedule.into()),
        ..Default::default()
    }
}

fn sched1() -> Schedule {
    Schedule {
        name: "sched1".into(),
        feeds: vec!["aa".into()],
        keywords: vec!["key1".into()],
    }
}

#[tokio::test]
async fn feed_id_listed_in_schedule_wins() {
    let h = harness(Vec::new(), Vec::new(), SupporterConfig::default());
    let decided = h
        .assigner
        .determine_schedule(
            &feed("aa", "http://e/feed", "g"),
            0,
            Some(&[]),
            Some(&[sched1()]),
        )
        .await
        .unwrap();
    assert_eq!(decided.as_deref(), Some("sched1"));
    assert_eq!(h.schedules.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.supporters.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn keyword_in_url_selects_schedule_from_registry() {
    let h = harness(vec![sched1()], Vec::new(), SupporterConfig::default());
    let decided = h
        .assigner
        .determine_schedule(&feed("zz", "http://e/key1/rss", "g"), 0, None, None)
        .await
        .unwrap();
    assert_eq!(decided.as_deref(), Some("sched1"));
    assert_eq!(h.schedules.calls.load(Ordering::SeqCst), 1);
    // disabled supporter engine never queries the registry
    assert_eq!(h.supporters.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn excluded_domain_keeps_supporter_on_default() {
    let h = harness(Vec::new(), Vec::new(), supporters_on("foobzz"));
    let decided = h
        .assigner
        .determine_schedule(
            &feed("f1", "https://feed43.com/x", "g"),
            0,
            Some(&["g".to_string()]),
            Some(&[]),
        )
        .await
        .unwrap();
    assert_eq!(decided.as_deref(), Some("default"));
}

#[tokio::test]
async fn supporter_guild_gets_supporter_schedule() {
    let h = harness(Vec::new(), vec!["g".into()], supporters_on("foobzz"));
    let decided = h
        .assigner
        .determine_schedule(&feed("f1", "https://news.example.com/rss", "g"), 0, None, None)
        .await
        .unwrap();
    assert_eq!(decided.as_deref(), Some("foobzz"));
    assert_eq!(h.supporters.calls.load(Ordering::SeqCst), 1);

    let other = h
        .assigner
        .determine_schedule(&feed("f2", "https://news.example.com/rss", "h"), 0, None, None)
        .await
        .unwrap();
    assert_eq!(other.as_deref(), Some("default"));
}

#[tokio::test]
async fn existing_binding_yields_no_decision() {
    let h = harness(vec![sched1()], Vec::new(), SupporterConfig::default());
    let feed_y = feed("yy", "http://e/feed", "g");
    h.assignments
        .save_assigned(&AssignedSchedule {
            feed: "yy".into(),
            schedule: "default".into(),
            url: feed_y.url.clone(),
            guild: feed_y.guild.clone(),
            shard: 2,
        })
        .await
        .unwrap();

    let decided = h
        .assigner
        .determine_schedule(&feed_y, 2, None, None)
        .await
        .unwrap();
    assert_eq!(decided, None);
    assert_eq!(h.assigner.assign_schedule(&feed_y, 2, None, None).await.unwrap(), None);
    assert_eq!(h.assignments.len().await, 1);
    assert_eq!(h.schedules.calls.load(Ordering::SeqCst), 0);

    // another shard is an independent binding
    let decided = h
        .assigner
        .assign_schedule(&feed_y, 3, None, None)
        .await
        .unwrap();
    assert_eq!(decided.as_deref(), Some("default"));
    assert_eq!(h.assignments.len().await, 2);
}

#[tokio::test]
async fn reassign_replaces_binding() {
    let h = harness(Vec::new(), Vec::new(), SupporterConfig::default());
    let feed_a = feed("aa", "http://e/feed", "g");
    h.assigner
        .assign_schedule(&feed_a, 0, None, Some(&[]))
        .await
        .unwrap();
    let stored = h.assignments.find_assigned("aa", 0).await.unwrap().unwrap();
    assert_eq!(stored.schedule, "default");
    assert_eq!(stored.url, "http://e/feed");

    let moved = h
        .assigner
        .reassign_schedule(&feed_a, 0, None, Some(&[sched1()]))
        .await
        .unwrap();
    assert_eq!(moved.as_deref(), Some("sched1"));
    let stored = h.assignments.find_assigned("aa", 0).await.unwrap().unwrap();
    assert_eq!(stored.schedule, "sched1");
    assert_eq!(h.assignments.len().await, 1);
}

#[tokio::test]
async fn removing_missing_binding_is_ok() {
    let h = harness(Vec::new(), Vec::new(), SupporterConfig::default());
    h.assigner
        .remove_schedule(&feed("nope", "http://e/feed", "g"), 0)
        .await
        .unwrap();
    assert!(h.assignments.is_empty().await);
}

#[tokio::test]
async fn configured_registries_drive_assignment() {
    let mut config = AppConfig::default();
    config.schedules = vec![sched1()];
    config.supporters = supporters_on("supporter");
    config.supporters.guilds = vec!["paying".into()];

    let assignments = Arc::new(MemoryAssignments::new());
    let assigner = ScheduleAssigner::from_config(assignments.clone(), &config);

    let keyword = assigner
        .assign_schedule(&feed("f1", "http://e/key1", "other"), 0, None, None)
        .await
        .unwrap();
    assert_eq!(keyword.as_deref(), Some("sched1"));

    let supporter = assigner
        .assign_schedule(&feed("f2", "http://e/rss", "paying"), 0, None, None)
        .await
        .unwrap();
    assert_eq!(supporter.as_deref(), Some("supporter"));
    assert_eq!(assignments.len().await, 2);
}
