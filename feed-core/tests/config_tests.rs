use std::path::PathBuf;

use feed_core::schedule::Schedule;
use feed_core::AppConfig;

fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "{prefix}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn save_and_reload_round_trips() {
    let dir = temp_dir("feedrelay_config");
    let path = dir.join("config.json");

    let mut config = AppConfig::default();
    config.database.uri = Some("sqlite://feeds.db".into());
    config.supporters.enabled = true;
    config.supporters.schedule_name = Some("supporter".into());
    config.schedules.push(Schedule {
        name: "slow".into(),
        feeds: vec!["aa".into()],
        keywords: vec!["reddit".into()],
    });
    config.save_to(&path).unwrap();
    assert!(!path.with_extension("json.tmp").exists());

    let loaded = AppConfig::load_from(&path).unwrap();
    assert_eq!(loaded.schedules, config.schedules);
    assert_eq!(loaded.supporters, config.supporters);

    let cycle = loaded.cycle_config();
    assert_eq!(cycle.database_uri.as_deref(), Some("sqlite://feeds.db"));
    assert!(cycle.log_link_errors);
    assert!(!cycle.send_first_cycle);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corrupted_config_falls_back_to_tmp_file() {
    let dir = temp_dir("feedrelay_corrupt");
    let path = dir.join("config.json");
    std::fs::write(&path, b"{ this is not json ").unwrap();

    let mut fallback = AppConfig::default();
    fallback.feeds.send_first_cycle = true;
    std::fs::write(
        path.with_extension("json.tmp"),
        serde_json::to_vec(&fallback).unwrap(),
    )
    .unwrap();

    let loaded = AppConfig::load_from(&path).unwrap();
    assert!(loaded.feeds.send_first_cycle);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_sections_use_defaults() {
    let dir = temp_dir("feedrelay_partial");
    let path = dir.join("config.json");
    std::fs::write(&path, br#"{"log": {"level": "debug"}}"#).unwrap();

    let loaded = AppConfig::load_from(&path).unwrap();
    assert_eq!(loaded.log.level, "debug");
    assert!(loaded.log.link_errors);
    assert_eq!(loaded.feeds.request_timeout_seconds, 15);
    assert_eq!(loaded.supporters.excluded_domain, "feed43.com");
    assert!(loaded.database.uri.is_none());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_config_yields_defaults_without_writing() {
    let dir = temp_dir("feedrelay_missing");
    let path = dir.join("config.json");

    let loaded = AppConfig::load_from_or_default(&path);
    assert_eq!(loaded.log.level, "info");
    assert!(loaded.database.uri.is_none());
    assert!(!path.exists());
    assert!(!path.with_extension("json.tmp").exists());

    std::fs::write(&path, b"not json at all").unwrap();
    let fallback = AppConfig::load_from_or_default(&path);
    assert_eq!(fallback.feeds.request_timeout_seconds, 15);
    assert_eq!(std::fs::read(&path).unwrap(), b"not json at all");

    let _ = std::fs::remove_dir_all(&dir);
}
