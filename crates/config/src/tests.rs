use crate::*;
use tempfile::TempDir;

#[test]
fn test_default_config_matches_documented_defaults() {
    let config = AppConfig::default();

    assert_eq!(config.queue.max_retries, 3);
    assert_eq!(config.queue.backoff_base, 2);
    assert_eq!(config.worker.check_interval_seconds, 1);
    assert_eq!(config.worker.execution_timeout_seconds, 300);
    assert_eq!(config.worker.lease_timeout_seconds, 300);
    assert_eq!(config.database.path, "queuectl.db");
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_falls_back_to_defaults() {
    let config = AppConfig::from_toml(
        r#"
        [queue]
        max_retries = 5

        [worker]
        check_interval_seconds = 2
        "#,
    )
    .unwrap();

    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.queue.backoff_base, 2);
    assert_eq!(config.worker.check_interval_seconds, 2);
    assert_eq!(config.worker.lease_timeout_seconds, 300);
}

#[test]
fn test_invalid_toml_is_rejected() {
    assert!(AppConfig::from_toml("[queue]\nbackoff_base = 0\n").is_err());
    assert!(AppConfig::from_toml("[queue\n").is_err());
}

#[test]
fn test_load_from_file_and_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("queuectl.toml");

    let missing = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(missing.queue, QueueConfig::default());

    std::fs::write(&path, "[queue]\nbackoff_base = 3\n").unwrap();
    let loaded = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(loaded.queue.backoff_base, 3);
}

#[test]
fn test_save_and_reload_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("queuectl.toml");

    let mut config = AppConfig::default();
    config.set_value("max_retries", "7").unwrap();
    config.save(&path).unwrap();

    let reloaded = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(reloaded.queue.max_retries, 7);
    assert_eq!(reloaded, config);
}

#[test]
fn test_flat_aliases() {
    let mut config = AppConfig::default();

    config.set_value("backoff_base", "4").unwrap();
    config.set_value("worker_check_interval", "5").unwrap();
    config.set_value("db_path", "/tmp/jobs.db").unwrap();

    assert_eq!(config.get_value("queue.backoff_base").unwrap(), "4");
    assert_eq!(config.get_value("worker_check_interval").unwrap(), "5");
    assert_eq!(config.database.path, "/tmp/jobs.db");
}

#[test]
fn test_set_value_rejects_bad_input_without_mutation() {
    let mut config = AppConfig::default();

    assert!(matches!(
        config.set_value("queue.max_retries", "abc"),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
        config.set_value("queue.backoff_base", "0"),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
        config.set_value("no.such.key", "1"),
        Err(ConfigError::UnknownKey(_))
    ));
    assert!(matches!(
        config.set_value("worker.lease_timeout_seconds", "60"),
        Err(ConfigError::InvalidValue { .. })
    ));

    assert_eq!(config, AppConfig::default());

    // 先缩短执行超时，再缩短租约
    config.set_value("worker.execution_timeout_seconds", "60").unwrap();
    config.set_value("worker.lease_timeout_seconds", "60").unwrap();
    assert_eq!(config.worker.lease_timeout_seconds, 60);
}

#[test]
fn test_entries_list_every_known_key() {
    let config = AppConfig::default();
    let entries = config.entries();

    assert_eq!(entries.len(), 12);
    assert!(entries.contains(&("queue.max_retries", "3".to_string())));
    assert!(entries.contains(&("logging.format", "pretty".to_string())));
}
