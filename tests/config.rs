use std::time::Duration;

use assert_matches::assert_matches;

use pollination_study_browser::config::{Config, ConfigLoader, DEFAULT_PROJECT_ID};
use pollination_study_browser::error::StudyError;

#[test]
fn resolve_config_fills_defaults() {
    let config = Config {
        download_dir: Some("/tmp/pstudy".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, None).unwrap();

    assert_eq!(resolved.host, "https://api.pollination.cloud");
    assert_eq!(resolved.default_project_id.as_deref(), Some(DEFAULT_PROJECT_ID));
    assert_eq!(resolved.timeout, Duration::from_secs(60));
    assert_eq!(resolved.download_dir.as_str(), "/tmp/pstudy");
    assert_matches!(resolved.require_api_key(), Err(StudyError::MissingApiKey));
}

#[test]
fn env_key_is_used_when_file_has_none() {
    let config = Config {
        download_dir: Some("/tmp/pstudy".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, Some(" secret \n".to_string())).unwrap();
    assert_eq!(resolved.require_api_key().unwrap(), "secret");
}

#[test]
fn blank_key_counts_as_missing() {
    let config = Config {
        api_key: Some("   ".to_string()),
        download_dir: Some("/tmp/pstudy".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, None).unwrap();
    assert_eq!(resolved.api_key, None);
}

#[test]
fn blank_file_key_falls_back_to_env() {
    let config = Config {
        api_key: Some(" \t".to_string()),
        download_dir: Some("/tmp/pstudy".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, Some("env-key".to_string())).unwrap();
    assert_eq!(resolved.require_api_key().unwrap(), "env-key");
}

#[test]
fn zero_per_page_is_rejected() {
    let config = Config {
        per_page: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config, None),
        Err(StudyError::ConfigParse(_))
    );
}

#[test]
fn resolve_reads_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("pstudy.json");
    std::fs::write(
        &path,
        r#"{
            "host": "https://api.staging.pollination.cloud",
            "api_key": "file-key",
            "default_account": "acme",
            "per_page": 50,
            "timeout_secs": 5,
            "download_dir": "/tmp/pstudy"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.host, "https://api.staging.pollination.cloud");
    assert_eq!(resolved.api_key.as_deref(), Some("file-key"));
    assert_eq!(resolved.default_account, "acme");
    assert_eq!(resolved.per_page, 50);
    assert_eq!(resolved.timeout, Duration::from_secs(5));
}

#[test]
fn missing_explicit_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(StudyError::ConfigRead(_))
    );
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("pstudy.json");
    std::fs::write(&path, "{ per_page: 3 ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(StudyError::ConfigParse(_))
    );
}
