use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::{BaseDirs, UserDirs};
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_HOST;
use crate::error::StudyError;
use crate::path::DEFAULT_PER_PAGE;

pub const CONFIG_FILE: &str = "pstudy.json";
pub const API_KEY_ENV: &str = "POLLINATION_API_KEY";
pub const DEFAULT_ACCOUNT: &str = "ladybug-tools";
pub const DEFAULT_PROJECT_ID: &str = "eeaef2bf-6b2b-472e-a608-d2a6af78bd20";
pub const DEFAULT_RECIPE_FILE: &str = "recipes/direct_sun_hours.json";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_account: Option<String>,
    #[serde(default)]
    pub default_project_id: Option<String>,
    #[serde(default)]
    pub recipe_file: Option<String>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub download_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub host: String,
    pub api_key: Option<String>,
    pub default_account: String,
    pub default_project_id: Option<String>,
    pub recipe_file: Utf8PathBuf,
    pub per_page: u32,
    pub timeout: Duration,
    pub download_dir: Utf8PathBuf,
}

impl ResolvedConfig {
    pub fn require_api_key(&self) -> Result<&str, StudyError> {
        self.api_key.as_deref().ok_or(StudyError::MissingApiKey)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `pstudy.json` (or the given file) and applies defaults. A
    /// missing default file is not an error; a missing explicit one is.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, StudyError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            tracing::debug!("no {CONFIG_FILE} found, using defaults");
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| StudyError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| StudyError::ConfigParse(err.to_string()))?
        };

        let env_key = std::env::var(API_KEY_ENV).ok();
        Self::resolve_config(config, env_key)
    }

    pub fn resolve_config(
        config: Config,
        env_api_key: Option<String>,
    ) -> Result<ResolvedConfig, StudyError> {
        let api_key = non_blank(config.api_key).or_else(|| non_blank(env_api_key));

        let per_page = match config.per_page {
            Some(0) => {
                return Err(StudyError::ConfigParse(
                    "per_page must be at least 1".to_string(),
                ));
            }
            Some(value) => value,
            None => DEFAULT_PER_PAGE,
        };

        let download_dir = match config.download_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_download_dir()?,
        };

        Ok(ResolvedConfig {
            host: config.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            api_key,
            default_account: config
                .default_account
                .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
            default_project_id: config
                .default_project_id
                .or_else(|| Some(DEFAULT_PROJECT_ID.to_string())),
            recipe_file: Utf8PathBuf::from(
                config
                    .recipe_file
                    .unwrap_or_else(|| DEFAULT_RECIPE_FILE.to_string()),
            ),
            per_page,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            download_dir,
        })
    }
}

fn non_blank(key: Option<String>) -> Option<String> {
    key.map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

fn default_download_dir() -> Result<Utf8PathBuf, StudyError> {
    let from_user_dirs = UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(|dir| dir.join("pollination")));
    let from_home = || {
        BaseDirs::new().map(|dirs| dirs.home_dir().join("Downloads").join("pollination"))
    };
    from_user_dirs
        .or_else(from_home)
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .ok_or_else(|| StudyError::Filesystem("unable to resolve download directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = Config {
            download_dir: Some("/tmp/pstudy".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config, None).unwrap();
        assert_eq!(resolved.host, DEFAULT_HOST);
        assert_eq!(resolved.per_page, 25);
        assert_eq!(resolved.default_account, "ladybug-tools");
        assert!(resolved.api_key.is_none());
        assert_eq!(resolved.recipe_file.as_str(), DEFAULT_RECIPE_FILE);
    }

    #[test]
    fn file_key_wins_over_env() {
        let config = Config {
            api_key: Some("from-file".to_string()),
            download_dir: Some("/tmp/pstudy".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config, Some("from-env".to_string())).unwrap();
        assert_eq!(resolved.api_key.as_deref(), Some("from-file"));
    }
}
