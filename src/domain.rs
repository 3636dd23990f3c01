use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::StudyError;

pub const PREVIEW_EXTENSION: &str = "vtkjs";
pub const RECIPE_REGISTRY: &str = "https://api.pollination.cloud/registries";

/// Owner of projects. Organizations and users come back from the API with
/// different identifier fields; both collapse to a single owner name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAccount", into = "RawAccount")]
pub enum Account {
    User {
        username: String,
        display_name: Option<String>,
    },
    Organization {
        account_name: String,
        display_name: Option<String>,
    },
}

impl Account {
    pub fn user(username: impl Into<String>) -> Self {
        Account::User {
            username: username.into(),
            display_name: None,
        }
    }

    pub fn organization(account_name: impl Into<String>) -> Self {
        Account::Organization {
            account_name: account_name.into(),
            display_name: None,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Account::User { username, .. } => username,
            Account::Organization { account_name, .. } => account_name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Account::User { .. } => "user",
            Account::Organization { .. } => "org",
        }
    }

    pub fn label(&self) -> String {
        let display = match self {
            Account::User { display_name, .. } | Account::Organization { display_name, .. } => {
                display_name.as_deref()
            }
        };
        match display {
            Some(name) if name != self.owner() => format!("{} ({name})", self.owner()),
            _ => self.owner().to_string(),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.owner())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl TryFrom<RawAccount> for Account {
    type Error = StudyError;

    fn try_from(raw: RawAccount) -> Result<Self, Self::Error> {
        match (raw.username, raw.account_name) {
            (Some(username), _) => Ok(Account::User {
                username,
                display_name: raw.name,
            }),
            (None, Some(account_name)) => Ok(Account::Organization {
                account_name,
                display_name: raw.name,
            }),
            (None, None) => Err(StudyError::InvalidAccount),
        }
    }
}

impl From<Account> for RawAccount {
    fn from(account: Account) -> Self {
        match account {
            Account::User {
                username,
                display_name,
            } => RawAccount {
                username: Some(username),
                account_name: None,
                name: display_name,
            },
            Account::Organization {
                account_name,
                display_name,
            } => RawAccount {
                username: None,
                account_name: Some(account_name),
                name: display_name,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
}

impl Project {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            owner: None,
            description: None,
            public: None,
        }
    }
}

/// Reference to a recipe in the Pollination registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRef {
    #[serde(deserialize_with = "owner_name")]
    pub owner: String,
    pub name: String,
    #[serde(default = "latest_tag")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl RecipeRef {
    pub fn source(&self) -> String {
        match &self.source {
            Some(source) => source.clone(),
            None => format!(
                "{RECIPE_REGISTRY}/{}/recipe/{}/{}",
                self.owner, self.name, self.tag
            ),
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{}:{}", self.owner, self.name, self.tag)
    }
}

fn latest_tag() -> String {
    "latest".to_string()
}

fn owner_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OwnerField {
        Name(String),
        Account(OwnerRef),
    }

    Ok(match OwnerField::deserialize(deserializer)? {
        OwnerField::Name(name) => name,
        OwnerField::Account(owner) => owner.name,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<StudyStatus>,
    #[serde(default)]
    pub author: Option<OwnerRef>,
}

impl Study {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            status: None,
            author: None,
        }
    }

    pub fn status_text(&self) -> &str {
        status_text(self.status.as_ref())
    }

    pub fn label(&self) -> String {
        let status = self.status_text();
        match &self.name {
            Some(name) => format!("{name} [{status}] {}", self.id),
            None => format!("{} [{status}]", self.id),
        }
    }
}

/// One execution of a study. A study owns one run per parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub status: Option<StudyStatus>,
}

impl Run {
    pub fn status_text(&self) -> &str {
        status_text(self.status.as_ref())
    }
}

fn status_text(status: Option<&StudyStatus>) -> &str {
    status
        .and_then(|status| status.status.as_deref())
        .unwrap_or("unknown")
}

/// Study returned by the API right after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedStudy {
    #[serde(alias = "id")]
    pub study_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: String,
    pub file_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Artifact {
    pub fn new(key: impl Into<String>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            key: key.into(),
            name: Some(file_name.clone()),
            file_name,
            file_type: None,
            size: None,
        }
    }

    pub fn download_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.file_name)
    }

    pub fn extension(&self) -> Result<&str, StudyError> {
        file_extension(&self.file_name)
    }

    pub fn is_folder(&self) -> bool {
        self.file_type.as_deref() == Some("folder")
    }

    pub fn is_previewable(&self) -> bool {
        self.extension()
            .map(|ext| ext.eq_ignore_ascii_case(PREVIEW_EXTENSION))
            .unwrap_or(false)
    }
}

/// Extension after the last dot. `archive.tar.gz` yields `gz`; a name
/// without a dot, or ending in one, has no extension.
pub fn file_extension(file_name: &str) -> Result<&str, StudyError> {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Ok(ext),
        _ => Err(StudyError::UnknownExtension(file_name.to_string())),
    }
}

/// One `name=value` argument for a recipe run. Values that parse as JSON
/// are sent as JSON, anything else as a string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeInput {
    pub name: String,
    pub value: Value,
}

impl FromStr for RecipeInput {
    type Err = StudyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, raw) = value
            .split_once('=')
            .ok_or_else(|| StudyError::InvalidInput(value.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StudyError::InvalidInput(value.to_string()));
        }
        let raw = raw.trim();
        let parsed = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(Self {
            name: name.to_string(),
            value: parsed,
        })
    }
}
