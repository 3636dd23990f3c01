use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::StudyError;
use crate::fs_util;

/// Local directory that downloaded artifacts are saved into, laid out as
/// `{owner}/{project}/{study}/{file}` with a JSON sidecar per file under
/// `metadata/`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub source: String,
    pub owner: String,
    pub project: String,
    pub study: String,
    pub key: String,
    pub file_name: String,
    pub bytes: u64,
    pub downloaded_at: String,
    pub resolved_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedDownload {
    pub path: String,
    pub bytes: u64,
    pub extracted_to: Option<String>,
}

/// Where a download came from; used to lay out the target path.
#[derive(Debug, Clone, Copy)]
pub struct DownloadOrigin<'a> {
    pub owner: &'a str,
    pub project: &'a str,
    pub study: &'a str,
    pub key: &'a str,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), StudyError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| StudyError::Filesystem(err.to_string()))
    }

    pub fn study_dir(&self, owner: &str, project: &str, study: &str) -> Utf8PathBuf {
        self.root
            .join(sanitize(owner))
            .join(sanitize(project))
            .join(sanitize(study))
    }

    pub fn download_path(&self, origin: &DownloadOrigin<'_>, file_name: &str) -> Utf8PathBuf {
        self.study_dir(origin.owner, origin.project, origin.study)
            .join(sanitize(file_name))
    }

    pub fn metadata_path(&self, origin: &DownloadOrigin<'_>, file_name: &str) -> Utf8PathBuf {
        self.root
            .join("metadata")
            .join(sanitize(origin.study))
            .join(format!("{}.json", sanitize(file_name)))
    }

    pub fn save_download(
        &self,
        origin: &DownloadOrigin<'_>,
        file_name: &str,
        data: &[u8],
        extract: bool,
    ) -> Result<SavedDownload, StudyError> {
        if data.is_empty() {
            return Err(StudyError::NothingToDownload);
        }
        self.ensure_root()?;
        let path = self.download_path(origin, file_name);
        Self::write_bytes_atomic(&path, data)?;
        tracing::info!(path = %path, bytes = data.len(), "artifact saved");

        let extracted_to = if extract && is_zip_name(file_name) {
            let target = path.with_extension("");
            fs_util::extract_zip(path.as_std_path(), target.as_std_path())?;
            Some(target.to_string())
        } else {
            None
        };

        let metadata = Metadata {
            source: "pollination".to_string(),
            owner: origin.owner.to_string(),
            project: origin.project.to_string(),
            study: origin.study.to_string(),
            key: origin.key.to_string(),
            file_name: file_name.to_string(),
            bytes: data.len() as u64,
            downloaded_at: chrono::Utc::now().to_rfc3339(),
            resolved_path: path.to_string(),
        };
        Self::write_metadata(&self.metadata_path(origin, file_name), &metadata)?;

        Ok(SavedDownload {
            path: path.to_string(),
            bytes: data.len() as u64,
            extracted_to,
        })
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &Metadata) -> Result<(), StudyError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| StudyError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), StudyError> {
        let parent = path
            .parent()
            .ok_or_else(|| StudyError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| StudyError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("pstudy-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| StudyError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| StudyError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| StudyError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn list_metadata(&self) -> Result<Vec<Metadata>, StudyError> {
        let metadata_root = self.root.join("metadata");
        if !metadata_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for path in walk_dir(metadata_root.as_std_path())? {
            if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
                let content = fs::read_to_string(&path)
                    .map_err(|err| StudyError::Filesystem(err.to_string()))?;
                let metadata: Metadata = serde_json::from_str(&content)
                    .map_err(|err| StudyError::Filesystem(err.to_string()))?;
                entries.push(metadata);
            }
        }
        entries.sort_by(|a, b| a.resolved_path.cmp(&b.resolved_path));
        Ok(entries)
    }
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, StudyError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| StudyError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| StudyError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

/// Keeps a single path component; separators and parent references from
/// remote names never reach the filesystem.
fn sanitize(component: &str) -> String {
    let cleaned = component
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect::<String>();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        other => other.to_string(),
    }
}

fn is_zip_name(file_name: &str) -> bool {
    crate::domain::file_extension(file_name)
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}
