use serde::Serialize;
use serde_json::Value;

use crate::api::CloudApi;
use crate::domain::{Artifact, PREVIEW_EXTENSION};
use crate::error::StudyError;
use crate::path::PathSegment;
use crate::state::SessionState;

const HTTP_OK: u16 = 200;

/// What happened to the last artifact selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrievalOutcome {
    Cleared,
    Preview {
        bytes: usize,
    },
    DownloadOnly {
        bytes: usize,
        extension: Option<String>,
    },
    Failed {
        reason: RetrievalFailure,
    },
}

impl RetrievalOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RetrievalOutcome::Failed { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            RetrievalOutcome::Cleared => "no artifact selected".to_string(),
            RetrievalOutcome::Preview { bytes } => format!("{bytes} bytes, preview ready"),
            RetrievalOutcome::DownloadOnly { bytes, extension } => match extension {
                Some(ext) => format!("{bytes} bytes (.{ext}), download only"),
                None => format!("{bytes} bytes, download only"),
            },
            RetrievalOutcome::Failed { reason } => format!("failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalFailure {
    MissingSelection { segment: PathSegment },
    Status { status: u16 },
    Network { message: String },
    UnexpectedPayload { message: String },
}

impl std::fmt::Display for RetrievalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalFailure::MissingSelection { segment } => write!(f, "no {segment} selected"),
            RetrievalFailure::Status { status } => write!(f, "download returned status {status}"),
            RetrievalFailure::Network { message } => write!(f, "network error: {message}"),
            RetrievalFailure::UnexpectedPayload { message } => {
                write!(f, "unexpected payload: {message}")
            }
        }
    }
}

impl From<StudyError> for RetrievalFailure {
    fn from(err: StudyError) -> Self {
        match err {
            StudyError::MissingSelection(segment) => RetrievalFailure::MissingSelection { segment },
            StudyError::ApiStatus { status, .. } | StudyError::RetrievalFailed { status } => {
                RetrievalFailure::Status { status }
            }
            StudyError::UnexpectedPayload(message) => {
                RetrievalFailure::UnexpectedPayload { message }
            }
            other => RetrievalFailure::Network {
                message: other.to_string(),
            },
        }
    }
}

impl From<RetrievalFailure> for StudyError {
    fn from(failure: RetrievalFailure) -> Self {
        match failure {
            RetrievalFailure::MissingSelection { segment } => StudyError::MissingSelection(segment),
            RetrievalFailure::Status { status } => StudyError::RetrievalFailed { status },
            RetrievalFailure::Network { message } => StudyError::ApiHttp(message),
            RetrievalFailure::UnexpectedPayload { message } => {
                StudyError::UnexpectedPayload(message)
            }
        }
    }
}

/// Turns an artifact selection into downloadable bytes: one call for the
/// signed URL, one for the content. Nothing is cached.
pub struct ArtifactRetrieval<'a, A: CloudApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: CloudApi + ?Sized> ArtifactRetrieval<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    pub fn select(&self, state: &mut SessionState, artifact: Option<Artifact>) -> RetrievalOutcome {
        let outcome = match artifact {
            None => {
                tracing::debug!("artifact selection cleared");
                state.clear_retrieval();
                RetrievalOutcome::Cleared
            }
            Some(artifact) => match self.retrieve(state, artifact) {
                Ok(outcome) => outcome,
                Err(reason) => {
                    tracing::warn!(%reason, "artifact retrieval failed");
                    RetrievalOutcome::Failed { reason }
                }
            },
        };
        state.retrieval = Some(outcome.clone());
        outcome
    }

    fn retrieve(
        &self,
        state: &mut SessionState,
        artifact: Artifact,
    ) -> Result<RetrievalOutcome, RetrievalFailure> {
        state.request_params.path = Some(artifact.key.clone());
        let file_name = artifact.file_name.clone();
        state.artifact = Some(artifact);

        let download_path = state.request_path.download_path()?;
        let payload = self
            .api
            .get(&download_path, &state.request_params.to_query())?;
        let signed_url = signed_url_from(payload)?;
        tracing::debug!(path = %download_path, "received signed url");
        state.signed_url = Some(signed_url.clone());

        let response = self.api.fetch(&signed_url)?;
        if response.status != HTTP_OK {
            return Err(RetrievalFailure::Status {
                status: response.status,
            });
        }
        state.response = response.body;
        let bytes = state.response.len();

        match crate::domain::file_extension(&file_name) {
            Ok(ext) if ext.eq_ignore_ascii_case(PREVIEW_EXTENSION) => {
                state.content = Some(state.response.clone());
                tracing::info!(file = %file_name, bytes, "artifact ready for preview");
                Ok(RetrievalOutcome::Preview { bytes })
            }
            Ok(ext) => {
                state.content = None;
                Ok(RetrievalOutcome::DownloadOnly {
                    bytes,
                    extension: Some(ext.to_string()),
                })
            }
            Err(err) => {
                tracing::debug!(error = %err, "no preview for artifact");
                state.content = None;
                Ok(RetrievalOutcome::DownloadOnly {
                    bytes,
                    extension: None,
                })
            }
        }
    }
}

fn signed_url_from(payload: Value) -> Result<String, RetrievalFailure> {
    match payload {
        Value::String(url) if !url.is_empty() => Ok(url),
        other => Err(RetrievalFailure::UnexpectedPayload {
            message: format!("expected a signed url, got {other}"),
        }),
    }
}
