use serde::Serialize;

use crate::domain::{Account, Artifact, CreatedStudy, Project, RecipeRef, Study};
use crate::path::{PathSegment, RequestParams, RequestPath};
use crate::retrieval::RetrievalOutcome;

pub const DEFAULT_DOWNLOAD_NAME: &str = "download.zip";

/// Selection changes dispatched by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEvent {
    AccountSelected(Option<Account>),
    ProjectSelected(Option<Project>),
    RecipeSelected(Option<RecipeRef>),
    StudySubmitted(CreatedStudy),
    StudySelected(Option<Study>),
    ArtifactCleared,
}

/// Everything the session knows about the current selections. Only the
/// latest selection of each kind is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub account: Option<Account>,
    pub owner: Option<String>,
    pub project: Option<Project>,
    pub recipe: Option<RecipeRef>,
    pub new_study: Option<CreatedStudy>,
    pub study: Option<Study>,
    pub artifact: Option<Artifact>,
    pub request_path: RequestPath,
    pub request_params: RequestParams,
    pub signed_url: Option<String>,
    pub response: Vec<u8>,
    pub content: Option<Vec<u8>>,
    pub retrieval: Option<RetrievalOutcome>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            account: None,
            owner: None,
            project: None,
            recipe: None,
            new_study: None,
            study: None,
            artifact: None,
            request_path: RequestPath::default(),
            request_params: RequestParams::default(),
            signed_url: None,
            response: Vec::new(),
            content: None,
            retrieval: None,
        }
    }

    pub fn with_recipe(recipe: Option<RecipeRef>) -> Self {
        Self {
            recipe,
            ..Self::new()
        }
    }

    pub fn apply(mut self, event: SelectionEvent) -> Self {
        match event {
            SelectionEvent::AccountSelected(account) => {
                let owner = account.as_ref().map(|account| account.owner().to_string());
                self.request_path.set(PathSegment::Owner, owner.clone());
                self.owner = owner;
                self.account = account;
            }
            SelectionEvent::ProjectSelected(project) => {
                self.request_path.set(
                    PathSegment::Project,
                    project.as_ref().map(|project| project.name.clone()),
                );
                self.project = project;
            }
            SelectionEvent::RecipeSelected(recipe) => {
                self.recipe = recipe;
            }
            SelectionEvent::StudySubmitted(created) => {
                self.new_study = Some(created);
            }
            SelectionEvent::StudySelected(study) => {
                self.request_path.set(
                    PathSegment::Study,
                    study.as_ref().map(|study| study.id.clone()),
                );
                self.study = study;
            }
            SelectionEvent::ArtifactCleared => {
                self.clear_retrieval();
                self.retrieval = Some(RetrievalOutcome::Cleared);
            }
        }
        self
    }

    pub(crate) fn clear_retrieval(&mut self) {
        self.artifact = None;
        self.request_params.path = None;
        self.signed_url = None;
        self.response.clear();
        self.content = None;
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().map(|project| project.name.as_str())
    }

    pub fn study_id(&self) -> Option<&str> {
        self.study.as_ref().map(|study| study.id.as_str())
    }

    /// Study the study picker should preselect: the one just submitted.
    pub fn default_study_id(&self) -> Option<&str> {
        self.new_study
            .as_ref()
            .map(|created| created.study_id.as_str())
    }

    pub fn has_preview(&self) -> bool {
        self.content.is_some()
    }

    pub fn download_action(&self) -> DownloadAction<'_> {
        DownloadAction {
            data: &self.response,
            file_name: self
                .artifact
                .as_ref()
                .map(|artifact| artifact.download_name().to_string())
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string()),
            disabled: self.response.is_empty(),
        }
    }

    /// Link to the selected study in the Pollination web app.
    pub fn study_link(&self, api_host: &str) -> String {
        let base = api_host.trim_end_matches('/').replacen("api", "app", 1);
        format!(
            "{base}/{}/projects/{}/studies/{}",
            self.owner.as_deref().unwrap_or("None"),
            self.project_name().unwrap_or("None"),
            self.study_id().unwrap_or("None"),
        )
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            owner: self.owner.clone(),
            project: self.project_name().map(str::to_string),
            recipe: self.recipe.as_ref().map(RecipeRef::label),
            study: self.study_id().map(str::to_string),
            new_study: self.default_study_id().map(str::to_string),
            artifact: self.artifact.as_ref().map(|artifact| artifact.key.clone()),
            signed_url: self.signed_url.clone(),
            response_bytes: self.response.len(),
            preview: self.has_preview(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadAction<'a> {
    pub data: &'a [u8],
    pub file_name: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub owner: Option<String>,
    pub project: Option<String>,
    pub recipe: Option<String>,
    pub study: Option<String>,
    pub new_study: Option<String>,
    pub artifact: Option<String>,
    pub signed_url: Option<String>,
    pub response_bytes: usize,
    pub preview: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_values() {
        let state = SessionState::new();
        assert!(state.owner.is_none());
        assert!(state.new_study.is_none());
        assert!(state.signed_url.is_none());
        assert!(state.response.is_empty());
        assert!(state.content.is_none());
        assert_eq!(state.request_params.page, 1);
        assert_eq!(state.request_params.per_page, 25);
    }

    #[test]
    fn study_link_rewrites_first_api_only() {
        let state = SessionState::new()
            .apply(SelectionEvent::AccountSelected(Some(Account::user("jane"))))
            .apply(SelectionEvent::ProjectSelected(Some(Project::named("demo"))))
            .apply(SelectionEvent::StudySelected(Some(Study::with_id("s1"))));
        assert_eq!(
            state.study_link("https://api.pollination.cloud/"),
            "https://app.pollination.cloud/jane/projects/demo/studies/s1"
        );
    }

    #[test]
    fn clearing_a_project_clears_its_segment() {
        let state = SessionState::new()
            .apply(SelectionEvent::ProjectSelected(Some(Project::named("demo"))))
            .apply(SelectionEvent::ProjectSelected(None));
        assert!(state.request_path.get(PathSegment::Project).is_none());
    }
}
