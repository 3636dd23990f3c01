use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;

use crate::api::CloudApi;
use crate::domain::{
    Account, Artifact, CreatedStudy, Project, RecipeInput, RecipeRef, Run, Study,
};
use crate::error::StudyError;
use crate::path::{PathSegment, RequestParams};
use crate::recipe::study_spec;
use crate::retrieval::{ArtifactRetrieval, RetrievalOutcome};
use crate::state::{SelectionEvent, SessionState};
use crate::store::{DownloadOrigin, SavedDownload, Store};

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Browse,
    Download,
    Submit,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn phase(phase: &str, message: impl AsRef<str>) -> Self {
        Self {
            message: format!("phase={phase}; {}", message.as_ref()),
            elapsed: None,
        }
    }

    fn latency(started: Instant) -> Self {
        let elapsed = started.elapsed();
        Self {
            message: format!("api.request latency_ms={}", elapsed.as_millis()),
            elapsed: Some(elapsed),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub per_page: u32,
    pub default_account: String,
    pub default_project_id: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            per_page: crate::path::DEFAULT_PER_PAGE,
            default_account: crate::config::DEFAULT_ACCOUNT.to_string(),
            default_project_id: None,
        }
    }
}

/// Narrows an artifact listing to a folder and a file name pattern.
#[derive(Debug, Clone)]
pub struct ArtifactFilter {
    pub path: Option<String>,
    pub file_name_match: Regex,
}

impl Default for ArtifactFilter {
    fn default() -> Self {
        Self {
            path: None,
            file_name_match: Regex::new(".*").expect("static pattern"),
        }
    }
}

impl ArtifactFilter {
    pub fn new(path: Option<String>, pattern: Option<&str>) -> Result<Self, StudyError> {
        let file_name_match = Regex::new(pattern.unwrap_or(".*"))
            .map_err(|err| StudyError::InvalidPattern(err.to_string()))?;
        Ok(Self {
            path,
            file_name_match,
        })
    }

    pub fn matches(&self, artifact: &Artifact) -> bool {
        artifact.is_folder() || self.file_name_match.is_match(&artifact.file_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub owner: String,
    pub project: String,
    pub recipe: String,
    pub study_id: String,
    pub link: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub key: String,
    pub file_name: String,
    pub signed_url: Option<String>,
    pub outcome: RetrievalOutcome,
    pub saved: Option<SavedDownload>,
}

/// Summary of the selected study and its runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyCard {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    pub author: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub runs: Vec<Run>,
    pub link: String,
}

/// Session facade: owns the selection state and routes every selection
/// through the reducer or the retrieval flow.
pub struct App<A: CloudApi> {
    api: A,
    store: Store,
    settings: AppSettings,
    state: SessionState,
}

impl<A: CloudApi> App<A> {
    pub fn new(api: A, store: Store, settings: AppSettings, default_recipe: Option<RecipeRef>) -> Self {
        Self {
            api,
            store,
            settings,
            state: SessionState::with_recipe(default_recipe),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn dispatch(&mut self, event: SelectionEvent) {
        tracing::debug!(?event, "selection");
        self.state = std::mem::take(&mut self.state).apply(event);
    }

    pub fn select_account(&mut self, account: Option<Account>) {
        self.dispatch(SelectionEvent::AccountSelected(account));
    }

    pub fn select_project(&mut self, project: Option<Project>) {
        self.dispatch(SelectionEvent::ProjectSelected(project));
    }

    pub fn select_recipe(&mut self, recipe: Option<RecipeRef>) {
        self.dispatch(SelectionEvent::RecipeSelected(recipe));
    }

    pub fn select_study(&mut self, study: Option<Study>) {
        self.dispatch(SelectionEvent::StudySelected(study));
    }

    pub fn select_artifact(
        &mut self,
        artifact: Option<Artifact>,
        sink: &dyn ProgressSink,
    ) -> RetrievalOutcome {
        if let Some(artifact) = &artifact {
            sink.event(ProgressEvent::phase(
                "Fetch",
                format!("downloading {}", artifact.key),
            ));
        }
        let started = Instant::now();
        let outcome = ArtifactRetrieval::new(&self.api).select(&mut self.state, artifact);
        if !matches!(outcome, RetrievalOutcome::Cleared) {
            sink.event(ProgressEvent::latency(started));
        }
        let phase = if outcome.is_failure() { "Fetch" } else { "Store" };
        sink.event(ProgressEvent::phase(phase, outcome.describe()));
        outcome
    }

    /// The signed-in user followed by the organizations they belong to.
    pub fn accounts(&self, sink: &dyn ProgressSink) -> Result<Vec<Account>, StudyError> {
        sink.event(ProgressEvent::phase("Resolve", "loading accounts"));
        let started = Instant::now();
        let user = self.api.current_user()?;
        let orgs = self.api.organizations(user.owner(), &self.params())?;
        sink.event(ProgressEvent::latency(started));

        let mut accounts = vec![user];
        accounts.extend(orgs);
        Ok(accounts)
    }

    pub fn default_account<'a>(&self, accounts: &'a [Account]) -> Option<&'a Account> {
        accounts
            .iter()
            .find(|account| account.owner() == self.settings.default_account)
    }

    pub fn projects(&self, sink: &dyn ProgressSink) -> Result<Vec<Project>, StudyError> {
        let owner = self.require(PathSegment::Owner)?;
        sink.event(ProgressEvent::phase(
            "Resolve",
            format!("loading projects for {owner}"),
        ));
        let started = Instant::now();
        let projects = self.api.projects(owner, &self.params())?;
        sink.event(ProgressEvent::latency(started));
        Ok(projects)
    }

    pub fn default_project<'a>(&self, projects: &'a [Project]) -> Option<&'a Project> {
        let wanted = self.settings.default_project_id.as_deref()?;
        projects
            .iter()
            .find(|project| project.id.as_deref() == Some(wanted))
    }

    /// Recipes installed on the selected project; the local default recipe
    /// is listed first when the project does not already carry it.
    pub fn recipes(&self, sink: &dyn ProgressSink) -> Result<Vec<RecipeRef>, StudyError> {
        let owner = self.require(PathSegment::Owner)?;
        let project = self.require(PathSegment::Project)?;
        sink.event(ProgressEvent::phase(
            "Resolve",
            format!("loading recipes for {owner}/{project}"),
        ));
        let started = Instant::now();
        let mut recipes = self.api.project_recipes(owner, project, &self.params())?;
        sink.event(ProgressEvent::latency(started));

        if let Some(default) = &self.state.recipe {
            let listed = recipes
                .iter()
                .any(|recipe| recipe.owner == default.owner && recipe.name == default.name);
            if !listed {
                recipes.insert(0, default.clone());
            }
        }
        Ok(recipes)
    }

    pub fn studies(&self, sink: &dyn ProgressSink) -> Result<Vec<Study>, StudyError> {
        let owner = self.require(PathSegment::Owner)?;
        let project = self.require(PathSegment::Project)?;
        sink.event(ProgressEvent::phase(
            "Resolve",
            format!("loading studies for {owner}/{project}"),
        ));
        let started = Instant::now();
        let studies = self.api.studies(owner, project, &self.params())?;
        sink.event(ProgressEvent::latency(started));
        Ok(studies)
    }

    pub fn default_study<'a>(&self, studies: &'a [Study]) -> Option<&'a Study> {
        let wanted = self.state.default_study_id()?;
        studies.iter().find(|study| study.id == wanted)
    }

    /// Fetches the selected study afresh, so the status is current, along
    /// with its runs.
    pub fn study_card(&self, sink: &dyn ProgressSink) -> Result<StudyCard, StudyError> {
        let owner = self.require(PathSegment::Owner)?;
        let project = self.require(PathSegment::Project)?;
        let study_id = self.require(PathSegment::Study)?;
        sink.event(ProgressEvent::phase(
            "Resolve",
            format!("loading runs of {study_id}"),
        ));
        let started = Instant::now();
        let study = self.api.study(owner, project, study_id)?;
        let runs = self.api.runs(owner, project, study_id, &self.params())?;
        sink.event(ProgressEvent::latency(started));

        let status = study.status.clone().unwrap_or_default();
        Ok(StudyCard {
            status: study.status_text().to_string(),
            author: study.author.map(|author| author.name),
            started_at: status.started_at,
            finished_at: status.finished_at,
            runs,
            link: self.study_link(),
            id: study.id,
            name: study.name,
        })
    }

    pub fn artifacts(
        &self,
        filter: &ArtifactFilter,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Artifact>, StudyError> {
        let artifacts_path = self.state.request_path.artifacts_path()?;
        sink.event(ProgressEvent::phase(
            "Resolve",
            format!("listing {artifacts_path}"),
        ));
        let mut params = self.params();
        params.path = filter.path.clone();
        let started = Instant::now();
        let artifacts = self.api.artifacts(&artifacts_path, &params)?;
        sink.event(ProgressEvent::latency(started));
        Ok(artifacts
            .into_iter()
            .filter(|artifact| filter.matches(artifact))
            .collect())
    }

    pub fn submit_recipe(
        &mut self,
        name: &str,
        description: Option<&str>,
        inputs: &[RecipeInput],
        sink: &dyn ProgressSink,
    ) -> Result<SubmitResult, StudyError> {
        let jobs_path = self.state.request_path.jobs_path()?;
        let recipe = self
            .state
            .recipe
            .clone()
            .ok_or_else(|| StudyError::InvalidInput("no recipe selected".to_string()))?;
        sink.event(ProgressEvent::phase(
            "Prepare",
            format!("submitting {} as {name}", recipe.label()),
        ));

        let spec = study_spec(&recipe, name, description, inputs);
        let started = Instant::now();
        let created = self.api.create_study(&jobs_path, &spec)?;
        sink.event(ProgressEvent::latency(started));
        tracing::info!(study = %created.study_id, "study created");

        self.dispatch(SelectionEvent::StudySubmitted(created.clone()));
        let owner = self.require(PathSegment::Owner)?.to_string();
        let project = self.require(PathSegment::Project)?.to_string();
        sink.event(ProgressEvent::phase(
            "Store",
            format!("study {} created", created.study_id),
        ));

        Ok(SubmitResult {
            link: self.link_for(&owner, &project, &created),
            owner,
            project,
            recipe: recipe.label(),
            study_id: created.study_id,
        })
    }

    /// Saves the current response under the download store.
    pub fn save_download(&self, extract: bool) -> Result<SavedDownload, StudyError> {
        self.ensure_retrieved()?;
        let artifact = self
            .state
            .artifact
            .as_ref()
            .ok_or(StudyError::NothingToDownload)?;
        let action = self.state.download_action();
        if action.disabled {
            return Err(StudyError::NothingToDownload);
        }
        let origin = DownloadOrigin {
            owner: self.require(PathSegment::Owner)?,
            project: self.require(PathSegment::Project)?,
            study: self.require(PathSegment::Study)?,
            key: &artifact.key,
        };
        self.store
            .save_download(&origin, &action.file_name, action.data, extract)
    }

    /// Writes the previewable content where an external viewer can open it.
    pub fn export_preview(&self, dir: &Utf8Path) -> Result<Utf8PathBuf, StudyError> {
        self.ensure_retrieved()?;
        let content = self
            .state
            .content
            .as_ref()
            .ok_or(StudyError::NothingToDownload)?;
        let file_name = self.state.download_action().file_name;
        let target = dir.join(file_name);
        Store::write_bytes_atomic(&target, content)?;
        Ok(target)
    }

    pub fn study_link(&self) -> String {
        self.state.study_link(self.api.host())
    }

    fn link_for(&self, owner: &str, project: &str, created: &CreatedStudy) -> String {
        let base = self.api.host().trim_end_matches('/').replacen("api", "app", 1);
        format!("{base}/{owner}/projects/{project}/studies/{}", created.study_id)
    }

    /// A failed retrieval leaves the previous bytes in place; they must not
    /// be written under the newly selected artifact's name.
    fn ensure_retrieved(&self) -> Result<(), StudyError> {
        match &self.state.retrieval {
            Some(RetrievalOutcome::Failed { reason }) => Err(reason.clone().into()),
            _ => Ok(()),
        }
    }

    fn require(&self, segment: PathSegment) -> Result<&str, StudyError> {
        self.state
            .request_path
            .get(segment)
            .ok_or(StudyError::MissingSelection(segment))
    }

    fn params(&self) -> RequestParams {
        RequestParams::with_per_page(self.settings.per_page)
    }
}
