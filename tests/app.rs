use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};

use pollination_study_browser::api::{CloudApi, RawResponse};
use pollination_study_browser::app::{App, AppSettings, ArtifactFilter};
use pollination_study_browser::domain::{Account, Artifact, Project, RecipeRef, Study};
use pollination_study_browser::error::StudyError;
use pollination_study_browser::output::JsonOutput;
use pollination_study_browser::path::PathSegment;
use pollination_study_browser::retrieval::{RetrievalFailure, RetrievalOutcome};
use pollination_study_browser::store::Store;

const STUDY_ROOT: &str = "/projects/acme/demo/jobs/s-1/artifacts";
const DOWNLOAD: &str = "/projects/acme/demo/jobs/s-1/artifacts/download";

#[derive(Default)]
struct MockCloud {
    routes: HashMap<String, Value>,
    downloads: HashMap<String, RawResponse>,
    calls: Mutex<Vec<String>>,
    queries: Mutex<Vec<Vec<(String, String)>>>,
    posts: Mutex<Vec<(String, Value)>>,
}

impl MockCloud {
    fn route(mut self, path: &str, value: Value) -> Self {
        self.routes.insert(path.to_string(), value);
        self
    }

    /// Download route answering only for one artifact key.
    fn signed(mut self, key: &str, url: &str) -> Self {
        self.routes
            .insert(format!("{DOWNLOAD}?path={key}"), Value::String(url.to_string()));
        self
    }

    fn download(mut self, url: &str, status: u16, body: &[u8]) -> Self {
        self.downloads.insert(
            url.to_string(),
            RawResponse {
                status,
                body: body.to_vec(),
            },
        );
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CloudApi for MockCloud {
    fn host(&self) -> &str {
        "https://api.pollination.cloud"
    }

    fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, StudyError> {
        self.calls.lock().unwrap().push(format!("GET {path}"));
        self.queries.lock().unwrap().push(query.to_vec());
        let scoped = query
            .iter()
            .find(|(name, _)| name == "path")
            .and_then(|(_, key)| self.routes.get(&format!("{path}?path={key}")));
        scoped
            .or_else(|| self.routes.get(path))
            .cloned()
            .ok_or_else(|| StudyError::ApiStatus {
                status: 404,
                message: path.to_string(),
            })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, StudyError> {
        self.calls.lock().unwrap().push(format!("POST {path}"));
        self.posts
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        Ok(json!({ "id": "study-42" }))
    }

    fn fetch(&self, url: &str) -> Result<RawResponse, StudyError> {
        self.calls.lock().unwrap().push(format!("FETCH {url}"));
        self.downloads
            .get(url)
            .cloned()
            .ok_or_else(|| StudyError::ApiHttp(format!("connection refused: {url}")))
    }
}

fn default_recipe() -> RecipeRef {
    serde_json::from_value(json!({
        "owner": "ladybug-tools",
        "name": "direct-sun-hours",
        "tag": "latest"
    }))
    .unwrap()
}

fn app_with(api: MockCloud) -> App<MockCloud> {
    let settings = AppSettings {
        per_page: 25,
        default_account: "acme".to_string(),
        default_project_id: Some("p-2".to_string()),
    };
    App::new(
        api,
        Store::new(Utf8PathBuf::from("/tmp/pstudy-unused")),
        settings,
        Some(default_recipe()),
    )
}

fn select_study(app: &mut App<MockCloud>) {
    app.select_account(Some(Account::organization("acme")));
    app.select_project(Some(Project::named("demo")));
    app.select_study(Some(Study::with_id("s-1")));
}

fn cloud_with_artifacts() -> MockCloud {
    MockCloud::default()
        .signed("out/result.vtkjs", "https://bucket/result.vtkjs?sig=1")
        .download("https://bucket/result.vtkjs?sig=1", 200, b"\x00\x01")
        .signed("out/result.txt", "https://bucket/result.txt?sig=2")
        .download("https://bucket/result.txt?sig=2", 200, b"12.5\n")
        .signed("out/denied.vtkjs", "https://bucket/denied.vtkjs?sig=3")
        .download("https://bucket/denied.vtkjs?sig=3", 403, b"AccessDenied")
}

#[test]
fn accounts_list_user_then_organizations() {
    let api = MockCloud::default()
        .route("/user", json!({ "username": "jane", "name": "Jane Doe" }))
        .route(
            "/orgs",
            json!({ "resources": [{ "account_name": "acme", "name": "Acme" }] }),
        );
    let app = app_with(api);

    let accounts = app.accounts(&JsonOutput).unwrap();
    let owners = accounts.iter().map(Account::owner).collect::<Vec<_>>();
    assert_eq!(owners, vec!["jane", "acme"]);
    assert_eq!(
        app.default_account(&accounts).map(Account::owner),
        Some("acme")
    );

    let queries = app.api().queries.lock().unwrap();
    assert!(queries[1].contains(&("member".to_string(), "jane".to_string())));
}

#[test]
fn account_project_study_selection_builds_artifact_path() {
    let mut app = app_with(MockCloud::default());
    app.select_account(Some(Account::user("jane")));
    app.select_project(Some(Project::named("demo")));
    app.select_study(Some(Study::with_id("s-1")));

    assert_eq!(
        app.state().request_path.segments(),
        [
            Some("projects"),
            Some("jane"),
            Some("demo"),
            Some("jobs"),
            Some("s-1"),
            Some("artifacts")
        ]
    );
    assert_eq!(app.study_link(), "https://app.pollination.cloud/jane/projects/demo/studies/s-1");
}

#[test]
fn default_project_matches_configured_id() {
    let api = MockCloud::default().route(
        "/projects",
        json!([
            { "id": "p-1", "name": "first" },
            { "id": "p-2", "name": "demo", "owner": { "name": "acme" } }
        ]),
    );
    let mut app = app_with(api);
    app.select_account(Some(Account::organization("acme")));

    let projects = app.projects(&JsonOutput).unwrap();
    assert_eq!(projects.len(), 2);
    assert_eq!(
        app.default_project(&projects).map(|project| project.name.as_str()),
        Some("demo")
    );
}

#[test]
fn projects_require_an_account() {
    let app = app_with(MockCloud::default());
    assert_matches!(
        app.projects(&JsonOutput),
        Err(StudyError::MissingSelection(PathSegment::Owner))
    );
    assert_eq!(app.api().call_count(), 0);
}

#[test]
fn recipes_list_the_default_recipe_first() {
    let api = MockCloud::default().route(
        "/projects/acme/demo/recipes",
        json!({ "resources": [{ "owner": { "name": "ladybug-tools" }, "name": "annual-daylight", "tag": "0.8.2" }] }),
    );
    let mut app = app_with(api);
    app.select_account(Some(Account::organization("acme")));
    app.select_project(Some(Project::named("demo")));

    let recipes = app.recipes(&JsonOutput).unwrap();
    let labels = recipes.iter().map(RecipeRef::label).collect::<Vec<_>>();
    assert_eq!(
        labels,
        vec![
            "ladybug-tools/direct-sun-hours:latest",
            "ladybug-tools/annual-daylight:0.8.2"
        ]
    );
}

#[test]
fn artifact_listing_applies_folder_and_name_filter() {
    let api = MockCloud::default().route(
        STUDY_ROOT,
        json!([
            { "key": "out/result.vtkjs", "file_name": "result.vtkjs", "file_type": "file" },
            { "key": "out/result.txt", "file_name": "result.txt", "file_type": "file" },
            { "key": "out/grids", "file_name": "grids", "file_type": "folder" }
        ]),
    );
    let mut app = app_with(api);
    select_study(&mut app);

    let filter = ArtifactFilter::new(Some("out".to_string()), Some(r"\.vtkjs$")).unwrap();
    let artifacts = app.artifacts(&filter, &JsonOutput).unwrap();
    let names = artifacts
        .iter()
        .map(|artifact| artifact.file_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["result.vtkjs", "grids"]);

    let queries = app.api().queries.lock().unwrap();
    assert!(queries[0].contains(&("path".to_string(), "out".to_string())));
    assert!(queries[0].contains(&("per-page".to_string(), "25".to_string())));
}

#[test]
fn invalid_name_pattern_is_rejected() {
    assert_matches!(
        ArtifactFilter::new(None, Some("(")),
        Err(StudyError::InvalidPattern(_))
    );
}

#[test]
fn vtkjs_artifact_becomes_previewable_content() {
    let mut app = app_with(cloud_with_artifacts());
    select_study(&mut app);

    let outcome = app.select_artifact(
        Some(Artifact::new("out/result.vtkjs", "result.vtkjs")),
        &JsonOutput,
    );

    assert_eq!(outcome, RetrievalOutcome::Preview { bytes: 2 });
    let state = app.state();
    assert_eq!(state.response, b"\x00\x01".to_vec());
    assert_eq!(state.content.as_deref(), Some(&b"\x00\x01"[..]));
    assert_eq!(
        state.signed_url.as_deref(),
        Some("https://bucket/result.vtkjs?sig=1")
    );
    assert_eq!(state.request_params.path.as_deref(), Some("out/result.vtkjs"));
    assert_eq!(state.retrieval, Some(outcome));

    let calls = app.api().calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            format!("GET {DOWNLOAD}"),
            "FETCH https://bucket/result.vtkjs?sig=1".to_string()
        ]
    );
}

#[test]
fn text_artifact_is_download_only() {
    let mut app = app_with(cloud_with_artifacts());
    select_study(&mut app);

    let outcome = app.select_artifact(
        Some(Artifact::new("out/result.txt", "result.txt")),
        &JsonOutput,
    );

    assert_matches!(
        outcome,
        RetrievalOutcome::DownloadOnly { bytes: 5, extension: Some(ref ext) } if ext == "txt"
    );
    let state = app.state();
    assert_eq!(state.content, None);
    let action = state.download_action();
    assert_eq!(action.file_name, "result.txt");
    assert_eq!(action.data, b"12.5\n");
    assert!(!action.disabled);
}

#[test]
fn preview_is_replaced_when_a_text_artifact_follows() {
    let mut app = app_with(cloud_with_artifacts());
    select_study(&mut app);

    app.select_artifact(
        Some(Artifact::new("out/result.vtkjs", "result.vtkjs")),
        &JsonOutput,
    );
    app.select_artifact(
        Some(Artifact::new("out/result.txt", "result.txt")),
        &JsonOutput,
    );

    assert_eq!(app.state().content, None);
    assert_eq!(app.state().response, b"12.5\n".to_vec());
}

#[test]
fn failed_download_keeps_previous_response() {
    let mut app = app_with(cloud_with_artifacts());
    select_study(&mut app);
    app.select_artifact(
        Some(Artifact::new("out/result.vtkjs", "result.vtkjs")),
        &JsonOutput,
    );

    let outcome = app.select_artifact(
        Some(Artifact::new("out/denied.vtkjs", "denied.vtkjs")),
        &JsonOutput,
    );

    assert_eq!(
        outcome,
        RetrievalOutcome::Failed {
            reason: RetrievalFailure::Status { status: 403 }
        }
    );
    let state = app.state();
    assert_eq!(state.response, b"\x00\x01".to_vec());
    assert_eq!(state.content.as_deref(), Some(&b"\x00\x01"[..]));
    assert_eq!(
        state.signed_url.as_deref(),
        Some("https://bucket/denied.vtkjs?sig=3")
    );
}

#[test]
fn network_error_is_reported_as_failure() {
    let api = MockCloud::default().signed("out/gone.vtkjs", "https://bucket/gone");
    let mut app = app_with(api);
    select_study(&mut app);

    let outcome = app.select_artifact(
        Some(Artifact::new("out/gone.vtkjs", "gone.vtkjs")),
        &JsonOutput,
    );

    assert_matches!(
        outcome,
        RetrievalOutcome::Failed {
            reason: RetrievalFailure::Network { .. }
        }
    );
    assert!(app.state().response.is_empty());
}

#[test]
fn non_string_signed_url_is_unexpected() {
    let api = MockCloud::default().route(DOWNLOAD, json!({ "url": "https://bucket/x" }));
    let mut app = app_with(api);
    select_study(&mut app);

    let outcome = app.select_artifact(Some(Artifact::new("x.vtkjs", "x.vtkjs")), &JsonOutput);

    assert_matches!(
        outcome,
        RetrievalOutcome::Failed {
            reason: RetrievalFailure::UnexpectedPayload { .. }
        }
    );
    assert_eq!(app.state().signed_url, None);
}

#[test]
fn clearing_the_artifact_resets_without_network() {
    let mut app = app_with(cloud_with_artifacts());
    select_study(&mut app);
    app.select_artifact(
        Some(Artifact::new("out/result.vtkjs", "result.vtkjs")),
        &JsonOutput,
    );
    let calls_before = app.api().call_count();

    let outcome = app.select_artifact(None, &JsonOutput);

    assert_eq!(outcome, RetrievalOutcome::Cleared);
    assert_eq!(app.api().call_count(), calls_before);
    let state = app.state();
    assert_eq!(state.signed_url, None);
    assert!(state.response.is_empty());
    assert_eq!(state.content, None);
    assert_eq!(state.request_params.path, None);

    let action = state.download_action();
    assert_eq!(action.file_name, "download.zip");
    assert!(action.disabled);
}

#[test]
fn incomplete_selection_fails_before_any_request() {
    let mut app = app_with(cloud_with_artifacts());
    app.select_account(Some(Account::organization("acme")));
    app.select_project(Some(Project::named("demo")));

    let outcome = app.select_artifact(
        Some(Artifact::new("out/result.vtkjs", "result.vtkjs")),
        &JsonOutput,
    );

    assert_eq!(
        outcome,
        RetrievalOutcome::Failed {
            reason: RetrievalFailure::MissingSelection {
                segment: PathSegment::Study
            }
        }
    );
    assert_eq!(app.api().call_count(), 0);
    assert!(app.state().response.is_empty());
}

#[test]
fn submitting_a_recipe_posts_a_job_and_preselects_it() {
    let api = MockCloud::default().route(
        "/projects/acme/demo/jobs",
        json!({ "resources": [{ "id": "study-41" }, { "id": "study-42", "name": "sun" }] }),
    );
    let mut app = app_with(api);
    app.select_account(Some(Account::organization("acme")));
    app.select_project(Some(Project::named("demo")));

    let inputs = vec!["timestep=2".parse().unwrap(), "grid-filter=*".parse().unwrap()];
    let result = app
        .submit_recipe("sun", Some("morning run"), &inputs, &JsonOutput)
        .unwrap();

    assert_eq!(result.study_id, "study-42");
    assert_eq!(
        result.link,
        "https://app.pollination.cloud/acme/projects/demo/studies/study-42"
    );
    {
        let posts = app.api().posts.lock().unwrap();
        let (path, body) = &posts[0];
        assert_eq!(path, "/projects/acme/demo/jobs");
        assert_eq!(
            body["source"],
            "https://api.pollination.cloud/registries/ladybug-tools/recipe/direct-sun-hours/latest"
        );
        assert_eq!(body["name"], "sun");
        assert_eq!(body["description"], "morning run");
        assert_eq!(body["arguments"][0][0]["type"], "JobArgument");
        assert_eq!(body["arguments"][0][0]["value"], 2);
        assert_eq!(body["arguments"][0][1]["value"], "*");
    }

    assert_eq!(app.state().default_study_id(), Some("study-42"));
    let studies = app.studies(&JsonOutput).unwrap();
    assert_eq!(
        app.default_study(&studies).map(|study| study.id.as_str()),
        Some("study-42")
    );
}

#[test]
fn submitting_without_recipe_is_rejected() {
    let mut app = App::new(
        MockCloud::default(),
        Store::new(Utf8PathBuf::from("/tmp/pstudy-unused")),
        AppSettings::default(),
        None,
    );
    app.select_account(Some(Account::organization("acme")));
    app.select_project(Some(Project::named("demo")));

    assert_matches!(
        app.submit_recipe("sun", None, &[], &JsonOutput),
        Err(StudyError::InvalidInput(_))
    );
    assert!(app.api().posts.lock().unwrap().is_empty());
}

#[test]
fn save_download_writes_response_and_metadata() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap();
    let mut app = App::new(
        cloud_with_artifacts(),
        Store::new(root.clone()),
        AppSettings::default(),
        None,
    );
    assert_matches!(app.save_download(false), Err(StudyError::NothingToDownload));

    select_study(&mut app);
    app.select_artifact(
        Some(Artifact::new("out/result.txt", "result.txt")),
        &JsonOutput,
    );
    let saved = app.save_download(false).unwrap();

    assert_eq!(saved.bytes, 5);
    assert!(saved.path.ends_with("acme/demo/s-1/result.txt"));
    assert_eq!(std::fs::read(&saved.path).unwrap(), b"12.5\n");

    let metadata = app.store().list_metadata().unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].key, "out/result.txt");
    assert_eq!(metadata[0].study, "s-1");
}

#[test]
fn export_preview_writes_vtkjs_bytes() {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let mut app = app_with(cloud_with_artifacts());
    assert_matches!(app.export_preview(&dir), Err(StudyError::NothingToDownload));

    select_study(&mut app);
    app.select_artifact(
        Some(Artifact::new("out/result.vtkjs", "result.vtkjs")),
        &JsonOutput,
    );
    let path = app.export_preview(&dir).unwrap();

    assert_eq!(path, dir.join("result.vtkjs"));
    assert_eq!(std::fs::read(path.as_std_path()).unwrap(), b"\x00\x01");
}

#[test]
fn failed_retrieval_blocks_save_and_export() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap();
    let preview_dir = Utf8PathBuf::from_path_buf(temp.path().join("preview")).unwrap();
    let mut app = App::new(
        cloud_with_artifacts(),
        Store::new(root.clone()),
        AppSettings::default(),
        None,
    );
    select_study(&mut app);
    app.select_artifact(
        Some(Artifact::new("out/result.vtkjs", "result.vtkjs")),
        &JsonOutput,
    );
    app.select_artifact(
        Some(Artifact::new("out/denied.vtkjs", "denied.vtkjs")),
        &JsonOutput,
    );

    assert_matches!(
        app.save_download(false),
        Err(StudyError::RetrievalFailed { status: 403 })
    );
    assert_matches!(
        app.export_preview(&preview_dir),
        Err(StudyError::RetrievalFailed { status: 403 })
    );
    assert!(!root.join("acme/demo/s-1/denied.vtkjs").exists());
    assert!(!preview_dir.join("denied.vtkjs").exists());
    assert!(app.store().list_metadata().unwrap().is_empty());

    app.select_artifact(
        Some(Artifact::new("out/result.txt", "result.txt")),
        &JsonOutput,
    );
    let saved = app.save_download(false).unwrap();
    assert_eq!(std::fs::read(&saved.path).unwrap(), b"12.5\n");
}

#[test]
fn study_card_combines_fresh_status_and_runs() {
    let api = MockCloud::default()
        .route(
            "/projects/acme/demo/jobs/s-1",
            json!({
                "id": "s-1",
                "name": "sun",
                "status": {
                    "status": "Completed",
                    "started_at": "2023-04-01T10:00:00Z",
                    "finished_at": "2023-04-01T10:05:00Z"
                },
                "author": { "name": "jane" }
            }),
        )
        .route(
            "/projects/acme/demo/runs",
            json!({ "resources": [
                { "id": "r-1", "status": { "status": "Succeeded" } },
                { "id": "r-2" }
            ] }),
        );
    let mut app = app_with(api);
    select_study(&mut app);

    let card = app.study_card(&JsonOutput).unwrap();

    assert_eq!(card.status, "Completed");
    assert_eq!(card.author.as_deref(), Some("jane"));
    assert_eq!(card.name.as_deref(), Some("sun"));
    assert_eq!(card.started_at.as_deref(), Some("2023-04-01T10:00:00Z"));
    assert_eq!(card.finished_at.as_deref(), Some("2023-04-01T10:05:00Z"));
    assert_eq!(card.runs.len(), 2);
    assert_eq!(card.runs[0].status_text(), "Succeeded");
    assert_eq!(card.runs[1].status_text(), "unknown");
    assert_eq!(
        card.link,
        "https://app.pollination.cloud/acme/projects/demo/studies/s-1"
    );

    let queries = app.api().queries.lock().unwrap();
    let runs_query = queries.last().unwrap();
    assert!(runs_query.contains(&("job_id".to_string(), "s-1".to_string())));
}

#[test]
fn study_card_requires_a_study() {
    let mut app = app_with(MockCloud::default());
    app.select_account(Some(Account::organization("acme")));
    app.select_project(Some(Project::named("demo")));

    assert_matches!(
        app.study_card(&JsonOutput),
        Err(StudyError::MissingSelection(PathSegment::Study))
    );
    assert_eq!(app.api().call_count(), 0);
}
