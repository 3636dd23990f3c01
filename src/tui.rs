use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

use crate::api::CloudApi;
use crate::app::{App, ArtifactFilter, ProgressEvent, ProgressSink, ProgressSinkKind, StudyCard};
use crate::domain::{Account, Artifact, Project, RecipeInput, RecipeRef, Study};
use crate::error::StudyError;
use crate::retrieval::RetrievalOutcome;
use crate::state::SessionSummary;

const EVENTS_MAX: usize = 6;
const LOGS_MAX: usize = 200;
const HINTS: &[&str] = &[
    "Tip: Tab/arrow keys move between panes, Enter selects",
    "Tip: d saves the selected artifact, x saves and unzips it",
    "Tip: .vtkjs artifacts get a preview; p exports it for a viewer",
    "Tip: :submit <name> key=value ... runs the selected recipe",
    "Tip: F2 study view, F3 new study, F4 logs",
];

type Backend = CrosstermBackend<io::Stdout>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    ViewStudy,
    NewStudy,
    Logs,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Accounts,
    Projects,
    Studies,
    Artifacts,
    Recipes,
}

impl Pane {
    fn index(self) -> usize {
        match self {
            Pane::Accounts => 0,
            Pane::Projects => 1,
            Pane::Studies => 2,
            Pane::Artifacts => 3,
            Pane::Recipes => 4,
        }
    }

    fn next(self) -> Self {
        match self {
            Pane::Accounts => Pane::Projects,
            Pane::Projects => Pane::Studies,
            Pane::Studies => Pane::Artifacts,
            Pane::Artifacts => Pane::Accounts,
            Pane::Recipes => Pane::Recipes,
        }
    }

    fn previous(self) -> Self {
        match self {
            Pane::Accounts => Pane::Artifacts,
            Pane::Projects => Pane::Accounts,
            Pane::Studies => Pane::Projects,
            Pane::Artifacts => Pane::Studies,
            Pane::Recipes => Pane::Recipes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Prepare,
    Fetch,
    Store,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Prepare => "Prepare",
            Phase::Fetch => "Fetch",
            Phase::Store => "Store",
        }
    }
}

/// Commands typed after `:`.
#[derive(Debug, Clone, PartialEq)]
pub enum TuiCommand {
    Submit {
        name: String,
        inputs: Vec<RecipeInput>,
    },
    Filter(Option<String>),
    Path(Option<String>),
    Export(Option<String>),
    Refresh,
}

pub fn parse_command(input: &str) -> Result<TuiCommand, StudyError> {
    let mut parts = input.split_whitespace();
    let command = parts
        .next()
        .ok_or_else(|| StudyError::InvalidInput("empty command".to_string()))?;
    let rest = parts.collect::<Vec<_>>();
    let argument = rest.first().map(|value| value.to_string());

    match command {
        "submit" => {
            let name = argument
                .ok_or_else(|| StudyError::InvalidInput("submit requires a study name".to_string()))?;
            let inputs = rest[1..]
                .iter()
                .map(|value| value.parse::<RecipeInput>())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TuiCommand::Submit { name, inputs })
        }
        "filter" => Ok(TuiCommand::Filter(argument)),
        "path" | "cd" => Ok(TuiCommand::Path(argument)),
        "export" => Ok(TuiCommand::Export(argument)),
        "refresh" | "r" => Ok(TuiCommand::Refresh),
        other => Err(StudyError::InvalidInput(format!("unknown command {other}"))),
    }
}

/// Runs `op` on a scoped worker thread and calls `wait` on this thread
/// until the worker is done. `app` is usable again once this returns.
fn run_on_worker<A, R, F, W>(
    app: &mut App<A>,
    sink: &TuiProgress,
    op: F,
    mut wait: W,
) -> miette::Result<Result<R, StudyError>>
where
    A: CloudApi,
    R: Send,
    F: FnOnce(&mut App<A>, &dyn ProgressSink) -> Result<R, StudyError> + Send,
    W: FnMut() -> miette::Result<()>,
{
    let worker_app = &mut *app;
    thread::scope(|scope| {
        let handle = scope.spawn(move || op(worker_app, sink));
        while !handle.is_finished() {
            wait()?;
        }
        handle
            .join()
            .map_err(|_| miette::Report::msg("worker thread panicked"))
    })
}

#[derive(Debug)]
struct AppState {
    status: String,
    error: Option<String>,
    phase: Phase,
    latency_ms: Option<u128>,
    requests: u64,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    active: bool,
    started: Instant,
    hint_index: usize,
    last_hint_update: Instant,
}

#[derive(Debug, Default)]
struct Listings {
    accounts: Vec<Account>,
    projects: Vec<Project>,
    studies: Vec<Study>,
    artifacts: Vec<Artifact>,
    recipes: Vec<RecipeRef>,
    cursors: [usize; 5],
}

impl Listings {
    fn len(&self, pane: Pane) -> usize {
        match pane {
            Pane::Accounts => self.accounts.len(),
            Pane::Projects => self.projects.len(),
            Pane::Studies => self.studies.len(),
            Pane::Artifacts => self.artifacts.len(),
            Pane::Recipes => self.recipes.len(),
        }
    }

    fn cursor(&self, pane: Pane) -> usize {
        self.cursors[pane.index()]
    }

    fn move_cursor(&mut self, pane: Pane, delta: isize) {
        let len = self.len(pane);
        if len == 0 {
            return;
        }
        let current = self.cursor(pane) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.cursors[pane.index()] = next as usize;
    }

    fn reset(&mut self, pane: Pane) {
        self.cursors[pane.index()] = 0;
    }
}

/// Snapshot of the session that the draw code reads.
#[derive(Debug, Clone)]
struct SessionView {
    summary: SessionSummary,
    outcome: Option<RetrievalOutcome>,
    download_name: String,
    download_disabled: bool,
    link: String,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
    listings: Listings,
    focus: Pane,
    filter: ArtifactFilter,
    session: Option<SessionView>,
    card: Option<StudyCard>,
    input: String,
    typing: bool,
    history: Vec<String>,
    history_index: Option<usize>,
    log_scroll: u16,
    export_dir: Utf8PathBuf,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
            } else if let Some(latency) = parse_latency(&message) {
                state.latency_ms = Some(latency);
                state.requests = state.requests.saturating_add(1);
            } else {
                state.status = message.clone();
            }
            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            push_bounded(
                &mut state.logs,
                format!("[{}] {message}", timestamp()),
                LOGS_MAX,
            );
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind, filter: ArtifactFilter, export_dir: Utf8PathBuf) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                error: None,
                phase: Phase::Resolve,
                latency_ms: None,
                requests: 0,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::ViewStudy,
                active: false,
                started: Instant::now(),
                hint_index: 0,
                last_hint_update: Instant::now(),
            })),
            listings: Listings::default(),
            focus: Pane::Accounts,
            filter,
            session: None,
            card: None,
            input: String::new(),
            typing: false,
            history: Vec::new(),
            history_index: None,
            log_scroll: 0,
            export_dir,
        }
    }

    /// Interactive browser over accounts, projects, studies and artifacts.
    pub fn browse<A: CloudApi>(&mut self, app: &mut App<A>) -> miette::Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let result = self.browse_loop(&mut terminal, app);

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        result
    }

    fn browse_loop<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<()> {
        self.sync_session(app);
        self.load_accounts(terminal, app)?;

        let mut tick = 0usize;
        loop {
            self.refresh_metrics();
            self.draw(terminal, tick)?;

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key, terminal, app)? {
                        break;
                    }
                }
            }
            tick = tick.wrapping_add(1);
        }
        Ok(())
    }

    /// Runs one blocking API operation on a worker thread while the UI
    /// keeps drawing. Keys pressed meanwhile are discarded.
    fn run_op<A, R, F>(
        &mut self,
        kind: ProgressSinkKind,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
        op: F,
    ) -> miette::Result<Option<R>>
    where
        A: CloudApi,
        R: Send,
        F: FnOnce(&mut App<A>, &dyn ProgressSink) -> Result<R, StudyError> + Send,
    {
        self.kind = kind;
        self.set_active(true);
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let mut tick = 0usize;
        let joined = run_on_worker(app, &sink, op, || {
            self.refresh_metrics();
            self.draw(terminal, tick)?;
            if event::poll(Duration::from_millis(80)).into_diagnostic()? {
                let _ = event::read().into_diagnostic()?;
            }
            tick = tick.wrapping_add(1);
            Ok(())
        })?;
        self.set_active(false);
        self.sync_session(app);

        match joined {
            Ok(value) => {
                self.set_error(None);
                Ok(Some(value))
            }
            Err(err) => {
                tracing::warn!(error = %err, "operation failed");
                self.set_error(Some(err.to_string()));
                Ok(None)
            }
        }
    }

    fn load_accounts<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<()> {
        let Some(accounts) = self.run_op(ProgressSinkKind::Browse, terminal, app, |app, sink| {
            app.accounts(sink)
        })?
        else {
            return Ok(());
        };
        let default = app
            .default_account(&accounts)
            .cloned()
            .or_else(|| accounts.first().cloned());
        self.listings.accounts = accounts;
        self.listings.reset(Pane::Accounts);
        if let Some(account) = default {
            if let Some(index) = self.listings.accounts.iter().position(|a| a == &account) {
                self.listings.cursors[Pane::Accounts.index()] = index;
            }
            self.choose_account(terminal, app, account)?;
        }
        Ok(())
    }

    fn choose_account<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
        account: Account,
    ) -> miette::Result<()> {
        app.select_account(Some(account));
        app.select_project(None);
        self.clear_study(app);
        self.listings.projects.clear();
        self.listings.recipes.clear();
        self.listings.reset(Pane::Projects);

        let Some(projects) = self.run_op(ProgressSinkKind::Browse, terminal, app, |app, sink| {
            app.projects(sink)
        })?
        else {
            return Ok(());
        };
        let default = app.default_project(&projects).cloned();
        self.listings.projects = projects;
        if let Some(project) = default {
            if let Some(index) = self
                .listings
                .projects
                .iter()
                .position(|p| p.name == project.name)
            {
                self.listings.cursors[Pane::Projects.index()] = index;
            }
            self.choose_project(terminal, app, project)?;
        }
        Ok(())
    }

    fn choose_project<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
        project: Project,
    ) -> miette::Result<()> {
        app.select_project(Some(project));
        self.clear_study(app);

        if let Some(recipes) =
            self.run_op(ProgressSinkKind::Browse, terminal, app, |app, sink| {
                app.recipes(sink)
            })?
        {
            self.listings.recipes = recipes;
            self.listings.reset(Pane::Recipes);
        }
        self.load_studies(terminal, app)
    }

    fn load_studies<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<()> {
        let Some(studies) = self.run_op(ProgressSinkKind::Browse, terminal, app, |app, sink| {
            app.studies(sink)
        })?
        else {
            return Ok(());
        };
        let default = app.default_study(&studies).cloned();
        self.listings.studies = studies;
        self.listings.reset(Pane::Studies);
        if let Some(study) = default {
            if let Some(index) = self.listings.studies.iter().position(|s| s.id == study.id) {
                self.listings.cursors[Pane::Studies.index()] = index;
            }
            self.choose_study(terminal, app, study)?;
        }
        Ok(())
    }

    fn choose_study<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
        study: Study,
    ) -> miette::Result<()> {
        app.select_study(Some(study));
        app.select_artifact(None, &TuiProgress {
            state: self.state.clone(),
        });
        self.card = self.run_op(ProgressSinkKind::Browse, terminal, app, |app, sink| {
            app.study_card(sink)
        })?;
        self.filter.path = None;
        self.load_artifacts(terminal, app)
    }

    fn load_artifacts<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<()> {
        let filter = self.filter.clone();
        if let Some(artifacts) =
            self.run_op(ProgressSinkKind::Browse, terminal, app, move |app, sink| {
                app.artifacts(&filter, sink)
            })?
        {
            self.listings.artifacts = artifacts;
            self.listings.reset(Pane::Artifacts);
        }
        Ok(())
    }

    fn choose_artifact<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
        artifact: Artifact,
    ) -> miette::Result<()> {
        if artifact.is_folder() {
            self.filter.path = Some(artifact.key.clone());
            return self.load_artifacts(terminal, app);
        }
        self.run_op(ProgressSinkKind::Download, terminal, app, move |app, sink| {
            Ok(app.select_artifact(Some(artifact), sink))
        })?;
        Ok(())
    }

    fn clear_study<A: CloudApi>(&mut self, app: &mut App<A>) {
        app.select_study(None);
        app.select_artifact(None, &TuiProgress {
            state: self.state.clone(),
        });
        self.card = None;
        self.listings.studies.clear();
        self.listings.artifacts.clear();
        self.listings.reset(Pane::Studies);
        self.listings.reset(Pane::Artifacts);
        self.sync_session(app);
    }

    fn activate<A: CloudApi>(
        &mut self,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<()> {
        let index = self.listings.cursor(self.focus);
        match self.focus {
            Pane::Accounts => {
                if let Some(account) = self.listings.accounts.get(index).cloned() {
                    self.choose_account(terminal, app, account)?;
                }
            }
            Pane::Projects => {
                if let Some(project) = self.listings.projects.get(index).cloned() {
                    self.choose_project(terminal, app, project)?;
                }
            }
            Pane::Studies => {
                if let Some(study) = self.listings.studies.get(index).cloned() {
                    self.choose_study(terminal, app, study)?;
                }
            }
            Pane::Artifacts => {
                if let Some(artifact) = self.listings.artifacts.get(index).cloned() {
                    self.choose_artifact(terminal, app, artifact)?;
                }
            }
            Pane::Recipes => {
                if let Some(recipe) = self.listings.recipes.get(index).cloned() {
                    self.log(format!("recipe {} selected", recipe.label()));
                    app.select_recipe(Some(recipe));
                    self.sync_session(app);
                }
            }
        }
        Ok(())
    }

    fn execute<A: CloudApi>(
        &mut self,
        command: TuiCommand,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<()> {
        match command {
            TuiCommand::Submit { name, inputs } => {
                let submitted =
                    self.run_op(ProgressSinkKind::Submit, terminal, app, move |app, sink| {
                        app.submit_recipe(&name, None, &inputs, sink)
                    })?;
                if let Some(result) = submitted {
                    self.log(format!("study {} submitted: {}", result.study_id, result.link));
                    self.set_view(View::ViewStudy);
                    self.focus = Pane::Studies;
                    self.load_studies(terminal, app)?;
                }
            }
            TuiCommand::Filter(pattern) => {
                match ArtifactFilter::new(self.filter.path.clone(), pattern.as_deref()) {
                    Ok(filter) => {
                        self.filter = filter;
                        self.load_artifacts(terminal, app)?;
                    }
                    Err(err) => self.set_error(Some(err.to_string())),
                }
            }
            TuiCommand::Path(path) => {
                self.filter.path = path;
                self.load_artifacts(terminal, app)?;
            }
            TuiCommand::Export(dir) => {
                let dir = dir
                    .map(Utf8PathBuf::from)
                    .unwrap_or_else(|| self.export_dir.clone());
                match app.export_preview(&dir) {
                    Ok(path) => self.log(format!("preview exported to {path}")),
                    Err(err) => self.set_error(Some(err.to_string())),
                }
            }
            TuiCommand::Refresh => self.load_accounts(terminal, app)?,
        }
        Ok(())
    }

    fn handle_key<A: CloudApi>(
        &mut self,
        key: KeyEvent,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<bool> {
        if key.kind != KeyEventKind::Press {
            return Ok(false);
        }
        if self.typing {
            return self.handle_typing(key, terminal, app).map(|_| false);
        }

        match key.code {
            KeyCode::F(1) | KeyCode::Char('?') => self.set_view(View::Help),
            KeyCode::F(2) => {
                self.set_view(View::ViewStudy);
                if self.focus == Pane::Recipes {
                    self.focus = Pane::Accounts;
                }
            }
            KeyCode::F(3) => {
                self.set_view(View::NewStudy);
                self.focus = Pane::Recipes;
            }
            KeyCode::F(4) => self.set_view(View::Logs),
            KeyCode::Char('q') | KeyCode::Esc => {
                if self.view() == View::ViewStudy || self.view() == View::NewStudy {
                    return Ok(true);
                }
                self.set_view(View::ViewStudy);
            }
            KeyCode::Char(':') => {
                self.typing = true;
                self.input.clear();
            }
            KeyCode::Tab | KeyCode::Right => self.focus = self.focus.next(),
            KeyCode::BackTab | KeyCode::Left => self.focus = self.focus.previous(),
            KeyCode::Up => self.listings.move_cursor(self.focus, -1),
            KeyCode::Down => self.listings.move_cursor(self.focus, 1),
            KeyCode::PageUp => self.scroll_logs(-5),
            KeyCode::PageDown => self.scroll_logs(5),
            KeyCode::Enter => self.activate(terminal, app)?,
            KeyCode::Backspace => {
                if let Some(path) = self.filter.path.take() {
                    self.filter.path = parent_key(&path);
                    self.load_artifacts(terminal, app)?;
                }
            }
            KeyCode::Char('c') => {
                app.select_artifact(None, &TuiProgress {
                    state: self.state.clone(),
                });
                self.sync_session(app);
            }
            KeyCode::Char('d') | KeyCode::Char('x') => {
                let extract = key.code == KeyCode::Char('x');
                match app.save_download(extract) {
                    Ok(saved) => self.log(format!("saved {} ({} bytes)", saved.path, saved.bytes)),
                    Err(err) => self.set_error(Some(err.to_string())),
                }
            }
            KeyCode::Char('p') => self.execute(TuiCommand::Export(None), terminal, app)?,
            KeyCode::Char('r') => self.execute(TuiCommand::Refresh, terminal, app)?,
            _ => {}
        }
        Ok(false)
    }

    fn handle_typing<A: CloudApi>(
        &mut self,
        key: KeyEvent,
        terminal: &mut Terminal<Backend>,
        app: &mut App<A>,
    ) -> miette::Result<()> {
        match key.code {
            KeyCode::Esc => {
                self.typing = false;
                self.input.clear();
            }
            KeyCode::Enter => {
                self.typing = false;
                if let Some(command) = self.take_command() {
                    match parse_command(&command) {
                        Ok(command) => self.execute(command, terminal, app)?,
                        Err(err) => self.set_error(Some(err.to_string())),
                    }
                }
            }
            KeyCode::Up => self.history_up(),
            KeyCode::Down => self.history_down(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(ch) => self.input.push(ch),
            _ => {}
        }
        Ok(())
    }

    fn take_command(&mut self) -> Option<String> {
        let current = self.input.trim().to_string();
        if current.is_empty() {
            return None;
        }
        self.history.push(current.clone());
        self.history_index = None;
        self.input.clear();
        Some(current)
    }

    fn history_up(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let next = match self.history_index {
            Some(index) if index > 0 => index - 1,
            Some(_) => 0,
            None => self.history.len().saturating_sub(1),
        };
        self.history_index = Some(next);
        if let Some(value) = self.history.get(next).cloned() {
            self.input = value;
        }
    }

    fn history_down(&mut self) {
        match self.history_index {
            Some(index) if index + 1 < self.history.len() => {
                self.history_index = Some(index + 1);
                if let Some(value) = self.history.get(index + 1).cloned() {
                    self.input = value;
                }
            }
            _ => {
                self.history_index = None;
                self.input.clear();
            }
        }
    }

    fn sync_session<A: CloudApi>(&mut self, app: &App<A>) {
        let state = app.state();
        let action = state.download_action();
        self.session = Some(SessionView {
            summary: state.summary(),
            outcome: state.retrieval.clone(),
            download_name: action.file_name,
            download_disabled: action.disabled,
            link: app.study_link(),
        });
    }

    fn draw(&self, terminal: &mut Terminal<Backend>, tick: usize) -> miette::Result<()> {
        if let Ok(state) = self.state.lock() {
            terminal
                .draw(|frame| draw_ui(frame, self, &state, tick))
                .into_diagnostic()?;
        }
        Ok(())
    }

    fn view(&self) -> View {
        self.state
            .lock()
            .map(|state| state.view)
            .unwrap_or(View::ViewStudy)
    }

    fn set_view(&self, view: View) {
        if let Ok(mut state) = self.state.lock() {
            state.view = view;
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
                state.phase = Phase::Resolve;
            }
        }
    }

    fn set_error(&self, error: Option<String>) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(message) = &error {
                push_bounded(
                    &mut state.logs,
                    format!("[{}] error: {message}", timestamp()),
                    LOGS_MAX,
                );
            }
            state.error = error;
        }
    }

    fn log(&self, message: String) {
        if let Ok(mut state) = self.state.lock() {
            state.status = message.clone();
            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            push_bounded(
                &mut state.logs,
                format!("[{}] {message}", timestamp()),
                LOGS_MAX,
            );
        }
    }

    fn refresh_metrics(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.last_hint_update.elapsed() >= Duration::from_secs(5) {
                state.hint_index = (state.hint_index + 1) % HINTS.len().max(1);
                state.last_hint_update = Instant::now();
            }
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        let max = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let max_scroll = max.saturating_sub(1) as i16;
        let next = (self.log_scroll as i16 + delta).clamp(0, max_scroll.max(0));
        self.log_scroll = next as u16;
    }
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    match state.view {
        View::ViewStudy => draw_view_study(frame, tui, state, tick),
        View::NewStudy => draw_new_study(frame, tui, state, tick),
        View::Logs => draw_logs(frame, tui, state, tick),
        View::Help => draw_help(frame),
    }
}

fn split_screen(area: Rect) -> Vec<Rect> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(9),
            Constraint::Length(3),
        ])
        .split(area)
        .to_vec()
}

fn draw_view_study(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    let chunks = split_screen(frame.area());
    frame.render_widget(draw_header(tui, state, tick), chunks[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(30),
        ])
        .split(chunks[1]);

    let listings = &tui.listings;
    let accounts = listings.accounts.iter().map(Account::label).collect::<Vec<_>>();
    let projects = listings
        .projects
        .iter()
        .map(|project| project.name.clone())
        .collect::<Vec<_>>();
    let studies = listings.studies.iter().map(Study::label).collect::<Vec<_>>();
    let artifacts = listings
        .artifacts
        .iter()
        .map(|artifact| {
            if artifact.is_folder() {
                format!("{}/", artifact.file_name)
            } else {
                artifact.file_name.clone()
            }
        })
        .collect::<Vec<_>>();
    let artifacts_title = match &tui.filter.path {
        Some(path) => format!("Artifacts: {path}"),
        None => "Artifacts".to_string(),
    };

    draw_list(frame, tui, Pane::Accounts, "Accounts", &accounts, columns[0]);
    draw_list(frame, tui, Pane::Projects, "Projects", &projects, columns[1]);
    draw_list(frame, tui, Pane::Studies, "Studies", &studies, columns[2]);
    draw_list(frame, tui, Pane::Artifacts, &artifacts_title, &artifacts, columns[3]);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(42),
            Constraint::Percentage(28),
        ])
        .split(chunks[2]);
    frame.render_widget(draw_study_card(tui.card.as_ref()), bottom[0]);
    frame.render_widget(draw_session_panel(tui), bottom[1]);
    frame.render_widget(draw_status_panel(state), bottom[2]);

    draw_command_line(frame, tui, state, chunks[3]);
}

fn draw_new_study(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    let chunks = split_screen(frame.area());
    frame.render_widget(draw_header(tui, state, tick), chunks[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[1]);

    let recipes = tui
        .listings
        .recipes
        .iter()
        .map(RecipeRef::label)
        .collect::<Vec<_>>();
    draw_list(frame, tui, Pane::Recipes, "Recipes", &recipes, columns[0]);

    let selected = tui
        .session
        .as_ref()
        .and_then(|session| session.summary.recipe.clone());
    let recipe = tui
        .listings
        .recipes
        .iter()
        .find(|recipe| Some(recipe.label()) == selected);
    let mut lines = vec![Line::from(Span::styled(
        "RECIPE INPUTS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    match recipe {
        Some(recipe) => {
            lines.push(Line::from(vec![
                Span::styled("Recipe: ", Style::default().fg(Color::Gray)),
                Span::raw(recipe.label()),
            ]));
            for input in recipe_inputs(recipe) {
                lines.push(Line::from(format!("- {input}")));
            }
        }
        None => lines.push(Line::from("select a recipe with Enter")),
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        ":submit <name> key=value ...",
        Style::default().fg(Color::DarkGray),
    )));
    if let Some(new_study) = tui
        .session
        .as_ref()
        .and_then(|session| session.summary.new_study.clone())
    {
        lines.push(Line::from(vec![
            Span::styled("Last submitted: ", Style::default().fg(Color::Gray)),
            Span::styled(new_study, Style::default().fg(Color::Green)),
        ]));
    }
    let inputs = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("New Study"))
        .wrap(Wrap { trim: true });
    frame.render_widget(inputs, columns[1]);

    frame.render_widget(draw_status_panel(state), chunks[2]);
    draw_command_line(frame, tui, state, chunks[3]);
}

fn draw_logs(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui, state, tick), chunks[0]);

    let total = state.logs.len();
    let visible = chunks[1].height.saturating_sub(1) as usize;
    let start = total.saturating_sub(tui.log_scroll as usize + visible);
    let mut lines = vec![Line::from(Span::styled(
        "LOGS (PgUp/PgDown to scroll)",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for line in state.logs.iter().skip(start).take(visible) {
        lines.push(Line::from(line.clone()));
    }
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), chunks[1]);

    draw_command_line(frame, tui, state, chunks[2]);
}

fn draw_help(frame: &mut ratatui::Frame) {
    let block = Block::default().borders(Borders::ALL).title("Help");
    let lines = vec![
        Line::from("F1 Help  F2 View Study  F3 New Study  F4 Logs  q quit"),
        Line::from("Tab/Left/Right change pane   Up/Down move   Enter select"),
        Line::from("Artifacts: Enter fetch (folders open)   Backspace up   c clear"),
        Line::from("d save download   x save and unzip   p export preview"),
        Line::from(":submit <name> k=v ...   :filter <regex>   :path <prefix>"),
        Line::from(":export [dir]   :refresh"),
    ];
    let view = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    frame.render_widget(view, frame.area());
}

fn draw_list(
    frame: &mut ratatui::Frame,
    tui: &Tui,
    pane: Pane,
    title: &str,
    items: &[String],
    area: Rect,
) {
    let focused = tui.focus == pane;
    let border = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let list_items = if items.is_empty() {
        vec![ListItem::new(Span::styled(
            "(empty)",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        items
            .iter()
            .map(|item| ListItem::new(item.clone()))
            .collect()
    };
    let list = List::new(list_items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(title.to_string()),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(if focused { Color::Cyan } else { Color::Gray }),
        )
        .highlight_symbol("> ");
    let selected = (!items.is_empty()).then(|| tui.listings.cursor(pane));
    let mut list_state = ListState::default().with_selected(selected);
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn op_label(kind: ProgressSinkKind) -> &'static str {
    match kind {
        ProgressSinkKind::Browse => "Browse",
        ProgressSinkKind::Download => "Download",
        ProgressSinkKind::Submit => "Submit",
    }
}

fn draw_header(tui: &Tui, state: &AppState, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let label = op_label(tui.kind);
    let summary = tui.session.as_ref().map(|session| &session.summary);
    let field = |value: Option<&String>| value.cloned().unwrap_or_else(|| "-".to_string());
    let header_line = Line::from(vec![
        Span::styled(
            "PSTUDY",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let path_line = Line::from(vec![
        Span::styled("owner ", Style::default().fg(Color::Gray)),
        Span::raw(field(summary.and_then(|s| s.owner.as_ref()))),
        Span::styled("  project ", Style::default().fg(Color::Gray)),
        Span::raw(field(summary.and_then(|s| s.project.as_ref()))),
        Span::styled("  study ", Style::default().fg(Color::Gray)),
        Span::raw(field(summary.and_then(|s| s.study.as_ref()))),
        Span::styled("  recipe ", Style::default().fg(Color::Gray)),
        Span::raw(field(summary.and_then(|s| s.recipe.as_ref()))),
    ]);
    Paragraph::new(vec![header_line, path_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn status_color(status: &str) -> Color {
    match status.to_ascii_lowercase().as_str() {
        "completed" | "succeeded" => Color::Green,
        "failed" | "cancelled" => Color::Red,
        "unknown" => Color::DarkGray,
        _ => Color::Yellow,
    }
}

fn draw_study_card(card: Option<&StudyCard>) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "STUDY",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    let Some(card) = card else {
        lines.push(Line::from(Span::styled(
            "no study selected",
            Style::default().fg(Color::DarkGray),
        )));
        return Paragraph::new(lines).block(Block::default().borders(Borders::TOP | Borders::RIGHT));
    };
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    lines.push(Line::from(vec![
        Span::raw(card.name.clone().unwrap_or_else(|| card.id.clone())),
        Span::raw(" "),
        Span::styled(
            format!("[{}]", card.status),
            Style::default().fg(status_color(&card.status)),
        ),
    ]));
    for (label, value) in [
        ("Author: ", &card.author),
        ("Started: ", &card.started_at),
        ("Finished: ", &card.finished_at),
    ] {
        lines.push(Line::from(vec![
            Span::styled(label, Style::default().fg(Color::Gray)),
            Span::raw(field(value)),
        ]));
    }
    lines.push(Line::from(Span::styled(
        format!("Runs ({})", card.runs.len()),
        Style::default().fg(Color::Gray),
    )));
    for run in &card.runs {
        lines.push(Line::from(vec![
            Span::raw(format!("  {} ", truncate(&run.id, 12))),
            Span::styled(
                run.status_text().to_string(),
                Style::default().fg(status_color(run.status_text())),
            ),
        ]));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP | Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_session_panel(tui: &Tui) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "ARTIFACT",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    let Some(session) = &tui.session else {
        return Paragraph::new(lines);
    };
    let summary = &session.summary;
    lines.push(Line::from(vec![
        Span::styled("Key: ", Style::default().fg(Color::Gray)),
        Span::raw(summary.artifact.clone().unwrap_or_else(|| "n/a".to_string())),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Signed URL: ", Style::default().fg(Color::Gray)),
        Span::raw(
            summary
                .signed_url
                .as_deref()
                .map(|url| truncate(url, 60))
                .unwrap_or_else(|| "n/a".to_string()),
        ),
    ]));
    let (outcome_text, outcome_color) = match &session.outcome {
        Some(outcome) if outcome.is_failure() => (outcome.describe(), Color::Red),
        Some(outcome @ RetrievalOutcome::Preview { .. }) => (outcome.describe(), Color::Green),
        Some(outcome) => (outcome.describe(), Color::Yellow),
        None => ("n/a".to_string(), Color::Gray),
    };
    lines.push(Line::from(vec![
        Span::styled("Result: ", Style::default().fg(Color::Gray)),
        Span::styled(outcome_text, Style::default().fg(outcome_color)),
    ]));
    let download_style = if session.download_disabled {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::White)
    };
    lines.push(Line::from(vec![
        Span::styled("[d] Download ", download_style),
        Span::styled(session.download_name.clone(), download_style),
        Span::styled(
            format!("  ({} bytes)", summary.response_bytes),
            Style::default().fg(Color::Gray),
        ),
    ]));
    if summary.preview {
        lines.push(Line::from(Span::styled(
            "[p] vtkjs preview ready: export for the viewer",
            Style::default().fg(Color::Green),
        )));
    }
    lines.push(Line::from(vec![
        Span::styled("Study: ", Style::default().fg(Color::Gray)),
        Span::styled(session.link.clone(), Style::default().fg(Color::Blue)),
    ]));
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP | Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let latency = state
        .latency_ms
        .map(|v| format!("{v} ms"))
        .unwrap_or_else(|| "--".to_string());
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(state.phase.label(), Style::default().fg(phase_color)),
            Span::styled("   Requests: ", Style::default().fg(Color::Gray)),
            Span::raw(state.requests.to_string()),
            Span::styled("   Latency: ", Style::default().fg(Color::Gray)),
            Span::raw(latency),
            Span::styled("   Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", state.started.elapsed().as_secs())),
        ]),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
    ];
    if let Some(error) = &state.error {
        lines.push(Line::from(Span::styled(
            format!("Error: {error}"),
            Style::default().fg(Color::Red),
        )));
    }
    for event in state.events.iter().rev().take(3) {
        lines.push(Line::from(format!("- {event}")));
    }
    lines.push(Line::from(vec![
        Span::styled("Hint: ", Style::default().fg(Color::Gray)),
        Span::styled(HINTS[state.hint_index], Style::default().fg(Color::DarkGray)),
    ]));
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP))
        .wrap(Wrap { trim: true })
}

fn draw_command_line(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, area: Rect) {
    let prefix = if tui.typing { ": " } else { "  " };
    let preview = if tui.typing {
        match parse_command(&tui.input) {
            Ok(command) => format!("{command:?}"),
            Err(_) => "submit | filter | path | export | refresh".to_string(),
        }
    } else if state.active {
        "working...".to_string()
    } else {
        "ready (: for commands, ? for help)".to_string()
    };
    let lines = vec![
        Line::from(vec![
            Span::styled(
                prefix,
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(tui.input.clone(), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::styled("= ", Style::default().fg(Color::DarkGray)),
            Span::styled(truncate(&preview, 80), Style::default().fg(Color::DarkGray)),
        ]),
    ];
    let para = Paragraph::new(lines).block(Block::default().borders(Borders::TOP));
    frame.render_widget(para, area);

    if tui.typing {
        let cursor_x = area
            .x
            .saturating_add((prefix.len() + tui.input.len()) as u16)
            .min(area.x.saturating_add(area.width.saturating_sub(1)));
        frame.set_cursor_position((cursor_x, area.y.saturating_add(1)));
    }
}

fn recipe_inputs(recipe: &RecipeRef) -> Vec<String> {
    recipe
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("inputs"))
        .and_then(|inputs| inputs.as_array())
        .map(|inputs| {
            inputs
                .iter()
                .filter_map(|input| {
                    let name = input.get("name")?.as_str()?;
                    let required = input
                        .get("required")
                        .and_then(|value| value.as_bool())
                        .unwrap_or(false);
                    Some(match input.get("default") {
                        Some(default) => format!("{name} (default {default})"),
                        None if required => format!("{name} (required)"),
                        None => name.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parent_key(key: &str) -> Option<String> {
    let trimmed = key.trim_end_matches('/');
    trimmed
        .rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .filter(|parent| !parent.is_empty())
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out = value.chars().take(max.saturating_sub(3)).collect::<String>();
    out.push_str("...");
    out
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let (phase, rest) = message.strip_prefix("phase=")?.split_once(';')?;
    let phase = match phase {
        "Resolve" => Phase::Resolve,
        "Prepare" => Phase::Prepare,
        "Fetch" => Phase::Fetch,
        "Store" => Phase::Store,
        _ => return None,
    };
    Some((phase, rest.trim()))
}

fn parse_latency(message: &str) -> Option<u128> {
    message
        .split("latency_ms=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u128>().ok())
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
