use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pollination_study_browser::api::PollinationHttpClient;
use pollination_study_browser::app::{
    App, AppSettings, ArtifactFilter, DownloadResult, ProgressSinkKind,
};
use pollination_study_browser::config::{ConfigLoader, ResolvedConfig};
use pollination_study_browser::domain::{Account, Artifact, Project, RecipeInput, Study};
use pollination_study_browser::error::StudyError;
use pollination_study_browser::output::{JsonOutput, OutputMode};
use pollination_study_browser::recipe::{load_default_recipe, load_recipe_file};
use pollination_study_browser::retrieval::RetrievalOutcome;
use pollination_study_browser::store::Store;
use pollination_study_browser::tui::Tui;

#[derive(Parser)]
#[command(name = "pstudy")]
#[command(about = "Browse Pollination Cloud studies, submit recipes and download artifacts")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the signed-in user and their organizations")]
    Accounts,
    #[command(about = "List projects of an account")]
    Projects(ProjectsArgs),
    #[command(about = "List studies of a project")]
    Studies(ProjectArgs),
    #[command(about = "Show a study's status, author and runs")]
    Study(StudyArgs),
    #[command(about = "List artifacts of a study")]
    Artifacts(ArtifactsArgs),
    #[command(about = "Download one artifact of a study")]
    Download(DownloadArgs),
    #[command(about = "Submit a recipe run as a new study")]
    Submit(SubmitArgs),
}

#[derive(Args)]
struct ProjectsArgs {
    /// Defaults to the configured default account.
    #[arg(long)]
    owner: Option<String>,
}

#[derive(Args, Clone)]
struct ProjectArgs {
    #[arg(long)]
    owner: String,

    #[arg(long)]
    project: String,
}

#[derive(Args, Clone)]
struct StudyArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[arg(long)]
    study: String,
}

#[derive(Args)]
struct ArtifactsArgs {
    #[command(flatten)]
    study: StudyArgs,

    /// Folder key to list instead of the study root.
    #[arg(long)]
    path: Option<String>,

    /// Regular expression applied to file names.
    #[arg(long = "match")]
    file_match: Option<String>,
}

#[derive(Args)]
struct DownloadArgs {
    #[command(flatten)]
    study: StudyArgs,

    #[arg(long)]
    key: String,

    #[arg(long)]
    out: Option<String>,

    #[arg(long)]
    extract: bool,
}

#[derive(Args)]
struct SubmitArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Recipe definition file; defaults to the configured recipe file.
    #[arg(long)]
    recipe: Option<String>,

    #[arg(long)]
    name: String,

    #[arg(long)]
    description: Option<String>,

    #[arg(long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<RecipeInput>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<StudyError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &StudyError) -> u8 {
    match error {
        StudyError::MissingSelection(_)
        | StudyError::MissingApiKey
        | StudyError::NothingToDownload => 2,
        StudyError::ApiStatus { status: 404, .. } => 2,
        StudyError::ApiHttp(_)
        | StudyError::ApiStatus { .. }
        | StudyError::RetrievalFailed { .. }
        | StudyError::UnexpectedPayload(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Some(command) => run_command(command, &resolved, output_mode),
        None => match output_mode {
            OutputMode::Interactive => run_browser(&resolved),
            OutputMode::NonInteractive => Err(miette::Report::msg(
                "command required (try `pstudy --help`)",
            )),
        },
    }
}

fn build_app(resolved: &ResolvedConfig, out: Option<&str>) -> miette::Result<App<PollinationHttpClient>> {
    let api_key = resolved.require_api_key()?;
    let api = PollinationHttpClient::new(&resolved.host, Some(api_key), resolved.timeout)?;
    let root = out
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| resolved.download_dir.clone());
    let settings = AppSettings {
        per_page: resolved.per_page,
        default_account: resolved.default_account.clone(),
        default_project_id: resolved.default_project_id.clone(),
    };
    let default_recipe = load_default_recipe(&resolved.recipe_file);
    Ok(App::new(api, Store::new(root), settings, default_recipe))
}

fn run_browser(resolved: &ResolvedConfig) -> miette::Result<()> {
    let mut app = build_app(resolved, None)?;
    let mut tui = Tui::new(
        ProgressSinkKind::Browse,
        ArtifactFilter::default(),
        resolved.download_dir.clone(),
    );
    tui.browse(&mut app)?;
    print_summary(&app.state().summary(), &app.study_link(), app.store().root());
    Ok(())
}

fn run_command(
    command: Commands,
    resolved: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        Commands::Accounts => {
            let app = build_app(resolved, None)?;
            let accounts = app.accounts(&JsonOutput)?;
            emit(output_mode, &accounts, |account| account.label())
        }
        Commands::Projects(args) => {
            let mut app = build_app(resolved, None)?;
            let owner = args
                .owner
                .unwrap_or_else(|| resolved.default_account.clone());
            app.select_account(Some(Account::organization(owner)));
            let projects = app.projects(&JsonOutput)?;
            emit(output_mode, &projects, |project| project.name.clone())
        }
        Commands::Studies(args) => {
            let mut app = build_app(resolved, None)?;
            select_project(&mut app, &args);
            let studies = app.studies(&JsonOutput)?;
            emit(output_mode, &studies, Study::label)
        }
        Commands::Study(args) => {
            let mut app = build_app(resolved, None)?;
            select_study(&mut app, &args);
            let card = app.study_card(&JsonOutput)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_study_card(&card).into_diagnostic(),
                OutputMode::Interactive => {
                    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
                    println!("{} [{}]", card.name.as_deref().unwrap_or(&card.id), card.status);
                    println!("  author:   {}", field(&card.author));
                    println!("  started:  {}", field(&card.started_at));
                    println!("  finished: {}", field(&card.finished_at));
                    for run in &card.runs {
                        println!("  run {} [{}]", run.id, run.status_text());
                    }
                    println!("  {}", card.link);
                    Ok(())
                }
            }
        }
        Commands::Artifacts(args) => {
            let mut app = build_app(resolved, None)?;
            select_study(&mut app, &args.study);
            let filter = ArtifactFilter::new(args.path, args.file_match.as_deref())?;
            let artifacts = app.artifacts(&filter, &JsonOutput)?;
            emit(output_mode, &artifacts, |artifact| {
                if artifact.is_folder() {
                    format!("{}/", artifact.key)
                } else {
                    artifact.key.clone()
                }
            })
        }
        Commands::Download(args) => run_download(args, resolved, output_mode),
        Commands::Submit(args) => {
            let mut app = build_app(resolved, None)?;
            select_project(&mut app, &args.project);
            if let Some(path) = &args.recipe {
                let recipe = load_recipe_file(&Utf8PathBuf::from(path))?;
                app.select_recipe(Some(recipe));
            }
            let result = app.submit_recipe(
                &args.name,
                args.description.as_deref(),
                &args.inputs,
                &JsonOutput,
            )?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_submit(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    println!("study {} submitted ({})", result.study_id, result.recipe);
                    println!("{}", result.link);
                    Ok(())
                }
            }
        }
    }
}

fn run_download(
    args: DownloadArgs,
    resolved: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let mut app = build_app(resolved, args.out.as_deref())?;
    select_study(&mut app, &args.study);

    let file_name = args
        .key
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(args.key.as_str())
        .to_string();
    let artifact = Artifact::new(args.key.clone(), file_name.clone());
    let outcome = app.select_artifact(Some(artifact), &JsonOutput);
    if let RetrievalOutcome::Failed { reason } = &outcome {
        return Err(StudyError::from(reason.clone()).into());
    }
    let saved = app.save_download(args.extract)?;

    let result = DownloadResult {
        key: args.key,
        file_name,
        signed_url: app.state().signed_url.clone(),
        outcome,
        saved: Some(saved),
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_download(&result).into_diagnostic(),
        OutputMode::Interactive => {
            if let Some(saved) = &result.saved {
                println!("saved {} ({} bytes)", saved.path, saved.bytes);
                if let Some(dir) = &saved.extracted_to {
                    println!("extracted to {dir}");
                }
            }
            println!("{}", result.outcome.describe());
            Ok(())
        }
    }
}

fn select_project(app: &mut App<PollinationHttpClient>, args: &ProjectArgs) {
    app.select_account(Some(Account::organization(args.owner.clone())));
    app.select_project(Some(Project::named(args.project.clone())));
}

fn select_study(app: &mut App<PollinationHttpClient>, args: &StudyArgs) {
    select_project(app, &args.project);
    app.select_study(Some(Study::with_id(args.study.clone())));
}

fn emit<T: Serialize>(
    output_mode: OutputMode,
    items: &[T],
    label: impl Fn(&T) -> String,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_list(items).into_diagnostic(),
        OutputMode::Interactive => {
            for item in items {
                println!("{}", label(item));
            }
            Ok(())
        }
    }
}

fn print_summary(
    summary: &pollination_study_browser::state::SessionSummary,
    link: &str,
    download_root: &camino::Utf8Path,
) {
    let cyan = "\x1b[36m";
    let green = "\x1b[32m";
    let reset = "\x1b[0m";

    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    println!("{cyan}pstudy session{reset}");
    println!("  account: {}", field(&summary.owner));
    println!("  project: {}", field(&summary.project));
    println!("  study:   {}", field(&summary.study));
    if let Some(artifact) = &summary.artifact {
        println!("{green}  artifact: {artifact} ({} bytes){reset}", summary.response_bytes);
    }
    println!("  downloads: {download_root}");
    println!("  {link}");
}
