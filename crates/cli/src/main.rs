use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use generators::{
    BackendConfig, HttpFetcher, MockConfig, MockFetcher, MockInvoker, MockPlanner, OpenAiPlanner,
    ReplicateInvoker,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storyboard::{
    cancel_pair, formats, plan_story, ArtifactFetcher, BatchOrchestrator, BatchReport,
    CancelSignal, FormatRegistry, GenerationInvoker, Outcome, PipelineRunner, ProjectStore, Stage,
    Story, StoryboardDocument, StoryboardError, StoryboardPlanner,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reelgen")]
#[command(about = "Reelgen - turn a one-line concept into a narrated short-form video storyboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Backend configuration JSON (environment variables still apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use offline mock backends instead of OpenAI and Replicate
    #[arg(long, global = true)]
    mock: bool,

    /// Extra story formats (JSON array of {id, name, prompt})
    #[arg(long, global = true)]
    formats_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available story formats
    Formats,

    /// Generate and validate a storyboard without producing media
    Plan {
        /// Video concept (prompted for when omitted)
        #[arg(short, long)]
        concept: Option<String>,

        /// Story format id
        #[arg(short, long)]
        format: Option<String>,

        /// Write the storyboard JSON here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Plan a storyboard (or load one) and generate its media
    Generate {
        /// Video concept (prompted for when omitted)
        #[arg(short, long)]
        concept: Option<String>,

        /// Story format id
        #[arg(short, long)]
        format: Option<String>,

        /// Start from a saved storyboard.json instead of planning
        #[arg(long, conflicts_with = "concept")]
        storyboard: Option<PathBuf>,

        /// Base directory for saved projects
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Stages to run, in order
        #[arg(long, value_delimiter = ',', default_value = "image,video,sound")]
        stages: Vec<Stage>,

        #[arg(long, value_enum, default_value_t = Mode::Staged)]
        mode: Mode,

        /// Run the stages for this scene only (1-based)
        #[arg(long)]
        scene: Option<usize>,

        /// Discard existing artifacts for the selected stages first (requires --scene)
        #[arg(long, requires = "scene")]
        regenerate: bool,

        /// Maximum concurrent generation calls
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Skip saving the project
        #[arg(long)]
        no_save: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// One batch per stage across all scenes
    Staged,
    /// Every scene runs its full pipeline independently
    Pipeline,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(cli.verbose).init();

    generators::load_dotenv();
    let config = match &cli.config {
        Some(path) => BackendConfig::load(path)?.apply_env(),
        None => BackendConfig::default().apply_env(),
    };

    let mut registry = FormatRegistry::new();
    if let Some(path) = &cli.formats_file {
        let count = registry.load_custom(path)?;
        info!("Loaded {} custom format(s) from {}", count, path.display());
    }

    match cli.command {
        Commands::Formats => formats_command(&registry),
        Commands::Plan {
            concept,
            format,
            out,
        } => plan_command(&config, &registry, cli.mock, concept, format, out).await,
        Commands::Generate {
            concept,
            format,
            storyboard,
            output_dir,
            stages,
            mode,
            scene,
            regenerate,
            max_concurrency,
            no_save,
        } => {
            let mut config = config;
            if let Some(dir) = output_dir {
                config = config.with_output_dir(dir);
            }
            if let Some(max) = max_concurrency {
                config = config.with_max_concurrency(max);
            }
            let source = match storyboard {
                Some(path) => StorySource::Saved(path),
                None => StorySource::Plan { concept, format },
            };
            let target = match scene {
                Some(n) => Target::Scene { number: n, regenerate },
                None => Target::All(mode),
            };
            generate_command(&config, &registry, cli.mock, source, stages, target, no_save).await
        }
    }
}

enum Target {
    All(Mode),
    Scene { number: usize, regenerate: bool },
}

/// Everything one `generate` run owns.
struct Session {
    story: Story,
    store: ProjectStore,
    orchestrator: BatchOrchestrator,
    signal: CancelSignal,
}

enum StorySource {
    Plan {
        concept: Option<String>,
        format: Option<String>,
    },
    Saved(PathBuf),
}

fn formats_command(registry: &FormatRegistry) -> Result<()> {
    let default_id = formats::default_format_id();
    for format in registry.all() {
        let marker = if format.id == default_id { " (default)" } else { "" };
        println!("{:<14} {}{}", format.id, format.name, marker);
    }
    Ok(())
}

async fn plan_command(
    config: &BackendConfig,
    registry: &FormatRegistry,
    mock: bool,
    concept: Option<String>,
    format: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let planner = make_planner(config, mock)?;
    let story = plan(planner.as_ref(), registry, concept, format).await?;
    let json = serde_json::to_string_pretty(&StoryboardDocument::from_story(&story))?;
    match out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Storyboard with {} scene(s) written to {}", story.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn generate_command(
    config: &BackendConfig,
    registry: &FormatRegistry,
    mock: bool,
    source: StorySource,
    mut stages: Vec<Stage>,
    target: Target,
    no_save: bool,
) -> Result<()> {
    let story = match source {
        StorySource::Saved(path) => {
            let story = ProjectStore::load_storyboard(&path).await?;
            info!("Loaded {} scene(s) from {}", story.len(), path.display());
            story
        }
        StorySource::Plan { concept, format } => {
            let planner = make_planner(config, mock)?;
            plan(planner.as_ref(), registry, concept, format).await?
        }
    };
    print_storyboard(&story);

    let runner = PipelineRunner::new(make_invoker(config, mock)?).with_config(config.runner_config());
    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight generations");
            cancel.cancel();
        }
    });
    let mut session = Session {
        story,
        store: ProjectStore::new(&config.output_dir),
        orchestrator: BatchOrchestrator::new(runner),
        signal,
    };

    stages.sort();
    stages.dedup();
    match target {
        Target::All(Mode::Staged) => run_staged(&mut session, &stages).await,
        Target::All(Mode::Pipeline) => {
            let bar = spinner("Running full pipeline for every scene");
            let report = session
                .orchestrator
                .run_pipeline_all_with(&mut session.story, &session.signal)
                .await;
            bar.finish_and_clear();
            print_report(&session.story, &report);
        }
        Target::Scene { number, regenerate } => {
            run_single_scene(&mut session, number, &stages, regenerate).await?
        }
    }

    print_summary(&session.story);

    if no_save {
        return Ok(());
    }
    if !session.story.has_content() {
        warn!("Nothing was generated; skipping save");
        return Ok(());
    }
    let fetcher = make_fetcher(config, mock)?;
    let report = session.store.save(&session.story, fetcher.as_ref()).await?;
    println!(
        "\nSaved {} file(s) to {}",
        report.saved.len(),
        report.project_dir.display()
    );
    for err in &report.errors {
        println!("  ! {err}");
    }
    Ok(())
}

async fn run_single_scene(
    session: &mut Session,
    number: usize,
    stages: &[Stage],
    regenerate: bool,
) -> Result<()> {
    let runner = session.orchestrator.runner().clone();
    let record = number
        .checked_sub(1)
        .and_then(|index| session.story.scene_mut(index))
        .with_context(|| format!("scene {number} does not exist"))?;
    for &stage in stages {
        if session.signal.is_cancelled() {
            break;
        }
        if record.is_done(stage) && !regenerate {
            println!("  scene {number} {stage:<5} already done");
            continue;
        }
        let bar = spinner(&format!("Generating {stage} for scene {number}"));
        let result = if regenerate {
            session.signal.guard(runner.regenerate(record, stage)).await
        } else {
            session.signal.guard(runner.run_stage(record, stage)).await
        };
        bar.finish_and_clear();
        match result {
            Ok(reference) => println!("  scene {number} {stage:<5} ok -> {reference}"),
            Err(err) => {
                println!("  scene {number} {stage:<5} FAIL: {err}");
                break;
            }
        }
    }
    Ok(())
}

async fn run_staged(session: &mut Session, stages: &[Stage]) {
    for &stage in stages {
        if session.signal.is_cancelled() {
            break;
        }
        let bar = spinner(&format!(
            "Generating {stage} for {} scene(s)",
            session.story.len()
        ));
        let result = session
            .orchestrator
            .run_all_with(&mut session.story, stage, &session.signal)
            .await;
        bar.finish_and_clear();
        match result {
            Ok(report) => print_report(&session.story, &report),
            Err(StoryboardError::Precondition(reason)) => {
                warn!("Stopping before {stage}: {reason}");
                break;
            }
            Err(err) => {
                warn!("{stage} batch failed: {err}");
                break;
            }
        }
    }
}

async fn plan(
    planner: &dyn StoryboardPlanner,
    registry: &FormatRegistry,
    concept: Option<String>,
    format: Option<String>,
) -> Result<Story> {
    let concept = match concept {
        Some(concept) if !concept.trim().is_empty() => concept,
        _ => prompt_concept()?,
    };
    let format_id = format.unwrap_or_else(|| formats::default_format_id().to_string());
    let format = registry.resolve(&format_id);

    let bar = spinner(&format!("Writing a {} storyboard", format.name));
    let story = plan_story(planner, concept.trim(), format).await;
    bar.finish_and_clear();
    Ok(story?)
}

fn prompt_concept() -> Result<String> {
    print!("Video concept: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let concept = line.trim().to_string();
    if concept.is_empty() {
        anyhow::bail!("A concept is required");
    }
    Ok(concept)
}

fn make_planner(config: &BackendConfig, mock: bool) -> Result<Box<dyn StoryboardPlanner>> {
    if mock {
        return Ok(Box::new(MockPlanner::new(MockConfig::default())));
    }
    Ok(Box::new(OpenAiPlanner::from_backend(config)?))
}

fn make_invoker(config: &BackendConfig, mock: bool) -> Result<Arc<dyn GenerationInvoker>> {
    if mock {
        return Ok(Arc::new(MockInvoker::new(MockConfig::default())));
    }
    Ok(Arc::new(ReplicateInvoker::new(config)?))
}

fn make_fetcher(config: &BackendConfig, mock: bool) -> Result<Box<dyn ArtifactFetcher>> {
    if mock {
        return Ok(Box::new(MockFetcher));
    }
    Ok(Box::new(HttpFetcher::new(config)?))
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_storyboard(story: &Story) {
    println!(
        "\nStoryboard \"{}\" ({} scenes, format {})",
        story.concept(),
        story.len(),
        story.format_id()
    );
    for (i, record) in story.scenes().iter().enumerate() {
        println!("  {}. {}", i + 1, record.script_text());
    }
}

fn print_report(story: &Story, report: &BatchReport) {
    let label = report.stage.map(|s| s.as_str()).unwrap_or("pipeline");
    println!(
        "\n{label}: {} succeeded, {} skipped, {} failed",
        report.succeeded(),
        report.skipped(),
        report.failed()
    );
    for outcome in &report.outcomes {
        let script = story
            .scene(outcome.index)
            .map(|r| truncate(r.script_text(), 48))
            .unwrap_or_default();
        match &outcome.outcome {
            Outcome::Succeeded(reference) => {
                println!("  scene {} ok    {} -> {}", outcome.index + 1, script, reference)
            }
            Outcome::Skipped => println!("  scene {} done  {}", outcome.index + 1, script),
            Outcome::Failed(err) => println!("  scene {} FAIL  {}: {}", outcome.index + 1, script, err),
        }
    }
}

fn print_summary(story: &Story) {
    println!("\n{}", story.stats());
    for (i, record) in story.scenes().iter().enumerate() {
        println!("  scene {}: {:?}", i + 1, record.state());
        for stage in Stage::ALL {
            if let Some(reference) = record.artifact_ref(stage) {
                println!("    {stage:<5} {reference}");
            }
            if record.prompt_drifted(stage) {
                println!("    {stage:<5} prompt edited since generation; regenerate to apply");
            }
        }
        if let Some(failure) = record.last_failure() {
            println!("    last failure ({}): {}", failure.stage, failure.message);
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
