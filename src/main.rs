use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use distill::backend::{GenerationBackend, HttpBackend};
use distill::config::Config;
use distill::pipeline::{PipelineEvent, PipelineRunner};
use distill::server::{ServerConfig, start_server};
use distill::session::{OwnerGate, Session};
use distill::store::{Db, DbHandle};

#[derive(Parser)]
#[command(name = "distill")]
#[command(version, about = "Compile interview transcripts into build-ready blueprints")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory holding .distill/ state
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (session API + pipeline progress stream)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind on all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
    /// Create a session from a transcript file and print its id
    Import {
        /// Path to the transcript (markdown or plain text)
        transcript: PathBuf,

        /// Session title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Owner identity recorded on the session
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Run the pipeline for a session, printing one line per event
    Run {
        session_id: String,

        /// Identity presented to the access gate
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Print a session's status and artifact summary
    Status { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let config = Config::load(&project_dir)?;

    match cli.command {
        Commands::Serve { port, dev } => {
            let server = ServerConfig {
                port: port.unwrap_or(config.server.port),
                db_path: project_dir.join(&config.server.db_path),
                dev_mode: dev,
            };
            start_server(server, &config).await
        }
        Commands::Import {
            transcript,
            title,
            owner,
        } => cmd_import(&project_dir, &config, &transcript, title, owner).await,
        Commands::Run { session_id, owner } => {
            cmd_run(&project_dir, &config, &session_id, &owner).await
        }
        Commands::Status { session_id } => cmd_status(&project_dir, &config, &session_id).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "distill=debug" } else { "distill=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_db(project_dir: &std::path::Path, config: &Config) -> Result<DbHandle> {
    let db_path = project_dir.join(&config.server.db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    Ok(DbHandle::new(Db::new(&db_path)?))
}

async fn cmd_import(
    project_dir: &std::path::Path,
    config: &Config,
    transcript: &std::path::Path,
    title: Option<String>,
    owner: String,
) -> Result<()> {
    if !transcript.exists() {
        bail!("Transcript not found: {}", transcript.display());
    }
    let content = std::fs::read_to_string(transcript)
        .with_context(|| format!("Failed to read: {}", transcript.display()))?;
    if content.trim().is_empty() {
        bail!("Transcript is empty: {}", transcript.display());
    }

    let title = title.unwrap_or_else(|| {
        transcript
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled session".to_string())
    });

    let db = open_db(project_dir, config)?;
    let session = Session::new(owner, title, content);
    let stored = session.clone();
    db.call(move |db| db.create_session(&stored)).await?;

    println!("{}", session.id);
    Ok(())
}

async fn cmd_run(
    project_dir: &std::path::Path,
    config: &Config,
    session_id: &str,
    owner: &str,
) -> Result<()> {
    let db = open_db(project_dir, config)?;
    let backend: Arc<dyn GenerationBackend> = Arc::new(HttpBackend::new(&config.backend));
    let runner = PipelineRunner::new(db, backend, Arc::new(OwnerGate));

    let mut rx = runner.start(session_id, owner).await?;
    let mut aborted = false;
    while let Some(event) = rx.recv().await {
        match &event {
            PipelineEvent::StageRunning { stage } => println!("running   {}", stage),
            PipelineEvent::StageDone { stage, artifact } => {
                let marker = if artifact.is_degraded() { " (degraded)" } else { "" };
                println!("done      {}{}", stage, marker);
            }
            PipelineEvent::StageError { message } => {
                aborted = true;
                println!("error     {}", message);
            }
            PipelineEvent::RunComplete {} => println!("complete"),
        }
    }

    if aborted {
        bail!("Pipeline run aborted");
    }
    Ok(())
}

async fn cmd_status(
    project_dir: &std::path::Path,
    config: &Config,
    session_id: &str,
) -> Result<()> {
    let db = open_db(project_dir, config)?;

    let id = session_id.to_string();
    let session = db
        .call(move |db| db.get_session(&id))
        .await?
        .with_context(|| format!("Session {} not found", session_id))?;

    let id = session_id.to_string();
    let artifacts = db.call(move |db| db.list_artifacts(&id)).await?;

    println!("Session:  {}", session.id);
    println!("Title:    {}", session.title);
    println!("Owner:    {}", session.owner);
    println!("Status:   {}", session.status);
    if artifacts.is_empty() {
        println!("Artifacts: none");
    } else {
        println!("Artifacts:");
        for artifact in &artifacts {
            let kind = if artifact.is_degraded() { "degraded" } else { "structured" };
            println!("  {:<14} {}", artifact.stage().to_string(), kind);
        }
    }
    Ok(())
}
