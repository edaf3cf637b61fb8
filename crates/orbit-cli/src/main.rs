use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use orbit_core::{Environment, OrbitSettings, ProcessEngine, StateStore};
use orbit_env::{OrbitService, SandboxAction, SidecarAction, StateQuery, DEFAULT_AUDIT_LIMIT};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod mcp;

/// Orbit - per-project dev / test / staging environments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (default: current directory)
    #[arg(short, long, value_name = "DIR", global = true)]
    project: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show environment, sidecars, engine and isolation status
    Status,

    /// Switch the project to another environment
    Switch {
        /// Target environment (dev, test, staging)
        environment: Environment,
    },

    /// Manage sidecar services
    Sidecars {
        #[command(subcommand)]
        action: SidecarCommand,
    },

    /// Manage the project's isolated test context
    Sandbox {
        #[arg(value_enum)]
        action: SandboxCommand,
    },

    /// Stop every Orbit container
    StopAll {
        /// Skip the confirmation guard
        #[arg(short, long)]
        yes: bool,
    },

    /// Query raw state
    State {
        #[arg(value_enum)]
        query: QueryKind,

        /// Number of audit entries
        #[arg(long, default_value_t = DEFAULT_AUDIT_LIMIT)]
        limit: usize,
    },

    /// Show the effective global settings
    Settings {
        /// Write them to orbit.toml in the orbit root
        #[arg(long)]
        write: bool,
    },

    /// Start the MCP (Model Context Protocol) tool server on stdio
    Mcp,
}

#[derive(Subcommand)]
enum SidecarCommand {
    /// Available and running sidecars
    List,
    /// Start a sidecar
    Start { name: String },
    /// Stop a sidecar
    Stop { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SandboxCommand {
    Status,
    Create,
    Reset,
    Remove,
    Health,
}

impl From<SandboxCommand> for SandboxAction {
    fn from(cmd: SandboxCommand) -> Self {
        match cmd {
            SandboxCommand::Status => Self::Status,
            SandboxCommand::Create => Self::Create,
            SandboxCommand::Reset => Self::Reset,
            SandboxCommand::Remove => Self::Remove,
            SandboxCommand::Health => Self::Health,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryKind {
    Projects,
    Audit,
    Registry,
    Config,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries JSON reports and the MCP stream
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

/// Absolute form of the project directory, so state keys and context names
/// never depend on how the path was spelled
fn canonical_project(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(path)
        .with_context(|| format!("cannot resolve project directory {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let project = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let project = canonical_project(&project)?;

    let settings = OrbitSettings::load()?;
    if let Commands::Settings { write } = cli.command {
        if write {
            settings.save()?;
            eprintln!("Settings written to {}", settings.root.display());
        }
        return print_json(&settings);
    }

    let store = StateStore::open(settings.db_path())
        .with_context(|| format!("cannot open state store at {}", settings.db_path().display()))?;
    let service = OrbitService::new(Arc::new(ProcessEngine), Arc::new(store), settings);

    match cli.command {
        Commands::Status => print_json(&service.status(&project).await?)?,
        Commands::Switch { environment } => {
            print_json(&service.switch(&project, environment).await?)?
        }
        Commands::Sidecars { action } => {
            let action = match action {
                SidecarCommand::List => SidecarAction::List,
                SidecarCommand::Start { name } => SidecarAction::Start(name),
                SidecarCommand::Stop { name } => SidecarAction::Stop(name),
            };
            print_json(&service.sidecars(&project, action).await?)?
        }
        Commands::Sandbox { action } => {
            print_json(&service.sandbox(&project, action.into()).await?)?
        }
        Commands::StopAll { yes } => {
            let report = service.stop_all(yes).await?;
            if !yes {
                eprintln!("Nothing stopped: re-run with --yes to stop every Orbit container");
            }
            print_json(&report)?
        }
        Commands::State { query, limit } => {
            let query = match query {
                QueryKind::Projects => StateQuery::Projects,
                QueryKind::Audit => StateQuery::Audit {
                    project: project.display().to_string(),
                    limit,
                },
                QueryKind::Registry => StateQuery::Registry,
                QueryKind::Config => StateQuery::Config,
            };
            print_json(&service.get_state(query)?)?
        }
        Commands::Mcp => mcp::McpServer::new(service, project).run().await?,
        Commands::Settings { .. } => {}
    }

    Ok(())
}
