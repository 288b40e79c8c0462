//! hourtab: track working time per project
//!
//! `hourtab serve` runs the daemon; every other command talks to it.

use chrono::{DateTime, Local};
use clap::Parser;
use hourtab::ipc::Client;
use hourtab::{Daemon, OriginError, Options, Project, git, persist};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "hourtab", about = "Tracks hours spent per project")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Snapshot file path
    #[arg(long = "db", visible_alias = "dbpath", global = true)]
    db_path: Option<PathBuf>,

    /// Seconds between timeout sweeps and saves
    #[arg(short, long, value_parser = parse_seconds, global = true)]
    sync_frequency: Option<Duration>,

    /// Idle sync ticks before a project stops accruing time
    #[arg(short, long, global = true)]
    timeout_after: Option<u32>,

    /// Domain socket path
    #[arg(long = "socket", global = true)]
    socket_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the daemon until interrupted
    Serve,
    /// List every tracked project
    List,
    /// Show the project owning PATH
    Status {
        /// Defaults to the current directory
        path: Option<PathBuf>,
    },
    /// Start tracking the project at PATH
    Track {
        /// Defaults to the current directory
        path: Option<PathBuf>,
    },
    /// Stop tracking the project rooted at PATH
    Untrack {
        /// Defaults to the current directory
        path: Option<PathBuf>,
    },
}

impl Cli {
    fn options(&self) -> Options {
        let mut options = Options::default();
        if let Some(path) = &self.db_path {
            options.db_path = path.clone();
        }
        if let Some(frequency) = self.sync_frequency {
            options.sync_frequency = frequency;
        }
        if let Some(ticks) = self.timeout_after {
            options.timeout_after = ticks;
        }
        if let Some(path) = &self.socket_path {
            options.socket_path = path.clone();
        }
        options
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid seconds: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds: {e}"))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("HOURTAB_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = cli.options();
    let result = match cli.command {
        Command::Serve => serve(options).await,
        Command::List => list(&options).await,
        Command::Status { path } => status(&options, resolve_path(path)).await,
        Command::Track { path } => track(&options, resolve_path(path)).await,
        Command::Untrack { path } => untrack(&options, resolve_path(path)).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hourtab: {e}");
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn serve(options: Options) -> CliResult {
    let daemon = Daemon::start(options).await?;
    info!(endpoint = %daemon.descriptor(), "Started server");

    tokio::signal::ctrl_c().await?;
    daemon.shutdown().await;
    Ok(())
}

async fn connect(options: &Options) -> Result<Client, Box<dyn std::error::Error>> {
    let read_options = options.clone();
    let descriptor =
        tokio::task::spawn_blocking(move || persist::read_descriptor(&read_options)).await??;
    if descriptor.is_empty() {
        return Err(format!(
            "no running daemon found for {} (start one with `hourtab serve`)",
            options.db_path.display()
        )
        .into());
    }

    let client = Client::connect(&descriptor).await?;
    debug!(endpoint = %client.descriptor(), "connected to daemon");
    Ok(client)
}

async fn list(options: &Options) -> CliResult {
    let mut client = connect(options).await?;
    let mut projects = client.list_projects().await?;
    projects.sort_by(|a, b| a.path.cmp(&b.path));

    if projects.is_empty() {
        println!("No projects tracked.");
    }
    for project in &projects {
        println!("{}", format_project(project));
    }
    Ok(())
}

async fn status(options: &Options, path: PathBuf) -> CliResult {
    let mut client = connect(options).await?;
    let project = client.get_project(&path).await?;
    println!("{}", format_project(&project));
    Ok(())
}

async fn track(options: &Options, path: PathBuf) -> CliResult {
    let origin = match git::origin_for_project(&path) {
        Ok(origin) => origin,
        Err(OriginError::NoOrigin) => {
            warn!(path = %path.display(), "repository has no origin remote");
            String::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not resolve origin");
            String::new()
        }
    };

    let mut client = connect(options).await?;
    client.add_project(&Project::new(&path, origin)).await?;
    println!("Tracking {}", path.display());
    Ok(())
}

async fn untrack(options: &Options, path: PathBuf) -> CliResult {
    let mut client = connect(options).await?;
    if client.remove_project(&path).await? {
        println!("Stopped tracking {}", path.display());
    } else {
        println!("{} was not tracked", path.display());
    }
    Ok(())
}

/// Absolute, symlink-free form of `path` (or the working directory).
fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    let path = path.unwrap_or_else(|| PathBuf::from("."));
    path.canonicalize()
        .or_else(|_| std::path::absolute(&path))
        .unwrap_or(path)
}

fn format_project(project: &Project) -> String {
    let origin = if project.origin.is_empty() {
        "-"
    } else {
        project.origin.as_str()
    };
    format!(
        "{}\t{}\t{}\t{}\tlast active {}",
        project.path.display(),
        origin,
        project.state,
        format_total(project.total()),
        format_tick(project.last_tick),
    )
}

fn format_total(total: Duration) -> String {
    let minutes = total.as_secs() / 60;
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}

fn format_tick(nanos: u64) -> String {
    if nanos == 0 {
        return "never".to_string();
    }
    let at = DateTime::from_timestamp_nanos(i64::try_from(nanos).unwrap_or(i64::MAX));
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
