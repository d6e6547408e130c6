//! # dw-cli
//!
//! Command-line interface for dataworks — snapshot, restore and share the
//! joint state of a data project's resources:
//! - `dw init` / `dw add <backend> <path>` — set up a workspace and track
//!   resources
//! - `dw snapshot` / `dw restore <ref>` — capture and revisit joint state
//! - `dw push` / `dw pull` / `dw clone` / `dw publish` — move the
//!   workspace and its resources between machines
//! - `dw run <cmd…>` — execute a pipeline step with lineage recording
//! - `dw status` / `dw report …` / `dw diff` — inspect state and history
//!
//! Exit codes: 0 success, 1 user error or refused precondition, 2 backend
//! or system failure, 3 data inconsistency.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use dw_engine::{restore, snapshot, sync, EngineError, Workspace};

#[derive(Parser)]
#[command(name = "dw", version, about = "Git-like version control for data projects")]
struct Cli {
    /// Never prompt; take the safe default for every question.
    #[arg(long, global = true)]
    batch: bool,

    /// Echo the plan and backend activity while executing.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a workspace in the current directory.
    Init {
        /// Workspace name (defaults to the directory name).
        name: Option<String>,
        /// Hostname recorded for this clone (defaults to the system's).
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Track a new resource.
    Add {
        #[command(subcommand)]
        backend: commands::add::AddBackend,
    },
    /// Clone a workspace and re-materialise its resources.
    Clone {
        url: String,
        /// Target directory (defaults to the repository name).
        target: Option<PathBuf>,
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Capture the joint state of every resource.
    Snapshot {
        /// Optional tag for the snapshot (unique per host).
        tag: Option<String>,
        #[arg(short, long, default_value = "")]
        message: String,
        /// Resources to leave out of this snapshot.
        #[arg(long)]
        skip: Vec<String>,
        /// Move an existing tag to this snapshot.
        #[arg(long)]
        force_tag: bool,
    },
    /// Move resources back to a prior snapshot.
    Restore {
        /// Tag or hash prefix.
        reference: String,
        /// Restore only these resources.
        #[arg(long)]
        only: Vec<String>,
        /// Leave these resources at their current state.
        #[arg(long)]
        leave: Vec<String>,
        /// Refuse instead of auto-snapshotting uncaptured work.
        #[arg(long)]
        no_new_snapshot: bool,
    },
    /// Send the catalogue and every resource to their remotes.
    Push {
        #[arg(long)]
        skip: Vec<String>,
    },
    /// Bring the catalogue and every resource up to date from remotes.
    Pull,
    /// Attach the workspace to a remote and push for the first time.
    Publish { url: String },
    /// Summarise the current state of every resource.
    Status,
    /// Reports over history, results and lineage.
    Report {
        #[command(subcommand)]
        report: commands::report::ReportCommands,
    },
    /// Run a pipeline step with lineage recording.
    Run {
        /// The command and its arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
        /// Step name (defaults to the executable name).
        #[arg(long)]
        step: Option<String>,
    },
    /// Compare two snapshots.
    Diff {
        from: String,
        to: String,
    },
    /// Remove a snapshot from history (its rotated results stay).
    DeleteSnapshot { reference: String },
    /// Read or change workspace parameters.
    Config {
        #[command(subcommand)]
        op: commands::config::ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose {
        "info,dw_engine=debug,dw_resources=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_workspace(cli_batch: bool, cli_verbose: bool) -> Result<Workspace, EngineError> {
    let cwd = std::env::current_dir().map_err(|e| EngineError::System {
        message: format!("cannot read current directory: {}", e),
    })?;
    Workspace::open(&cwd, cli_batch, cli_verbose)
}

fn dispatch(cli: Cli) -> Result<ExitCode, EngineError> {
    match cli.command {
        Commands::Init { name, hostname } => {
            let cwd = std::env::current_dir().map_err(|e| EngineError::System {
                message: format!("cannot read current directory: {}", e),
            })?;
            let name = name.unwrap_or_else(|| {
                cwd.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "workspace".to_string())
            });
            Workspace::init(&cwd, &name, hostname)?;
            println!("Initialized workspace '{}' in {}", name, cwd.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Add { backend } => {
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            let name = commands::add::run(&mut ws, backend)?;
            println!("Added resource '{}'", name);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clone {
            url,
            target,
            hostname,
        } => {
            let target = target.unwrap_or_else(|| {
                PathBuf::from(
                    url.trim_end_matches('/')
                        .rsplit('/')
                        .next()
                        .unwrap_or("workspace")
                        .trim_end_matches(".git"),
                )
            });
            let batch = cli.batch;
            let hostname = hostname.or_else(|| {
                if batch {
                    return None;
                }
                commands::prompt_line("Hostname for this clone (empty for the system's): ")
                    .filter(|line| !line.is_empty())
            });
            let root = sync::clone_workspace(&url, &target, hostname, |resource, default| {
                if batch {
                    return None;
                }
                commands::prompt_line(&format!(
                    "Local path for resource '{}' [{}]: ",
                    resource,
                    default.display()
                ))
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
            })?;
            println!("Cloned workspace into {}", root.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Snapshot {
            tag,
            message,
            skip,
            force_tag,
        } => {
            if force_tag {
                let label = tag.as_deref().unwrap_or("?");
                if !commands::confirm(
                    &format!("Move tag '{}' to the new snapshot?", label),
                    cli.batch,
                ) {
                    println!("Aborted.");
                    return Ok(ExitCode::from(1));
                }
            }
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            let report = snapshot::run(
                &mut ws,
                &snapshot::SnapshotOptions {
                    tag,
                    message,
                    skip: skip.into_iter().collect(),
                    force_tag,
                },
            )?;
            if cli.verbose {
                for (name, hash) in &report.resources {
                    println!("  {}  {}", hash, name);
                }
            }
            let label = report
                .tag
                .as_ref()
                .map(|t| format!(" ({})", t))
                .unwrap_or_default();
            if report.reused {
                println!(
                    "No changes; recorded snapshot {}{} again",
                    &report.hash[..12],
                    label
                );
            } else {
                println!("Took snapshot {}{}", &report.hash[..12], label);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Restore {
            reference,
            only,
            leave,
            no_new_snapshot,
        } => {
            if !commands::confirm(
                &format!("Restore snapshot '{}'?", reference),
                cli.batch,
            ) {
                println!("Aborted.");
                return Ok(ExitCode::from(1));
            }
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            let opts = restore::RestoreOptions {
                reference,
                only: only.into_iter().collect(),
                leave: leave.into_iter().collect(),
                no_new_snapshot,
            };
            commands::restore_cmd::run(&mut ws, &opts)
        }
        Commands::Push { skip } => {
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            let report = sync::push(
                &mut ws,
                &sync::PushOptions {
                    skip: skip.into_iter().collect(),
                },
            )?;
            println!(
                "Pushed workspace and {} resource(s)",
                report.pushed.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Pull => {
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            let report = sync::pull(&mut ws)?;
            println!(
                "Pulled workspace and {} resource(s); working lineage cleared",
                report.pulled.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Publish { url } => {
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            sync::publish(&mut ws, &url)?;
            println!("Published workspace to {}", url);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let ws = open_workspace(cli.batch, cli.verbose)?;
            commands::status::run(&ws)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Report { report } => {
            let ws = open_workspace(cli.batch, cli.verbose)?;
            commands::report::run(&ws, report)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { argv, step } => {
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            let code = commands::run_step::run(&mut ws, &argv, step)?;
            Ok(ExitCode::from(code.clamp(0, 255) as u8))
        }
        Commands::Diff { from, to } => {
            let ws = open_workspace(cli.batch, cli.verbose)?;
            commands::diff::run(&ws, &from, &to)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::DeleteSnapshot { reference } => {
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            if !commands::confirm(
                &format!("Delete snapshot '{}' from history?", reference),
                cli.batch,
            ) {
                println!("Aborted.");
                return Ok(ExitCode::from(1));
            }
            let hash = snapshot::delete(&mut ws, &reference)?;
            println!("Deleted snapshot {}", &hash[..12]);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { op } => {
            let mut ws = open_workspace(cli.batch, cli.verbose)?;
            commands::config::run(&mut ws, op)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
