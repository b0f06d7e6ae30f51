mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use clusterup_core::{ClusterUpError, Fatal};
use cmd::add::AddArgs;
use cmd::up::UpArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "clusterup",
    about = "Start and manage a single-node cluster inside a container engine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding generated configuration and state (default: ./clusterup.local)
    #[arg(long, global = true, env = "CLUSTERUP_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Verbosity; also passed to client commands run in containers
    #[arg(long, global = true, default_value_t = 0)]
    loglevel: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate configuration, start the control plane, and install components
    Up(UpArgs),

    /// Install components into a running cluster
    Add(AddArgs),

    /// Stop and remove every cluster container
    Down,

    /// Show the cluster state
    Status {
        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },
}

fn log_level(loglevel: u8, default: tracing::Level) -> tracing::Level {
    match loglevel {
        0 => default,
        1 | 2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Remediation carried anywhere in the error chain.
fn solution(e: &anyhow::Error) -> Option<&str> {
    e.chain().find_map(|c| {
        c.downcast_ref::<ClusterUpError>()
            .and_then(ClusterUpError::solution)
            .or_else(|| c.downcast_ref::<Fatal>().and_then(Fatal::solution))
    })
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Up(_) | Commands::Add(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_level(cli.loglevel, default_level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let base = root::resolve_base_dir(cli.base_dir.as_deref());

    let result = match cli.command {
        Commands::Up(args) => cmd::up::run(&base, args, cli.loglevel),
        Commands::Add(args) => cmd::add::run(&base, args, cli.loglevel),
        Commands::Down => cmd::down::run(),
        Commands::Status { json } => cmd::status::run(&base, json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        if let Some(solution) = solution(&e) {
            eprintln!("\n{solution}");
        }
        std::process::exit(1);
    }
}
