mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, queue::QueueSubcommand, service::ServiceSubcommand,
    vm::VmSubcommand,
};
use std::path::PathBuf;
use treeops_core::types::LifecycleAction;

#[derive(Parser)]
#[command(
    name = "treeops",
    about = "Staged lifecycle orchestration for service trees",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .treeops/)
    #[arg(long, global = true, env = "TREEOPS_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize treeops state in the current directory
    Init,

    /// Manage service nodes and their attachments
    Service {
        #[command(subcommand)]
        subcommand: ServiceSubcommand,
    },

    /// Manage the VM inventory
    Vm {
        #[command(subcommand)]
        subcommand: VmSubcommand,
    },

    /// Start every resource under a service, top level first
    Start { id: u64 },

    /// Stop every resource under a service, deepest level first
    Stop { id: u64 },

    /// Suspend every resource under a service, deepest level first
    Suspend { id: u64 },

    /// Shut down guests under a service, deepest level first
    ShutdownGuest { id: u64 },

    /// Inspect and retry queued stages
    Queue {
        #[command(subcommand)]
        subcommand: QueueSubcommand,
    },

    /// Deliver due stages until interrupted
    Work {
        /// Process what is due once and exit
        #[arg(long)]
        once: bool,
    },

    /// Show published lifecycle events
    Events {
        /// Only show the most recent N events
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Work { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Service { subcommand } => cmd::service::run(&root, subcommand, cli.json),
        Commands::Vm { subcommand } => cmd::vm::run(&root, subcommand, cli.json),
        Commands::Start { id } => cmd::lifecycle::run(&root, LifecycleAction::Start, id, cli.json),
        Commands::Stop { id } => cmd::lifecycle::run(&root, LifecycleAction::Stop, id, cli.json),
        Commands::Suspend { id } => {
            cmd::lifecycle::run(&root, LifecycleAction::Suspend, id, cli.json)
        }
        Commands::ShutdownGuest { id } => {
            cmd::lifecycle::run(&root, LifecycleAction::ShutdownGuest, id, cli.json)
        }
        Commands::Queue { subcommand } => cmd::queue::run(&root, subcommand, cli.json),
        Commands::Work { once } => cmd::work::run(&root, once, cli.json),
        Commands::Events { limit } => cmd::events::run(&root, limit, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
