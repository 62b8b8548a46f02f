mod cmd;
mod config_path;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use cmd::update::{FlagArgs, UpdateArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "system-update",
    about = "Patch or support-pack-migrate managed systems through the fleet management server",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./configsm.yaml, then /etc/fleet-maint/configsm.yaml)
    #[arg(long, global = true, env = "MAINT_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch or migrate a single system
    Update(UpdateArgs),

    /// Launch an independent update for every system in a group
    Group {
        /// System group name
        #[arg(long, short = 'g')]
        group: String,

        #[command(flatten)]
        flags: FlagArgs,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();
    let config_path = config_path::resolve_config(cli.config.as_deref());

    let (default_level, log_file) = match &cli.command {
        Commands::Update(args) => (
            tracing::Level::INFO,
            logging::host_log_file(&config_path, &args.server),
        ),
        Commands::Group { .. } => (tracing::Level::INFO, None),
        Commands::Config { .. } => (tracing::Level::WARN, None),
    };
    let log_guard = logging::init(default_level, log_file);

    let result = match cli.command {
        Commands::Update(args) => cmd::update::run(&config_path, args, cli.json),
        Commands::Group { group, flags } => cmd::group::run(&config_path, &group, &flags, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        // exit() skips destructors; flush the host log first
        drop(log_guard);
        std::process::exit(1);
    }
}
