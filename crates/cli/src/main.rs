use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
use commands::{check::CheckArgs, list::ListArgs, scan::ScanArgs};

#[derive(Parser)]
#[command(name = "audit")]
#[command(about = "Upgrade-safety checks for proxy-based smart contracts")]
#[command(version)]
struct Cli {
    /// Partial JSON override of the analysis configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a contract version, or an upgrade from <OLD> to <NEW>
    Check(CheckArgs),

    /// Analyze every contract found in the given files or directories
    Scan(ScanArgs),

    /// List the registered analyzers
    List(ListArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(commands::EXIT_FAILURE)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = commands::report::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check(args) => commands::check::execute(&args, config),
        Commands::Scan(args) => commands::scan::execute(&args, config),
        Commands::List(args) => commands::list::execute(&args, config),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
