mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowrun")]
#[command(author, version, about = "Run GitHub Actions style workflows locally")]
struct Cli {
    /// Enable debug diagnostics (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file without running anything
    Validate(commands::validate::ValidateArgs),
    /// Show the job instances and the order they would run in
    Plan(commands::plan::PlanArgs),
    /// Run a workflow
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Plan(args) => commands::plan::execute(args),
        Commands::Run(args) => commands::run::execute(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
