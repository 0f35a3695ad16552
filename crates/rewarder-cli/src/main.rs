use clap::{Parser, Subcommand};
use rewarder_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "rewarder-cli", version, about = "Playtime rewarder CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Stored user records
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Drive scripted players through the rewarder
    Simulate(commands::simulate::SimulateArgs),
}

/// RUST_LOG wins over the configured debug mode.
fn init_tracing() {
    let fallback = Config::load_or_default().debug_mode.log_filter();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::User { action } => commands::user::run(action),
        Commands::Simulate(args) => commands::simulate::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
