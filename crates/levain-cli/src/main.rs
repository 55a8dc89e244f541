use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "levain", version, about = "Levain bake timeline engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recalibrate a bake's estimated end from a reading
    Recalibrate(commands::recalibrate::RecalibrateArgs),
    /// Stored bakes
    Bakes {
        #[command(subcommand)]
        action: commands::bakes::BakesAction,
    },
    /// Persisted alarms
    Alarms {
        #[command(subcommand)]
        action: commands::alarms::AlarmsAction,
    },
    /// Run the HTTP server and the notification engine
    Serve(commands::serve::ServeArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Recalibrate(args) => commands::recalibrate::run(args).await,
        Commands::Bakes { action } => commands::bakes::run(action).await,
        Commands::Alarms { action } => commands::alarms::run(action),
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
