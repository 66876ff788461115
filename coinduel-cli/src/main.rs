mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "coinduel")]
#[command(about = "PvP coinflip wager engine demo")]
#[command(version)]
struct Cli {
    /// Data directory for the engine database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted duel between two demo accounts
    Demo {
        /// Number of duels to run
        #[arg(default_value_t = 1)]
        rounds: u32,
        /// Stake per duel
        #[arg(default_value_t = 100)]
        amount: u64,
        /// Deduct the default house tax from each pot
        #[arg(long)]
        tax: bool,
    },
    /// Show stored statistics for an account
    Stats {
        /// Account identity (UUID)
        account: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "coinduel={},coinduel_engine={},coinduel_core={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coinduel")
    });

    tokio::fs::create_dir_all(&data_dir).await?;

    let result = match cli.command {
        Commands::Demo {
            rounds,
            amount,
            tax,
        } => commands::run_demo(&data_dir, rounds, amount, tax).await,
        Commands::Stats { account } => commands::show_stats(&data_dir, account).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
