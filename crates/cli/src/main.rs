//! Command-line driver for the Keycard host engine

use clap::{Parser, Subcommand};
use tracing::debug;

mod commands;

use commands::{DemoArgs, demo_command, seed_command};

#[derive(Parser)]
#[command(version, about = "Drive the Keycard protocol engine against a simulated card")]
struct Cli {
    /// Trace level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a simulated card through the full session lifecycle
    Demo(DemoArgs),

    /// Print the BIP39 seed of a mnemonic phrase
    Seed {
        /// Mnemonic phrase, words separated by spaces
        #[arg(required = true)]
        phrase: String,

        /// Optional BIP39 passphrase
        #[arg(long, default_value = "")]
        passphrase: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    debug!("Starting keycard CLI");

    match &cli.command {
        Commands::Demo(args) => demo_command(args),
        Commands::Seed { phrase, passphrase } => seed_command(phrase, passphrase),
    }
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("trace")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();
}
