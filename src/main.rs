mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check { config } => commands::check::run(&config).await?,
        Commands::Agent { config } => commands::agent::run(&config).await?,
        Commands::Controller { config } => commands::controller::run(&config).await?,
    }

    Ok(())
}
