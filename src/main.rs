// file: src/main.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-234567hijklm

//! Cloud Image Builder - Main entry point

use clap::Parser;
use cloudimage_builder::{
    cli::{
        args::{Cli, Commands},
        commands::*,
    },
    logging::logger,
    Result,
};
use tokio::signal;
use tracing::{error, warn};

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build {
            entry,
            pattern,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            build_command(config, entry, &pattern, json).await
        }
        Commands::List { json } => {
            let config = load_config(cli.config.as_deref())?;
            list_command(&config, json).await
        }
        Commands::Validate { image } => validate_command(&image).await,
        Commands::CheckPrereqs => check_prerequisites_command().await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = if cli.log_json {
        logger::init_json_logger()
    } else {
        logger::init_logger(cli.verbose, cli.quiet)
    };
    if let Err(e) = logging {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let code = tokio::select! {
        result = dispatch(cli) => match result {
            Ok(()) => 0,
            Err(e) => {
                error!("{}", e);
                e.errno()
            }
        },
        _ = signal::ctrl_c() => {
            warn!("Application interrupted by user");
            130 // Standard exit code for Ctrl+C
        }
    };

    std::process::exit(code);
}
