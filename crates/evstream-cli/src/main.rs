use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod logging;

use config::Config;

/// Pipe bytes through event-driven streams.
#[derive(Parser, Debug)]
#[command(name = "evstream", version, about)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print a byte and event summary to stderr when done
    #[arg(long, global = true)]
    report: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy standard input to standard output or a file
    Cat {
        /// Write to this file instead of standard output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write each argument as a line
    Write {
        /// Write to this file instead of standard output
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;
    logging::init(&config.log_filter, cli.verbose)?;

    let summary = match &cli.command {
        Command::Cat { output } => commands::cat(&config, output.as_deref()).await?,
        Command::Write { output, text } => commands::write(output.as_deref(), text).await?,
    };

    if cli.report || config.report {
        summary.print();
    }
    Ok(())
}
