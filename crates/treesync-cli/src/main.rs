//! treesync CLI - Command-line interface for treesync
//!
//! Provides commands for:
//! - Scanning a tree and printing fingerprints
//! - Hashing files and strings
//! - Reading and writing per-file attributes
//! - Materializing symlinks
//! - Checking path containment
//! - Viewing and editing the configuration

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    attr::AttrCommand, config::ConfigCommand, contains::ContainsCommand, hash::HashCommand,
    normalize::NormalizeCommand, scan::ScanCommand, CommandContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "treesync", version, about = "Watch, fingerprint and normalize directory trees")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a tree and print every entry with its fingerprint
    Scan(ScanCommand),
    /// Print content digests of files or a string
    Hash(HashCommand),
    /// Read and write per-file attributes
    #[command(subcommand)]
    Attr(AttrCommand),
    /// Replace symlinks with copies of their targets
    Normalize(NormalizeCommand),
    /// Exit 0 if a path lies inside a root, 1 otherwise
    Contains(ContainsCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let ctx = CommandContext::new(OutputFormat::from_json_flag(cli.json), cli.config);

    match cli.command {
        Commands::Scan(cmd) => cmd.execute(&ctx).await?,
        Commands::Hash(cmd) => cmd.execute(&ctx).await?,
        Commands::Attr(cmd) => cmd.execute(&ctx).await?,
        Commands::Normalize(cmd) => cmd.execute(&ctx).await?,
        Commands::Config(cmd) => cmd.execute(&ctx).await?,
        Commands::Contains(cmd) => {
            if !cmd.execute(&ctx).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let format = OutputFormat::from_json_flag(cli.json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::Output::new(format).error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
