//! KM003C capture analyzer CLI
//!
//! Reads a URB trace, reconstructs logical transactions and prints the
//! decoded vendor traffic.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use km003c_analyzer::config::AnalyzerConfig;
use km003c_analyzer::pipeline::analyze;
use km003c_analyzer::printer::{Printer, TransactionFilter};
use km003c_analyzer::protocol::decode_packet;
use km003c_analyzer::trace::load_trace;

// CLI definitions
mod cli;
use cli::{Cli, Commands, ReportFormat};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(AnalyzerConfig::default_path);
    info!("Loading config from {:?}", config_path);
    let mut config = AnalyzerConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    match cli.command {
        Commands::Analyze {
            trace,
            format,
            filter,
            hex,
            summary,
            no_validate,
            workers,
        } => {
            if no_validate {
                config.pipeline.validate = false;
            }
            if let Some(workers) = workers {
                config.pipeline.workers = workers;
            }
            run_analyze(&trace, &config, format, filter, hex, summary)
        }
        Commands::Decode { hex } => run_decode(&hex),
        Commands::Config { save } => {
            if save {
                config
                    .save(&config_path)
                    .with_context(|| format!("Failed to write {}", config_path.display()))?;
                eprintln!("Saved config to {}", config_path.display());
            }
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn run_analyze(
    path: &Path,
    config: &AnalyzerConfig,
    format: ReportFormat,
    filter: TransactionFilter,
    hex: bool,
    summary: bool,
) -> Result<()> {
    let events =
        load_trace(path).with_context(|| format!("Failed to load trace {}", path.display()))?;
    let analysis = analyze(events, config).context("Failed to split trace")?;

    let printer = Printer::new(format.into(), filter).with_hex(hex);
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let printed = printer.print_all(&mut out, &analysis.transactions)?;
    out.flush()?;
    info!(
        "Printed {} of {} transactions",
        printed,
        analysis.transactions.len()
    );

    if summary {
        analysis.summary.print_summary();
    }
    Ok(())
}

fn run_decode(text: &str) -> Result<()> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(&cleaned).context("Invalid hex input")?;
    let packet = decode_packet(&bytes)?;
    println!("{:#?}", packet);
    Ok(())
}
