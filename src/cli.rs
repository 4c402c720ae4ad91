// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use km003c_analyzer::printer::{OutputFormat, TransactionFilter};

#[derive(Parser)]
#[command(name = "km003c-analyzer")]
#[command(author, version, about = "POWER-Z KM003C USB capture analyzer")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split, decode, tag and validate a URB trace (JSON lines)
    #[command(visible_aliases = ["a", "trace"])]
    Analyze {
        /// Trace file, one URB event per line
        trace: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Filter output (all, bulk, control, malformed, tag=NAME, cmd=0xNN)
        #[arg(long, default_value = "all")]
        filter: TransactionFilter,

        /// Show raw hex dump of member payloads
        #[arg(long)]
        hex: bool,

        /// Print summary counters to stderr
        #[arg(short, long)]
        summary: bool,

        /// Skip request/response correlation checks
        #[arg(long)]
        no_validate: bool,

        /// Decode worker threads (0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Decode one vendor packet given as hex
    #[command(visible_alias = "d")]
    Decode {
        /// Packet bytes, e.g. 0c060200
        hex: String,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
pub enum ReportFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output (one object per line)
    Json,
}

impl From<ReportFormat> for OutputFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Text => OutputFormat::Text,
            ReportFormat::Json => OutputFormat::Json,
        }
    }
}
