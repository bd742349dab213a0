//! CLI parse: clap types for forge. No behavior; definitions only.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Forge CLI - 3D model generation scheduler
#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Queue 3D model generation across AI, procedural and texture engines")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: warnings only)
    #[arg(long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate one model per prompt
    Generate {
        /// Prompts, one job each
        #[arg(required = true)]
        prompts: Vec<String>,

        #[command(flatten)]
        spec: SpecArgs,

        /// Job priority (lower runs first)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,

        /// Attempts per job (defaults to scheduler.default_max_attempts)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,

        /// Print job lifecycle events as JSON lines after the results
        #[arg(long)]
        events: bool,
    },
    /// Print the request fingerprint used for deduplication
    Fingerprint {
        /// Prompt words
        #[arg(required = true)]
        prompt: Vec<String>,

        #[command(flatten)]
        spec: SpecArgs,
    },
    /// Print the effective configuration as TOML (API key masked)
    Config,
}

/// Request fields shared by `generate` and `fingerprint`
#[derive(Args, Debug, Clone)]
pub struct SpecArgs {
    /// Engine preference (auto, ai, procedural, texture)
    #[arg(long, default_value = "auto")]
    pub engine: String,

    /// Complexity level, 1-10
    #[arg(long, default_value = "7")]
    pub complexity: u8,

    /// Detail level, 1-10
    #[arg(long, default_value = "8")]
    pub detail: u8,

    /// Material style (realistic, stylized, low_poly, sci_fi, fantasy, cartoon)
    #[arg(long, default_value = "realistic")]
    pub style: String,
}
