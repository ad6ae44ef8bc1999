use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docforge")]
#[command(author, version, about = "Document conversion service")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP conversion service
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of concurrent engine workers
        #[arg(long)]
        workers: Option<usize>,

        /// Pending-job capacity before requests are rejected
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Per-attempt engine timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Convert a single file and exit
    Convert {
        /// Document to convert
        #[arg(required = true)]
        input: PathBuf,

        /// Target format (e.g. docx, pdf)
        #[arg(long)]
        to: String,

        /// Source format; inferred from the input extension when omitted
        #[arg(long)]
        from: Option<String>,

        /// Output path; defaults to the input path with the target extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the conversion engine is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
