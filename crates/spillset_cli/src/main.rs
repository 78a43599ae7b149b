//! spillset CLI
//!
//! Command-line tools for spill-to-disk sorted sets.
//!
//! # Commands
//!
//! - `sort` - Sort and deduplicate text lines with bounded memory
//! - `inspect` - List spilled sets and their segments
//! - `verify` - Check every segment's header, checksums and trailer
//! - `compact` - Merge a kept set's segments down to a file budget

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// spillset command-line tools.
#[derive(Parser)]
#[command(name = "spillset")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Spill directory; repeat to add fallbacks in priority order
    #[arg(global = true, short, long = "location")]
    locations: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort and deduplicate text lines
    Sort {
        /// Input file (stdin if omitted)
        input: Option<PathBuf>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Lines held in memory before spilling a segment
        #[arg(short, long, default_value = "100000")]
        threshold: usize,

        /// Maximum segments kept before compaction (0 = unbounded)
        #[arg(short = 'm', long, default_value = "100")]
        max_files: usize,

        /// Minimum free space (MiB) a location needs to receive a segment
        #[arg(long, default_value = "0")]
        min_free_mb: u64,

        /// Sort in descending order
        #[arg(short, long)]
        reverse: bool,

        /// Keep the spilled segments and print the set id
        #[arg(short, long)]
        keep: bool,
    },

    /// List spilled sets and their segments
    Inspect {
        /// Only show this set
        #[arg(short, long)]
        set: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify segment integrity
    Verify {
        /// Only verify this set
        #[arg(short, long)]
        set: Option<String>,
    },

    /// Merge a kept set's segments down to a file budget
    Compact {
        /// Set id printed by `sort --keep`
        set: String,

        /// Maximum segments to keep
        #[arg(short = 'm', long, default_value = "8")]
        max_files: usize,

        /// The set was sorted with --reverse
        #[arg(short, long)]
        reverse: bool,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so sorted output can be piped
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sort {
            input,
            output,
            threshold,
            max_files,
            min_free_mb,
            reverse,
            keep,
        } => {
            let options = commands::sort::SortOptions {
                input,
                output,
                threshold,
                max_files,
                min_free_mb,
                reverse,
                keep,
            };
            commands::sort::run(&cli.locations, &options)?;
        }
        Commands::Inspect { set, format } => {
            commands::inspect::run(&cli.locations, set.as_deref(), &format)?;
        }
        Commands::Verify { set } => {
            commands::verify::run(&cli.locations, set.as_deref())?;
        }
        Commands::Compact {
            set,
            max_files,
            reverse,
            dry_run,
        } => {
            commands::compact::run(&cli.locations, &set, max_files, reverse, dry_run)?;
        }
        Commands::Version => {
            println!("spillset CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("spillset core v{}", spillset_core::VERSION);
        }
    }

    Ok(())
}
