//! Sort command implementation.

use super::{line_order, open_candidates, CliError};
use spillset_core::{BufferedSortedSet, CandidateLocation, SortedSet, SpillConfig};
use spillset_storage::{DirectoryLocation, StoreLocation};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Options for the sort command.
#[derive(Debug)]
pub struct SortOptions {
    /// Input file (stdin if `None`).
    pub input: Option<PathBuf>,
    /// Output file (stdout if `None`).
    pub output: Option<PathBuf>,
    /// Buffer persist threshold.
    pub threshold: usize,
    /// Maximum segments before compaction.
    pub max_files: usize,
    /// Minimum free MiB per location.
    pub min_free_mb: u64,
    /// Descending order.
    pub reverse: bool,
    /// Leave segments behind after sorting.
    pub keep: bool,
}

/// Sort statistics.
#[derive(Debug, Default)]
pub struct SortStats {
    /// Lines read from the input.
    pub lines_read: u64,
    /// Distinct lines written.
    pub lines_written: u64,
    /// Segments spilled at the end of input.
    pub segments: usize,
}

/// Runs the sort command.
pub fn run(locations: &[PathBuf], options: &SortOptions) -> Result<(), Box<dyn std::error::Error>> {
    let candidates = if locations.is_empty() {
        if options.keep {
            return Err(CliError::KeepWithoutLocation.into());
        }
        let scratch: Arc<dyn StoreLocation> = Arc::new(DirectoryLocation::temporary()?);
        vec![CandidateLocation::new(scratch)]
    } else {
        open_candidates(locations, options.min_free_mb)?
    };

    let config = SpillConfig::new()
        .buffer_persist_threshold(options.threshold)
        .max_open_files(options.max_files);
    let mut set = BufferedSortedSet::with_locations(config, line_order(options.reverse), candidates)?;
    debug!(set = %set.id(), "sorting into set");

    let input: Box<dyn BufRead> = match &options.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin().lock())),
    };
    let output: Box<dyn Write> = match &options.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let start = Instant::now();
    let stats = match sort_lines(&mut set, input, output) {
        Ok(stats) => stats,
        Err(err) => {
            if !options.keep {
                if let Err(clear_err) = set.clear() {
                    warn!(set = %set.id(), error = %clear_err, "failed to release segments");
                }
            }
            return Err(err);
        }
    };
    info!(
        lines_read = stats.lines_read,
        lines_written = stats.lines_written,
        segments = stats.segments,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "sort complete"
    );

    if options.keep {
        set.persist()?;
        eprintln!("✓ Kept {} segments for set {}", set.segment_count(), set.id());
    } else {
        set.clear()?;
    }
    Ok(())
}

/// Streams every line of `input` through `set` and writes the distinct
/// lines to `output` in order.
pub(crate) fn sort_lines(
    set: &mut BufferedSortedSet<String>,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<SortStats, Box<dyn std::error::Error>> {
    let mut stats = SortStats::default();
    for line in input.lines() {
        set.insert(line?)?;
        stats.lines_read += 1;
    }
    stats.segments = set.segment_count();

    for line in set.iter()? {
        writeln!(output, "{}", line?)?;
        stats.lines_written += 1;
    }
    output.flush()?;
    Ok(stats)
}
