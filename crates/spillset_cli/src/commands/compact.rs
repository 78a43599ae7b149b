//! Compact command implementation.

use super::{line_order, open_candidates, CliError};
use spillset_core::{BufferedSortedSet, SortedSet, SpillConfig};
use std::path::PathBuf;
use uuid::Uuid;

/// Runs the compact command.
pub fn run(
    locations: &[PathBuf],
    set: &str,
    max_files: usize,
    reverse: bool,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if locations.is_empty() {
        return Err(CliError::NoLocations { command: "compact" }.into());
    }
    let id = Uuid::parse_str(set)?;
    let config = SpillConfig::new().max_open_files(max_files);
    config.validate()?;

    let candidates = open_candidates(locations, 0)?;
    let mut set: BufferedSortedSet<String> =
        BufferedSortedSet::recover(id, config, line_order(reverse), candidates)?;
    if set.segment_count() == 0 {
        return Err(CliError::SetNotFound(id.to_string()).into());
    }

    println!("Compacting set {}", id);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let before = set.segment_count();
    let plan = plan_rounds(before, max_files);
    println!("Compaction Analysis:");
    println!("  Segments before: {}", before);
    println!("  Segment budget:  {}", max_files);
    if plan.is_empty() {
        println!();
        println!("No compaction needed - set is within budget");
        return Ok(());
    }
    for (round, merged) in plan.iter().enumerate() {
        println!("  Round {}: merge {} oldest segments", round + 1, merged);
    }

    if !dry_run {
        println!();
        println!("Performing compaction...");
        let rounds = set.compact(max_files)?;
        println!(
            "✓ Compaction complete: {} rounds, {} segments, {} elements",
            rounds,
            set.segment_count(),
            set.len()?
        );
    }
    Ok(())
}

/// Segments merged in each round to bring `segments` down to `max_files`.
///
/// Mirrors [`BufferedSortedSet::compact`]: each round folds
/// `min(excess + 1, max_files)` of the oldest segments into one.
pub(crate) fn plan_rounds(segments: usize, max_files: usize) -> Vec<usize> {
    if max_files == 0 {
        return Vec::new();
    }
    let max_files = max_files.max(2);
    let mut remaining = segments;
    let mut plan = Vec::new();
    while remaining > max_files {
        let take = (remaining - max_files + 1).min(max_files);
        plan.push(take);
        remaining -= take - 1;
    }
    plan
}
