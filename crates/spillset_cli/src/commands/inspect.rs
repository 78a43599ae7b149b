//! Inspect command implementation.

use super::{format_size, scan_location, CliError, LocationReport};
use serde::Serialize;
use std::path::PathBuf;

/// Inspection result across all locations.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// One report per `--location`, in the order given.
    pub locations: Vec<LocationReport>,
}

/// Runs the inspect command.
pub fn run(
    locations: &[PathBuf],
    set: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if locations.is_empty() {
        return Err(CliError::NoLocations { command: "inspect" }.into());
    }

    let result = InspectResult {
        locations: locations
            .iter()
            .map(|path| scan_location(path, set))
            .collect::<Result<_, _>>()?,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text_output(&result),
        other => return Err(CliError::UnknownFormat(other.to_string()).into()),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("spillset Inspection");
    println!("===================");
    for location in &result.locations {
        println!();
        println!("Location: {}", location.path);
        println!(
            "  Capacity: {} available of {}",
            format_size(location.available_bytes),
            format_size(location.total_bytes)
        );
        if location.sets.is_empty() {
            println!("  (no spilled sets)");
            continue;
        }
        for set in &location.sets {
            println!();
            println!(
                "  Set {}: {} segments, {} elements, {}",
                set.id,
                set.segments.len(),
                set.elements(),
                format_size(set.bytes())
            );
            for segment in &set.segments {
                match (&segment.elements, &segment.error) {
                    (Some(elements), _) => println!(
                        "    {}  {:>10} elements  {:>10}",
                        segment.name,
                        elements,
                        format_size(segment.bytes)
                    ),
                    (None, Some(error)) => println!("    {}  DAMAGED: {}", segment.name, error),
                    (None, None) => println!("    {}", segment.name),
                }
            }
        }
    }
}
