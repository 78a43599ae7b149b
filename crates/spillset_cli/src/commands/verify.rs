//! Verify command implementation.

use super::{scan_location, CliError, LocationReport};
use std::path::PathBuf;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Number of intact segments.
    pub valid_segments: usize,
    /// Number of damaged segments.
    pub corrupt_segments: usize,
    /// Elements counted in intact segments.
    pub elements: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn from_report(report: &LocationReport) -> Self {
        let mut result = Self::default();
        for set in &report.sets {
            for segment in &set.segments {
                result.segments_checked += 1;
                match &segment.error {
                    None => {
                        result.valid_segments += 1;
                        result.elements += segment.elements.unwrap_or(0);
                    }
                    Some(error) => {
                        result.corrupt_segments += 1;
                        result
                            .errors
                            .push(format!("{}/{}: {}", set.id, segment.name, error));
                    }
                }
            }
        }
        result
    }

    fn is_ok(&self) -> bool {
        self.corrupt_segments == 0
    }
}

/// Runs the verify command.
pub fn run(locations: &[PathBuf], set: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    if locations.is_empty() {
        return Err(CliError::NoLocations { command: "verify" }.into());
    }

    let mut checked = 0;
    let mut corrupt = 0;
    for path in locations {
        println!("Verifying segments at {:?}", path);
        let result = VerifyResult::from_report(&scan_location(path, set)?);
        print_result(&result);
        checked += result.segments_checked;
        corrupt += result.corrupt_segments;
    }

    println!();
    if corrupt == 0 {
        println!("✓ Segment verification passed");
        Ok(())
    } else {
        println!("✗ Segment verification failed");
        Err(CliError::VerificationFailed { checked, corrupt }.into())
    }
}

fn print_result(result: &VerifyResult) {
    println!(
        "  segments checked: {}, valid: {}, corrupt: {}, elements: {}",
        result.segments_checked, result.valid_segments, result.corrupt_segments, result.elements
    );
    if !result.is_ok() {
        for error in &result.errors {
            println!("    ERROR: {}", error);
        }
    }
}
