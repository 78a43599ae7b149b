//! Stress runs for spilling sets.
//!
//! These push many more elements through a set than its buffer holds, so
//! that spilling, compaction and merged iteration all run repeatedly.

use crate::fixtures::TestSet;
use spillset_core::SortedSet;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Segments left at the end of the run.
    pub segments: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, segments: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            segments,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Segments: {}", self.segments);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Buffer persist threshold.
    pub threshold: usize,
    /// Segment budget.
    pub max_files: usize,
    /// Number of distinct keys.
    pub key_space: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threshold: 256,
            max_files: 8,
            key_space: 4_096,
        }
    }
}

impl StressConfig {
    fn key(&self, i: usize) -> u32 {
        // Multiplicative scatter so consecutive inserts land far apart.
        ((i as u64 * 2_654_435_761) % u64::from(self.key_space.max(1))) as u32
    }
}

/// Inserts `operations` scattered keys, persists, then reads the whole
/// set back.
pub fn stress_sequential_inserts(config: &StressConfig) -> StressTestResult {
    let mut test_set = TestSet::memory(config.threshold, config.max_files);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match test_set.insert(config.key(i)) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }
    match test_set.persist().and_then(|()| test_set.to_vec()) {
        Ok(_) => successful += 1,
        Err(_) => failed += 1,
    }

    StressTestResult::new(successful, failed, test_set.segment_count(), start.elapsed())
}

/// Alternates inserts with removals and membership checks, then persists.
pub fn stress_mixed_operations(config: &StressConfig) -> StressTestResult {
    let mut test_set = TestSet::memory(config.threshold, config.max_files);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = config.key(i);
        let result = if i % 3 == 0 {
            test_set.remove(&key).map(|_| ())
        } else if i % 3 == 1 {
            test_set.contains(&key).map(|_| ())
        } else {
            test_set.insert(key).map(|_| ())
        };

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }
    match test_set.persist() {
        Ok(()) => successful += 1,
        Err(_) => failed += 1,
    }

    StressTestResult::new(successful, failed, test_set.segment_count(), start.elapsed())
}
