use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Global metrics instance
pub static METRICS: Lazy<Mutex<Metrics>> = Lazy::new(|| Mutex::new(Metrics::new()));

/// Counters for one pipeline run
#[derive(Debug, Default)]
pub struct Metrics {
    pub raw_files_read: u64,
    pub raw_files_skipped: u64,
    pub raw_rows: u64,
    pub bins_reduced: u64,
    pub tables_written: u64,
    pub units_failed: u64,
    pub processing_times: BTreeMap<String, Duration>,
    pub start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_file_read(&mut self, rows: u64) {
        self.raw_files_read += 1;
        self.raw_rows += rows;
    }

    pub fn record_file_skipped(&mut self) {
        self.raw_files_skipped += 1;
    }

    pub fn record_bins(&mut self, bins: u64) {
        self.bins_reduced += bins;
    }

    pub fn record_table_written(&mut self) {
        self.tables_written += 1;
    }

    pub fn record_unit_failed(&mut self) {
        self.units_failed += 1;
    }

    /// Accumulates, so repeated stages report their total time.
    pub fn record_processing_time(&mut self, operation: String, duration: Duration) {
        *self.processing_times.entry(operation).or_default() += duration;
    }

    pub fn get_total_duration(&self) -> Duration {
        self.start_time
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    pub fn get_throughput(&self) -> f64 {
        let duration_secs = self.get_total_duration().as_secs_f64();
        if duration_secs > 0.0 {
            self.raw_rows as f64 / duration_secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        let duration = self.get_total_duration();
        println!("\n========== Pipeline Metrics Summary ==========");
        println!("Total Duration: {:.2?}", duration);
        println!("Raw Files Read: {}", self.raw_files_read);
        println!("Raw Files Skipped: {}", self.raw_files_skipped);
        println!("Raw Rows: {}", self.raw_rows);
        println!("Bins Reduced: {}", self.bins_reduced);
        println!("Tables Written: {}", self.tables_written);
        println!("Units Of Work Failed: {}", self.units_failed);
        println!("Throughput: {:.2} rows/sec", self.get_throughput());

        if !self.processing_times.is_empty() {
            println!("\nProcessing Times:");
            for (op, duration) in &self.processing_times {
                println!("  {}: {:.2?}", op, duration);
            }
        }
        println!("=============================================\n");
    }
}

/// Helper macro to time an operation
#[macro_export]
macro_rules! time_operation {
    ($name:expr, $op:expr) => {{
        let start = std::time::Instant::now();
        let result = $op;
        let duration = start.elapsed();
        $crate::metrics::METRICS
            .lock()
            .record_processing_time($name.to_string(), duration);
        result
    }};
}
