//! Progress tracking for conversions

use rawvhd_core::format_size;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress information reported after each block
#[derive(Debug, Clone)]
pub struct ConvertProgress {
    /// Total input bytes
    pub total_bytes: u64,
    /// Input bytes scanned so far
    pub bytes_processed: u64,
    /// Blocks scanned so far
    pub blocks_done: u32,
    /// Total blocks in the image
    pub blocks_total: u32,
    /// Blocks that were written to the output
    pub blocks_allocated: u32,
    /// Current rate in bytes/second
    pub bytes_per_second: f64,
    /// Estimated time remaining
    pub estimated_remaining: Option<Duration>,
    /// Time elapsed since start
    pub elapsed: Duration,
    /// Percentage complete (0.0 - 100.0)
    pub percent_complete: f64,
}

impl ConvertProgress {
    /// Calculate progress from current state
    pub fn calculate(
        total_bytes: u64,
        bytes_processed: u64,
        blocks: (u32, u32, u32),
        start_time: Instant,
    ) -> Self {
        let (blocks_done, blocks_total, blocks_allocated) = blocks;
        let elapsed = start_time.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        let bytes_per_second = if elapsed_secs > 0.0 {
            bytes_processed as f64 / elapsed_secs
        } else {
            0.0
        };

        let percent_complete = if total_bytes > 0 {
            (bytes_processed as f64 / total_bytes as f64) * 100.0
        } else {
            100.0
        };

        let remaining_bytes = total_bytes.saturating_sub(bytes_processed);
        let estimated_remaining = if bytes_per_second > 0.0 {
            let secs = remaining_bytes as f64 / bytes_per_second;
            secs.is_finite().then(|| Duration::from_secs_f64(secs))
        } else {
            None
        };

        Self {
            total_bytes,
            bytes_processed,
            blocks_done,
            blocks_total,
            blocks_allocated,
            bytes_per_second,
            estimated_remaining,
            elapsed,
            percent_complete,
        }
    }

    /// Format progress as human-readable string
    pub fn format(&self) -> String {
        let eta_str = match self.estimated_remaining {
            Some(remaining) => format_duration(remaining),
            None => "calculating...".to_string(),
        };

        format!(
            "Converting: {:.1}% - block {}/{} ({} allocated) - {} @ {}/s - ETA: {}",
            self.percent_complete,
            self.blocks_done,
            self.blocks_total,
            self.blocks_allocated,
            format_size(self.bytes_processed),
            format_size(self.bytes_per_second as u64),
            eta_str
        )
    }
}

/// Callback type for progress updates
pub type ProgressCallback = Arc<dyn Fn(&ConvertProgress) + Send + Sync>;

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs >= 3600 {
        format!("{}h {}m", total_secs / 3600, (total_secs % 3600) / 60)
    } else if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else {
        format!("{}s", total_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_progress_calculation() {
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(10));

        let progress = ConvertProgress::calculate(1000, 500, (1, 2, 1), start);

        assert!((progress.percent_complete - 50.0).abs() < 0.1);
        assert!(progress.bytes_per_second > 0.0);
        assert!(progress.estimated_remaining.is_some());
        assert!(progress.format().starts_with("Converting: 50.0% - block 1/2 (1 allocated)"));
    }

    #[test]
    fn test_progress_complete() {
        let progress = ConvertProgress::calculate(4096, 4096, (2, 2, 0), Instant::now());
        assert_eq!(progress.blocks_done, progress.blocks_total);
        assert!((progress.percent_complete - 100.0).abs() < f64::EPSILON);
    }
}
