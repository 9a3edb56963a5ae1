//! Run summaries.

use std::time::Duration;

use backsync_common::format_elapsed;

/// Outcome counts of a backup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files copied to the target.
    pub transferred: usize,
    /// Files the target already held.
    pub skipped: usize,
    /// Files dropped by the exclusion filter.
    pub excluded: usize,
    /// Files whose check or copy failed.
    pub failed: usize,
    pub elapsed: Duration,
}

impl SyncReport {
    /// Elapsed wall-clock time as `HH:MM:SS`.
    pub fn elapsed_clock(&self) -> String {
        format_elapsed(self.elapsed)
    }

    /// Files the run looked at after exclusion.
    pub fn considered(&self) -> usize {
        self.transferred + self.skipped + self.failed
    }
}

/// Outcome counts of a diff run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// Paths written to the output because the target lacks them.
    pub missing: usize,
    pub excluded: usize,
    /// Files whose existence check failed.
    pub failed: usize,
    pub elapsed: Duration,
}

impl DiffReport {
    /// Elapsed wall-clock time as `HH:MM:SS`.
    pub fn elapsed_clock(&self) -> String {
        format_elapsed(self.elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_clock() {
        let report = SyncReport {
            elapsed: Duration::from_millis(3_725_600),
            ..Default::default()
        };
        assert_eq!(report.elapsed_clock(), "01:02:06");

        let diff = DiffReport::default();
        assert_eq!(diff.elapsed_clock(), "00:00:00");
    }

    #[test]
    fn test_considered_ignores_excluded() {
        let report = SyncReport {
            transferred: 2,
            skipped: 3,
            excluded: 4,
            failed: 1,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.considered(), 6);
    }
}
