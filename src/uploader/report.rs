use chrono::{DateTime, Utc};
use serde::Serialize;

use super::upload_queue::{FileStatus, SelectedFile, UploadResult};

/// Results of every settled file, in the order they settled
pub fn results_in_completion_order(files: &[SelectedFile]) -> Vec<UploadResult> {
    let mut settled: Vec<_> = files
        .iter()
        .filter_map(|f| Some((f.settled_order()?, f.result()?.clone())))
        .collect();
    settled.sort_by_key(|(order, _)| *order);
    settled.into_iter().map(|(_, result)| result).collect()
}

pub fn has_success(files: &[SelectedFile]) -> bool {
    files.iter().any(|f| f.status() == FileStatus::Success)
}

pub fn has_pending(files: &[SelectedFile]) -> bool {
    files.iter().any(|f| f.status() == FileStatus::Pending)
}

/// What one upload run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub results: Vec<UploadResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(
        results: Vec<UploadResult>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        cancelled: bool,
    ) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            failed: results.len() - succeeded,
            succeeded,
            results,
            cancelled,
            started_at,
            finished_at,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.failed == 0
    }

    pub fn log(&self) {
        let elapsed = self.finished_at - self.started_at;
        if self.cancelled {
            log::info!(
                "Upload run cancelled after {} files: {} successful, {} failed ({}ms)",
                self.results.len(),
                self.succeeded,
                self.failed,
                elapsed.num_milliseconds()
            );
        } else if self.failed > 0 {
            log::warn!(
                "Upload run completed: {} successful, {} failed ({}ms)",
                self.succeeded,
                self.failed,
                elapsed.num_milliseconds()
            );
        } else {
            log::info!(
                "Upload run completed: {} successful ({}ms)",
                self.succeeded,
                elapsed.num_milliseconds()
            );
        }
    }
}
