use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::errors::{AppError, AppResult};

use super::events::UploadEvents;
use super::intake::RawFile;
use super::progress_tracker::{overall_progress, CancelHandle, SharedTracker};
use super::report::RunSummary;
use super::upload_client::UploadTransport;

/// Recorded on a file whose run stopped while its request was in flight
pub const INTERRUPTED_MESSAGE: &str = "Upload interrupted";

/// Opaque id of a selected file, stable for as long as it stays selected
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileId(String);

impl FileId {
    /// Name and size plus a random tiebreaker, so re-adding a removed file
    /// never reuses an id
    fn for_file(file: &RawFile) -> Self {
        Self(format!(
            "{}-{}-{}",
            file.name(),
            file.size(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Uploading,
    Success,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Success => "success",
            FileStatus::Error => "error",
        }
    }
}

/// Outcome of one upload attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl UploadResult {
    pub fn succeeded(filename: &str, locator: Option<String>) -> Self {
        Self {
            filename: filename.to_string(),
            success: true,
            locator,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(filename: &str, message: String) -> Self {
        Self {
            filename: filename.to_string(),
            success: false,
            locator: None,
            error: Some(message),
            completed_at: Utc::now(),
        }
    }
}

/// One file under management. Status only moves through the transition
/// methods: pending -> uploading -> success | error.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    id: FileId,
    raw_file: RawFile,
    status: FileStatus,
    progress: u8,
    result: Option<UploadResult>,
    settled_order: Option<u64>,
}

impl SelectedFile {
    pub fn new(raw_file: RawFile) -> Self {
        Self {
            id: FileId::for_file(&raw_file),
            raw_file,
            status: FileStatus::Pending,
            progress: 0,
            result: None,
            settled_order: None,
        }
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn raw_file(&self) -> &RawFile {
        &self.raw_file
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn result(&self) -> Option<&UploadResult> {
        self.result.as_ref()
    }

    /// Position of this file among all settled files, once settled
    pub fn settled_order(&self) -> Option<u64> {
        self.settled_order
    }

    fn invalid_transition(&self, to: FileStatus) -> AppError {
        AppError::InvalidTransition {
            id: self.id.to_string(),
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }

    pub fn begin_upload(&mut self) -> AppResult<()> {
        if self.status != FileStatus::Pending {
            return Err(self.invalid_transition(FileStatus::Uploading));
        }
        self.status = FileStatus::Uploading;
        self.progress = 0;
        Ok(())
    }

    pub fn complete(&mut self, locator: Option<String>, order: u64) -> AppResult<&UploadResult> {
        if self.status != FileStatus::Uploading {
            return Err(self.invalid_transition(FileStatus::Success));
        }
        self.status = FileStatus::Success;
        self.progress = 100;
        self.settled_order = Some(order);
        let result = UploadResult::succeeded(self.raw_file.name(), locator);
        Ok(&*self.result.insert(result))
    }

    pub fn fail(&mut self, message: String, order: u64) -> AppResult<&UploadResult> {
        if self.status != FileStatus::Uploading {
            return Err(self.invalid_transition(FileStatus::Error));
        }
        self.status = FileStatus::Error;
        self.progress = 0;
        self.settled_order = Some(order);
        let result = UploadResult::failed(self.raw_file.name(), message);
        Ok(&*self.result.insert(result))
    }
}

/// Ordered, duplicate-free selection. Insertion order is upload order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    files: Vec<SelectedFile>,
}

impl Batch {
    pub fn files(&self) -> &[SelectedFile] {
        &self.files
    }

    pub fn raw_files(&self) -> Vec<&RawFile> {
        self.files.iter().map(|f| &f.raw_file).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, id: &FileId) -> Option<&SelectedFile> {
        self.files.iter().find(|f| &f.id == id)
    }

    fn get_mut(&mut self, id: &FileId) -> Option<&mut SelectedFile> {
        self.files.iter_mut().find(|f| &f.id == id)
    }

    fn append(&mut self, raw_files: Vec<RawFile>) -> Vec<FileId> {
        let mut ids = Vec::with_capacity(raw_files.len());
        for raw_file in raw_files {
            let file = SelectedFile::new(raw_file);
            ids.push(file.id.clone());
            self.files.push(file);
        }
        ids
    }

    fn pending_ids(&self) -> Vec<FileId> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Pending)
            .map(|f| f.id.clone())
            .collect()
    }
}

/// Whether an upload run currently owns the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running { completed: usize, total: usize },
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    /// 0 while idle; completed / total while running
    pub fn overall_progress(&self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running { completed, total } => overall_progress(*completed, *total),
        }
    }
}

/// Authoritative selection state plus the single-run guard
#[derive(Debug, Default)]
pub struct UploadTracker {
    batch: Batch,
    run_state: RunState,
    settled_count: u64,
}

impl UploadTracker {
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    fn ensure_idle(&self) -> AppResult<()> {
        if self.run_state.is_running() {
            return Err(AppError::RunInProgress);
        }
        Ok(())
    }

    pub fn append(&mut self, raw_files: Vec<RawFile>) -> Vec<FileId> {
        self.batch.append(raw_files)
    }

    /// Single-selection mode: the new file takes the place of everything
    pub fn replace(&mut self, raw_file: RawFile) -> AppResult<FileId> {
        self.ensure_idle()?;
        self.batch.files.clear();
        let ids = self.batch.append(vec![raw_file]);
        ids.into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("replacement produced no entry".to_string()))
    }

    pub fn remove(&mut self, id: &FileId) -> AppResult<RawFile> {
        self.ensure_idle()?;
        let index = self
            .batch
            .files
            .iter()
            .position(|f| &f.id == id)
            .ok_or_else(|| AppError::UnknownFile { id: id.to_string() })?;

        if self.batch.files[index].status == FileStatus::Uploading {
            return Err(AppError::RunInProgress);
        }

        Ok(self.batch.files.remove(index).raw_file)
    }

    pub fn clear(&mut self) -> AppResult<()> {
        self.ensure_idle()?;
        self.batch.files.clear();
        Ok(())
    }

    /// Drop every errored entry and hand back its file for re-selection
    pub fn remove_failed(&mut self) -> AppResult<Vec<RawFile>> {
        self.ensure_idle()?;
        let (failed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.batch.files)
            .into_iter()
            .partition(|f| f.status == FileStatus::Error);
        self.batch.files = kept;
        Ok(failed.into_iter().map(|f| f.raw_file).collect())
    }

    /// Take the run guard and return the files this run will visit, in order
    pub fn begin_run(&mut self) -> AppResult<Vec<FileId>> {
        self.ensure_idle()?;
        let ids = self.batch.pending_ids();
        if !ids.is_empty() {
            self.run_state = RunState::Running {
                completed: 0,
                total: ids.len(),
            };
        }
        Ok(ids)
    }

    /// Mark a file uploading. `None` when it is no longer pending.
    pub fn start_file(&mut self, id: &FileId) -> AppResult<Option<RawFile>> {
        if !self.run_state.is_running() {
            return Err(AppError::Internal(format!(
                "start_file({}) outside of a run",
                id
            )));
        }

        match self.batch.get_mut(id) {
            Some(file) if file.status == FileStatus::Pending => {
                file.begin_upload()?;
                Ok(Some(file.raw_file.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Settle the in-flight file and advance the run's completed count.
    /// `None` for `outcome` means the file was skipped.
    pub fn settle_file(
        &mut self,
        id: &FileId,
        outcome: Option<AppResult<Option<String>>>,
    ) -> AppResult<Option<UploadResult>> {
        let result = match outcome {
            Some(outcome) => {
                self.settled_count += 1;
                let order = self.settled_count;
                let file = self
                    .batch
                    .get_mut(id)
                    .ok_or_else(|| AppError::UnknownFile { id: id.to_string() })?;

                let result = match outcome {
                    Ok(locator) => file.complete(locator, order)?.clone(),
                    Err(e) => file.fail(e.upload_message(), order)?.clone(),
                };
                Some(result)
            }
            None => None,
        };

        if let RunState::Running { completed, total } = &mut self.run_state {
            *completed = (*completed + 1).min(*total);
        }

        Ok(result)
    }

    pub fn finish_run(&mut self) {
        self.run_state = RunState::Idle;
    }

    /// End a run that stopped early. A file caught mid-upload is settled as
    /// an error since its request outcome is unknown.
    pub fn abandon_run(&mut self) {
        for file in self.batch.files.iter_mut() {
            if file.status == FileStatus::Uploading {
                self.settled_count += 1;
                let _ = file.fail(INTERRUPTED_MESSAGE.to_string(), self.settled_count);
            }
        }
        self.run_state = RunState::Idle;
    }
}

/// Releases the run guard if a run ends without reaching `finish`, e.g. when
/// the host drops the upload future or a tracker update fails
struct RunGuard<'a> {
    tracker: &'a SharedTracker,
    finished: bool,
}

impl<'a> RunGuard<'a> {
    fn new(tracker: &'a SharedTracker) -> Self {
        Self {
            tracker,
            finished: false,
        }
    }

    fn finish(mut self) -> AppResult<()> {
        self.finished = true;
        self.tracker.update("finish run", |t| {
            t.finish_run();
            Ok(())
        })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::warn!("Upload run ended early, releasing run guard");
        if let Err(e) = self.tracker.update("abandon run", |t| {
            t.abandon_run();
            Ok(())
        }) {
            log::error!("Failed to release run guard (non-critical): {}", e);
        }
    }
}

/// Run the upload loop over every pending file.
///
/// Files go out strictly one after another in selection order; a failed
/// file is recorded and the loop moves on. Exactly one completion event is
/// emitted per run, carrying the results in completion order.
pub async fn process_upload_queue(
    tracker: &SharedTracker,
    transport: &dyn UploadTransport,
    cancel: &CancelHandle,
    events: &dyn UploadEvents,
) -> AppResult<RunSummary> {
    let run_ids = tracker.update("begin run", |t| t.begin_run())?;
    let started_at = Utc::now();

    // A cancel requested outside a run has nothing to stop
    if cancel.is_cancelled() {
        log::debug!("Discarding cancel request made before the run started");
        cancel.reset();
    }

    if run_ids.is_empty() {
        log::info!("No pending files to upload");
        return Ok(RunSummary::new(Vec::new(), started_at, Utc::now(), false));
    }

    let guard = RunGuard::new(tracker);
    let total = run_ids.len();
    let mut results = Vec::with_capacity(total);
    let mut cancelled = false;

    log::info!("Starting upload run for {} files", total);

    for (index, id) in run_ids.iter().enumerate() {
        if cancel.is_cancelled() {
            log::info!(
                "Upload run cancelled before file {} of {}",
                index + 1,
                total
            );
            cancelled = true;
            break;
        }

        let raw_file = tracker.update("start file", |t| t.start_file(id))?;

        let outcome = match raw_file {
            Some(raw_file) => {
                log::info!(
                    "Uploading {} ({}/{})",
                    raw_file.name(),
                    index + 1,
                    total
                );
                let outcome = transport.upload(&raw_file).await;
                match &outcome {
                    Ok(_) => log::info!("Uploaded {}", raw_file.name()),
                    Err(e) => log::warn!(
                        "Failed to upload {} (retryable: {}): {}",
                        raw_file.name(),
                        e.is_retryable(),
                        e
                    ),
                }
                Some(outcome)
            }
            None => {
                log::debug!("Skipping {}: no longer pending", id);
                None
            }
        };

        let (result, progress) = tracker.update("settle file", |t| {
            let result = t.settle_file(id, outcome)?;
            Ok((result, t.run_state().overall_progress()))
        })?;

        if let Some(result) = result {
            results.push(result);
        }
        events.progress(progress);
    }

    guard.finish()?;
    cancel.reset();
    events.progress(0);

    let summary = RunSummary::new(results, started_at, Utc::now(), cancelled);
    summary.log();
    events.upload_completed(&summary.results);

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, size: usize) -> RawFile {
        RawFile::from_bytes(name, None, vec![0u8; size])
    }

    #[test]
    fn test_transitions_follow_the_lifecycle() {
        let mut file = SelectedFile::new(raw("a.csv", 3));
        assert_eq!(file.status(), FileStatus::Pending);
        assert!(file.result().is_none());

        assert!(file.complete(None, 1).is_err());
        file.begin_upload().unwrap();
        assert_eq!(file.status(), FileStatus::Uploading);
        assert!(file.begin_upload().is_err());

        let result = file.complete(Some("raw/a.csv".into()), 1).unwrap().clone();
        assert!(result.success);
        assert_eq!(result.locator.as_deref(), Some("raw/a.csv"));
        assert_eq!(file.progress(), 100);

        // terminal
        assert!(file.begin_upload().is_err());
        assert!(file.fail("late".into(), 2).is_err());
    }

    #[test]
    fn test_fail_resets_progress() {
        let mut file = SelectedFile::new(raw("a.csv", 3));
        file.begin_upload().unwrap();
        let result = file.fail("Upload failed".into(), 1).unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Upload failed"));
        assert!(result.locator.is_none());
        assert_eq!(file.progress(), 0);
        assert_eq!(file.status(), FileStatus::Error);
    }

    #[test]
    fn test_ids_are_unique_for_identical_files() {
        let a = SelectedFile::new(raw("a.csv", 3));
        let b = SelectedFile::new(raw("a.csv", 3));
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("a.csv-3-"));
    }

    #[test]
    fn test_run_guard_blocks_mutation() {
        let mut tracker = UploadTracker::default();
        let ids = tracker.append(vec![raw("a.csv", 1), raw("b.csv", 1)]);

        let run_ids = tracker.begin_run().unwrap();
        assert_eq!(run_ids, ids);
        assert!(matches!(tracker.begin_run(), Err(AppError::RunInProgress)));
        assert!(matches!(tracker.remove(&ids[1]), Err(AppError::RunInProgress)));
        assert!(matches!(tracker.clear(), Err(AppError::RunInProgress)));
        assert!(matches!(
            tracker.replace(raw("c.csv", 1)),
            Err(AppError::RunInProgress)
        ));

        tracker.finish_run();
        assert!(tracker.remove(&ids[1]).is_ok());
        assert_eq!(tracker.batch().len(), 1);
    }

    #[test]
    fn test_begin_run_without_pending_files_stays_idle() {
        let mut tracker = UploadTracker::default();
        assert!(tracker.begin_run().unwrap().is_empty());
        assert_eq!(tracker.run_state(), RunState::Idle);
    }

    #[test]
    fn test_settle_advances_progress() {
        let mut tracker = UploadTracker::default();
        let ids = tracker.append(vec![raw("a.csv", 1), raw("b.csv", 1), raw("c.csv", 1)]);
        tracker.begin_run().unwrap();

        let mut seen = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            assert!(tracker.start_file(id).unwrap().is_some());
            let outcome = if i == 1 {
                Err(AppError::upload_failed("bad header"))
            } else {
                Ok(None)
            };
            tracker.settle_file(id, Some(outcome)).unwrap();
            seen.push(tracker.run_state().overall_progress());
        }

        assert_eq!(seen, vec![33, 66, 100]);
        assert_eq!(
            tracker.batch().get(&ids[1]).unwrap().status(),
            FileStatus::Error
        );
        assert_eq!(
            tracker.batch().get(&ids[2]).unwrap().settled_order(),
            Some(3)
        );
    }

    #[test]
    fn test_abandon_run_settles_in_flight_file() {
        let mut tracker = UploadTracker::default();
        let ids = tracker.append(vec![raw("a.csv", 1), raw("b.csv", 1)]);
        tracker.begin_run().unwrap();
        tracker.start_file(&ids[0]).unwrap();

        tracker.abandon_run();

        assert_eq!(tracker.run_state(), RunState::Idle);
        let first = tracker.batch().get(&ids[0]).unwrap();
        assert_eq!(first.status(), FileStatus::Error);
        assert_eq!(
            first.result().unwrap().error.as_deref(),
            Some(INTERRUPTED_MESSAGE)
        );
        assert_eq!(
            tracker.batch().get(&ids[1]).unwrap().status(),
            FileStatus::Pending
        );
    }

    #[test]
    fn test_remove_failed_returns_raw_files() {
        let mut tracker = UploadTracker::default();
        let ids = tracker.append(vec![raw("a.csv", 1), raw("b.csv", 1)]);
        tracker.begin_run().unwrap();
        tracker.start_file(&ids[0]).unwrap();
        tracker
            .settle_file(&ids[0], Some(Err(AppError::upload_failed("nope"))))
            .unwrap();
        tracker.start_file(&ids[1]).unwrap();
        tracker.settle_file(&ids[1], Some(Ok(None))).unwrap();
        tracker.finish_run();

        let failed = tracker.remove_failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name(), "a.csv");
        assert_eq!(tracker.batch().len(), 1);
    }
}
