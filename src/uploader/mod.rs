// Uploader module - orchestrates selection, validation and sequential uploads
//
// Intake -> validator -> tracker -> reporter. The tracker is the only mutable
// state; everything else reads snapshots of it.

pub mod events;
pub mod intake;
pub mod progress_tracker;
pub mod report;
pub mod upload_client;
pub mod upload_queue;
pub mod validator;

use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{validate_config, UploaderConfig};
use crate::errors::{AppError, AppResult};

pub use events::{NoopEvents, UploadEvents};
pub use intake::{RawFile, SelectionSource};
pub use progress_tracker::{BatchSnapshot, CancelHandle};
pub use report::RunSummary;
pub use upload_client::{HttpUploadClient, UploadTransport};
pub use upload_queue::{FileId, FileStatus, RunState, SelectedFile, UploadResult};

use progress_tracker::SharedTracker;
use upload_queue::process_upload_queue;
use validator::{join_rejections, validate_selection, ValidationRules};

/// Host-facing batch uploader
pub struct FileUploader {
    config: UploaderConfig,
    rules: ValidationRules,
    tracker: SharedTracker,
    transport: Option<Arc<dyn UploadTransport>>,
    events: Arc<dyn UploadEvents>,
    cancel: CancelHandle,
}

impl FileUploader {
    /// Uploader talking to the configured endpoint over HTTP. Without an
    /// `upload_url` it only tracks the selection.
    pub fn new(config: UploaderConfig) -> AppResult<Self> {
        let transport = HttpUploadClient::from_config(&config)?
            .map(|client| Arc::new(client) as Arc<dyn UploadTransport>);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: UploaderConfig,
        transport: Option<Arc<dyn UploadTransport>>,
    ) -> AppResult<Self> {
        validate_config(&config)?;

        Ok(Self {
            rules: ValidationRules::from_config(&config),
            config,
            tracker: SharedTracker::default(),
            transport,
            events: Arc::new(NoopEvents),
            cancel: CancelHandle::default(),
        })
    }

    pub fn with_events(mut self, events: Arc<dyn UploadEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Add files the host already holds
    pub fn add_files(
        &self,
        source: SelectionSource,
        files: Vec<RawFile>,
    ) -> AppResult<Vec<FileId>> {
        self.intake(source, files, Vec::new())
    }

    /// Add files from disk. Paths that cannot be read are reported alongside
    /// the validation rejections of the same pass.
    pub async fn add_paths<P: AsRef<Path>>(
        &self,
        source: SelectionSource,
        paths: &[P],
    ) -> AppResult<Vec<FileId>> {
        let mut candidates = Vec::with_capacity(paths.len());
        let mut unreadable = Vec::new();

        for path in paths {
            match RawFile::from_path(path).await {
                Ok(file) => candidates.push(file),
                Err(e) => {
                    log::warn!("Cannot read {}: {}", path.as_ref().display(), e);
                    unreadable.push(e);
                }
            }
        }

        self.intake(source, candidates, unreadable)
    }

    fn intake(
        &self,
        source: SelectionSource,
        candidates: Vec<RawFile>,
        mut rejections: Vec<AppError>,
    ) -> AppResult<Vec<FileId>> {
        if candidates.is_empty() && rejections.is_empty() {
            log::debug!("Empty selection from {}, nothing to do", source);
            return Ok(Vec::new());
        }

        let candidate_count = candidates.len();
        let multiple = self.config.multiple;
        let rules = &self.rules;

        let (ids, selection) = self.tracker.update("intake", |tracker| {
            let outcome = if multiple {
                let existing = tracker.batch().raw_files();
                validate_selection(candidates, &existing, rules)
            } else {
                // The new selection replaces the old one, so only rules
                // local to this pass apply
                validate_selection(candidates, &[], rules)
            };
            rejections.extend(outcome.rejections);

            let mut accepted = outcome.accepted.into_iter();
            let ids = if multiple {
                let accepted: Vec<RawFile> = accepted.collect();
                if accepted.is_empty() {
                    Vec::new()
                } else {
                    tracker.append(accepted)
                }
            } else {
                match accepted.next() {
                    Some(first) => {
                        // Single mode keeps the first valid file of the pass
                        rejections.extend(accepted.map(|extra| AppError::SingleFileOnly {
                            name: extra.name().to_string(),
                        }));
                        vec![tracker.replace(first)?]
                    }
                    None => Vec::new(),
                }
            };

            Ok((ids, self.current_raw_files(tracker)))
        })?;

        log::info!(
            "Accepted {} of {} files from {}",
            ids.len(),
            candidate_count,
            source
        );

        if let Some(message) = join_rejections(&rejections) {
            self.events.validation_error(&message);
        }
        if !ids.is_empty() {
            self.events.selection_changed(&selection);
        }

        Ok(ids)
    }

    /// Remove one file. Refused while a run is active.
    pub fn remove_file(&self, id: &FileId) -> AppResult<RawFile> {
        let (removed, selection) = self.tracker.update("remove file", |tracker| {
            let removed = tracker.remove(id)?;
            Ok((removed, self.current_raw_files(tracker)))
        })?;

        log::info!("Removed {} from selection", removed.name());
        self.events.selection_changed(&selection);
        Ok(removed)
    }

    /// Drop the whole selection. Refused while a run is active.
    pub fn clear_files(&self) -> AppResult<()> {
        self.tracker.update("clear files", |tracker| tracker.clear())?;

        log::info!("Selection cleared");
        self.events.selection_changed(&[]);
        Ok(())
    }

    /// Drop every errored file and return it so the host can add it again
    pub fn remove_failed(&self) -> AppResult<Vec<RawFile>> {
        let (failed, selection) = self.tracker.update("remove failed", |tracker| {
            let failed = tracker.remove_failed()?;
            Ok((failed, self.current_raw_files(tracker)))
        })?;

        if !failed.is_empty() {
            log::info!("Removed {} failed files from selection", failed.len());
            self.events.selection_changed(&selection);
        }
        Ok(failed)
    }

    fn current_raw_files(&self, tracker: &upload_queue::UploadTracker) -> Vec<RawFile> {
        tracker
            .batch()
            .files()
            .iter()
            .map(|f| f.raw_file().clone())
            .collect()
    }

    /// Upload every pending file, one at a time, in selection order.
    ///
    /// Resolves with the same results the completion event carries. Fails
    /// with [`AppError::RunInProgress`] when another run owns the batch and
    /// with [`AppError::NoEndpoint`] when no endpoint is configured.
    pub async fn start_upload(&self) -> AppResult<RunSummary> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            log::warn!("Upload requested but no upload endpoint is configured");
            AppError::NoEndpoint
        })?;

        process_upload_queue(
            &self.tracker,
            transport.as_ref(),
            &self.cancel,
            self.events.as_ref(),
        )
        .await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchSnapshot> {
        self.tracker.subscribe()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.tracker.snapshot()
    }

    pub fn files(&self) -> Vec<SelectedFile> {
        self.snapshot().files
    }

    pub fn results(&self) -> Vec<UploadResult> {
        report::results_in_completion_order(&self.snapshot().files)
    }

    pub fn has_success(&self) -> bool {
        report::has_success(&self.snapshot().files)
    }

    pub fn has_pending(&self) -> bool {
        report::has_pending(&self.snapshot().files)
    }

    pub fn is_uploading(&self) -> bool {
        self.snapshot().is_uploading()
    }
}
