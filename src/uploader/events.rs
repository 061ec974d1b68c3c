use super::intake::RawFile;
use super::upload_queue::UploadResult;

/// Host-facing notifications. Every method defaults to doing nothing, so a
/// host only overrides what it shows.
pub trait UploadEvents: Send + Sync {
    /// The full current selection, after any accepted addition or removal
    fn selection_changed(&self, _files: &[RawFile]) {}

    /// All rejections of one intake pass, joined into one message
    fn validation_error(&self, _message: &str) {}

    /// Overall run progress after each file settles
    fn progress(&self, _percent: u8) {}

    /// Fired once per run with every result in completion order
    fn upload_completed(&self, _results: &[UploadResult]) {}
}

/// Host that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl UploadEvents for NoopEvents {}
