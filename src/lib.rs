//! Batch file upload orchestrator.
//!
//! Files come in from a picker or a drop surface, are validated against
//! type, size, count and duplicate rules, then uploaded one at a time to a
//! multipart endpoint while each file's lifecycle is tracked.

pub mod config;
pub mod errors;
pub mod uploader;

pub use config::UploaderConfig;
pub use errors::{AppError, AppResult};
pub use uploader::{
    CancelHandle, FileUploader, RawFile, SelectionSource, UploadEvents, UploadResult,
};
