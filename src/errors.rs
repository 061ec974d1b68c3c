use thiserror::Error;

/// Fallback message when neither the endpoint nor the transport says anything useful
pub const UPLOAD_FAILED_FALLBACK: &str = "Upload failed";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // Validation rejections, reported in aggregate per intake pass
    #[error("Maximum {max_files} files allowed")]
    TooManyFiles { max_files: usize },

    #[error("{name} has already been selected")]
    DuplicateFile { name: String },

    #[error("{name} is not an accepted file type (accepted: {accept})")]
    InvalidFileType { name: String, accept: String },

    #[error("{name} is too large. Maximum size is {max_size_mb}MB.")]
    FileTooLarge { name: String, max_size_mb: u64 },

    #[error("Only one file may be selected: {name}")]
    SingleFileOnly { name: String },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("An upload run is already in progress")]
    RunInProgress,

    #[error("No upload endpoint configured")]
    NoEndpoint,

    #[error("File {id} not found in the current selection")]
    UnknownFile { id: String },

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn duplicate_file(name: &str) -> Self {
        Self::DuplicateFile {
            name: name.to_string(),
        }
    }

    pub fn invalid_file_type(name: &str, accept: &str) -> Self {
        Self::InvalidFileType {
            name: name.to_string(),
            accept: accept.to_string(),
        }
    }

    pub fn file_too_large(name: &str, max_size_mb: u64) -> Self {
        Self::FileTooLarge {
            name: name.to_string(),
            max_size_mb,
        }
    }

    pub fn upload_failed(reason: &str) -> Self {
        Self::UploadFailed {
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Network(_) | AppError::UploadFailed { .. } | AppError::Io(_)
        )
    }

    /// Message recorded on a file that ended in the error state.
    ///
    /// Endpoint failures carry the server's own text; anything else uses the
    /// error's display form.
    pub fn upload_message(&self) -> String {
        match self {
            AppError::UploadFailed { reason } if reason.trim().is_empty() => {
                UPLOAD_FAILED_FALLBACK.to_string()
            }
            AppError::UploadFailed { reason } => reason.clone(),
            other => {
                let message = other.to_string();
                if message.trim().is_empty() {
                    UPLOAD_FAILED_FALLBACK.to_string()
                } else {
                    message
                }
            }
        }
    }
}
