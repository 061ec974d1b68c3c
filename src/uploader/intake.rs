use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{AppError, AppResult};

/// Where a selection came from. Both origins feed the same pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Picker,
    Drop,
}

impl fmt::Display for SelectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionSource::Picker => write!(f, "picker"),
            SelectionSource::Drop => write!(f, "drop"),
        }
    }
}

/// Backing bytes of a selected file
#[derive(Debug, Clone)]
enum FilePayload {
    /// Read from disk when the upload happens
    Disk(PathBuf),
    Memory(Arc<[u8]>),
}

/// A user-chosen file as handed over by the host. Never mutated once built.
#[derive(Debug, Clone)]
pub struct RawFile {
    name: String,
    size: u64,
    media_type: String,
    payload: FilePayload,
}

impl RawFile {
    /// Build a file from bytes the host already holds. The media type is
    /// guessed from the name when the host does not declare one.
    pub fn from_bytes(name: &str, media_type: Option<&str>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.to_string(),
            size: bytes.len() as u64,
            media_type: media_type
                .map(str::to_string)
                .unwrap_or_else(|| guess_media_type(name).to_string()),
            payload: FilePayload::Memory(Arc::from(bytes)),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::file_not_found(&path.to_string_lossy()));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(Self {
            media_type: guess_media_type(&name).to_string(),
            name,
            size: metadata.len(),
            payload: FilePayload::Disk(path.to_path_buf()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub async fn read_bytes(&self) -> AppResult<Vec<u8>> {
        match &self.payload {
            FilePayload::Disk(path) => Ok(tokio::fs::read(path).await?),
            FilePayload::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

/// Detect MIME type based on file extension
pub fn guess_media_type(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("csv") => "text/csv",
        Some("tsv") => "text/tab-separated-values",
        Some("txt") | Some("log") => "text/plain",
        Some("json") => "application/json",
        Some("parquet") => "application/vnd.apache.parquet",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("npy") | Some("npz") | Some("h5") | Some("pt") | Some("pth") => {
            "application/octet-stream"
        }
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Regular files directly inside a dropped directory, sorted by name
pub async fn read_dropped_directory(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_file() {
            paths.push(entry.path());
        } else {
            log::debug!("Skipping non-file entry in drop: {}", entry.path().display());
        }
    }

    paths.sort();
    Ok(paths)
}
