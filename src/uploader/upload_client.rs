use async_trait::async_trait;
use regex::Regex;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::sync::OnceLock;
use tokio::time::Duration;

use crate::config::UploaderConfig;
use crate::errors::{AppError, AppResult, UPLOAD_FAILED_FALLBACK};

use super::intake::RawFile;

/// Multipart field the endpoint reads the file from
pub const FILE_FIELD_NAME: &str = "file";

/// Sends one file to the upload endpoint.
///
/// `Ok` carries the locator the endpoint assigned to the stored artifact.
/// Endpoint-reported failures come back as [`AppError::UploadFailed`];
/// anything else is a transport failure.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(&self, file: &RawFile) -> AppResult<Option<String>>;
}

/// Body returned by the endpoint. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct EndpointResponse {
    pub success: Option<bool>,
    pub file_path: Option<String>,
    pub path: Option<String>,
    /// Usually a string, but some frameworks return structured detail
    pub detail: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl EndpointResponse {
    pub fn locator(&self) -> Option<String> {
        self.file_path.clone().or_else(|| self.path.clone())
    }

    pub fn failure_message(&self) -> String {
        let detail = self.detail.as_ref().and_then(|d| match d {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

        detail
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.error.clone().filter(|m| !m.trim().is_empty()))
            .unwrap_or_else(|| UPLOAD_FAILED_FALLBACK.to_string())
    }
}

/// Turn a raw endpoint reply into a locator or an error.
///
/// 2xx is a success unless the body says `success: false`. A 2xx body that
/// does not decode is treated as a transport failure.
pub fn interpret_response(status: u16, body: &str) -> AppResult<Option<String>> {
    if (200..300).contains(&status) {
        let response: EndpointResponse = serde_json::from_str(body)?;

        if response.success == Some(false) {
            return Err(AppError::upload_failed(&response.failure_message()));
        }

        return Ok(response.locator());
    }

    let response: EndpointResponse = serde_json::from_str(body).unwrap_or_else(|e| {
        log::debug!("Non-JSON error body from upload endpoint ({}): {}", status, e);
        EndpointResponse::default()
    });

    log::warn!(
        "Upload endpoint returned {}: {}",
        status,
        response.failure_message()
    );
    Err(AppError::upload_failed(&response.failure_message()))
}

/// Multipart endpoint client
pub struct HttpUploadClient {
    client: Client,
    url: String,
}

impl HttpUploadClient {
    pub fn new(url: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.trim().to_string(),
        })
    }

    /// `None` when the config has no endpoint
    pub fn from_config(config: &UploaderConfig) -> AppResult<Option<Self>> {
        match &config.upload_url {
            Some(url) => Ok(Some(Self::new(
                url,
                Duration::from_secs(config.request_timeout_secs),
            )?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UploadTransport for HttpUploadClient {
    async fn upload(&self, file: &RawFile) -> AppResult<Option<String>> {
        let payload = UploadPayload::from_file(file).await?;
        let form = payload.build_form()?;

        log::debug!(
            "POST {} ({}, {} bytes)",
            self.url,
            file.name(),
            file.size()
        );

        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        log::debug!(
            "Upload endpoint response {} (first 300 chars): {}",
            status,
            &body[..floor_char_boundary(&body, 300)]
        );

        interpret_response(status.as_u16(), &body)
    }
}

/// One file ready to be sent as a multipart form
#[derive(Debug, Clone)]
pub struct UploadPayload {
    filename: String,
    data: Vec<u8>,
    mime_type: String,
}

impl UploadPayload {
    pub async fn from_file(file: &RawFile) -> AppResult<Self> {
        Ok(Self {
            filename: sanitize_filename(file.name()),
            data: file.read_bytes().await?,
            mime_type: file.media_type().to_string(),
        })
    }

    /// Consumes the payload so the file bytes move into the request body
    pub fn build_form(self) -> AppResult<multipart::Form> {
        let part = multipart::Part::bytes(self.data)
            .file_name(self.filename)
            .mime_str(&self.mime_type)?;

        Ok(multipart::Form::new().part(FILE_FIELD_NAME, part))
    }
}

fn unsafe_filename_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| {
        Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("filename pattern is valid")
    })
}

/// Replace characters that are unsafe in a multipart filename
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized = unsafe_filename_chars().replace_all(filename.trim(), "_");

    if sanitized.len() > 255 {
        format!("{}...", &sanitized[..floor_char_boundary(&sanitized, 252)])
    } else {
        sanitized.to_string()
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
