//! Upload destinations.
//!
//! A sink receives one `UploadUnit` at a time and reports an `Ack` or a
//! `SinkError`. The pipeline never retries; a failed unit is logged and dropped.

mod database;
mod http;
mod object_store;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Config, SinkKind};
use crate::error::{DicomwatchError, Result};
use crate::extract::SubjectMetadata;
use crate::store::UploadStore;

pub use database::DatabaseSink;
pub use http::HttpSink;
pub use object_store::ObjectStoreSink;

/// One file plus its metadata, handed to a sink exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUnit {
    pub path: PathBuf,
    pub metadata: SubjectMetadata,
    /// Storage-safe name derived from the file's basename
    pub object_name: String,
}

impl UploadUnit {
    pub fn new(path: &Path, metadata: SubjectMetadata) -> std::result::Result<Self, SinkError> {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let object_name = secure_file_name(&basename)
            .ok_or_else(|| SinkError::InvalidName(basename.clone()))?;
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            object_name,
        })
    }

    /// Read the file bytes for upload
    pub async fn read_bytes(&self) -> std::result::Result<Vec<u8>, SinkError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// Successful delivery receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Where the destination says the file now lives
    pub location: String,
}

/// Delivery failure. Carries enough detail to log, never enough to crash.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("destination returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("no usable object name in {0:?}")]
    InvalidName(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => SinkError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => SinkError::Transport(e.to_string()),
        }
    }
}

/// Remote destination for uploaded files
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    async fn send(&self, unit: &UploadUnit) -> std::result::Result<Ack, SinkError>;
}

/// Sanitize a client-supplied file name so it is safe as a single path segment.
///
/// Keeps ASCII letters, digits, `.`, `-` and `_`; whitespace becomes `_`;
/// everything else is dropped. Leading dots and underscores are stripped.
/// Returns `None` when nothing usable is left.
pub fn secure_file_name(name: &str) -> Option<String> {
    // Only the final component counts, whichever separator the client used.
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Build the sink selected by `[sink] kind`
pub async fn from_config(config: &Config) -> Result<Arc<dyn UploadSink>> {
    let timeout = Duration::from_secs(config.sink.timeout_secs);
    let sink: Arc<dyn UploadSink> = match config.sink.kind {
        SinkKind::Http => Arc::new(HttpSink::new(&config.sink.http.url, timeout)?),
        SinkKind::ObjectStore => {
            let store_config = config.sink.object_store.as_ref().ok_or_else(|| {
                DicomwatchError::Config("missing [sink.object_store] section".to_string())
            })?;
            Arc::new(ObjectStoreSink::new(store_config, timeout)?)
        }
        SinkKind::Database => {
            let store = UploadStore::open(config.db_path(), config.upload_dir()).await?;
            Arc::new(DatabaseSink::new(store))
        }
    };
    log::info!("Upload sink: {}", sink.name());
    Ok(sink)
}
