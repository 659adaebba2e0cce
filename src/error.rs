use std::path::PathBuf;
use thiserror::Error;

use crate::extract::ExtractionError;
use crate::sink::SinkError;

/// Main error type for dicomwatch
#[derive(Error, Debug)]
pub enum DicomwatchError {
    /// Document store errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A file could not be read as DICOM
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// An upload destination rejected or failed a unit
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// The watch directory could not be registered
    #[error("Cannot watch {}: {message}", directory.display())]
    WatchSetup { directory: PathBuf, message: String },

    /// `start` called on a pipeline that is already watching
    #[error("Already watching {}", .0.display())]
    AlreadyWatching(PathBuf),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using DicomwatchError
pub type Result<T> = std::result::Result<T, DicomwatchError>;
