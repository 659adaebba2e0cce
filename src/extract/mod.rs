//! Patient metadata extraction.
//!
//! An extractor turns a file path into the four identity fields the pipeline
//! logs and uploads. Missing fields never fail the call; only a file that
//! cannot be read in the expected format does.

mod dicom;
#[cfg(test)]
pub(crate) mod fixtures;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use dicom::DicomExtractor;

/// Placeholder for an identity field the file does not carry
pub const UNKNOWN: &str = "Unknown";

/// Identity fields read from one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub name: String,
    pub id: String,
    pub birth_date: String,
    pub sex: String,
}

impl SubjectMetadata {
    /// Build from optional raw values; absent or blank values become `UNKNOWN`.
    pub fn from_fields(
        name: Option<String>,
        id: Option<String>,
        birth_date: Option<String>,
        sex: Option<String>,
    ) -> Self {
        Self {
            name: or_unknown(name),
            id: or_unknown(id),
            birth_date: or_unknown(birth_date),
            sex: or_unknown(sex),
        }
    }

    pub fn unknown() -> Self {
        Self::from_fields(None, None, None, None)
    }
}

fn or_unknown(value: Option<String>) -> String {
    value
        .map(|v| v.trim_end_matches(['\0', ' ']).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// A file could not be opened or parsed at all
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("cannot read {}: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },
}

/// Reads identity fields from a file. Implementations are stateless.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<SubjectMetadata, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fields_substitutes_unknown() {
        let meta = SubjectMetadata::from_fields(
            Some("Doe^Jane".to_string()),
            None,
            Some("   ".to_string()),
            Some("F\0".to_string()),
        );
        assert_eq!(meta.name, "Doe^Jane");
        assert_eq!(meta.id, UNKNOWN);
        assert_eq!(meta.birth_date, UNKNOWN);
        assert_eq!(meta.sex, "F");
    }

    #[test]
    fn test_unknown_has_all_fields_populated() {
        let meta = SubjectMetadata::unknown();
        for field in [&meta.name, &meta.id, &meta.birth_date, &meta.sex] {
            assert_eq!(field, UNKNOWN);
        }
    }
}
