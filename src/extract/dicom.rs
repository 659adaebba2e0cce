use std::path::Path;

use dicom_dictionary_std::tags;
use dicom_object::OpenFileOptions;

use super::{ExtractionError, MetadataExtractor, SubjectMetadata};

/// Reads the patient module of a DICOM Part-10 file. Parsing stops at the
/// pixel data, which is never loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomExtractor;

impl DicomExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataExtractor for DicomExtractor {
    fn extract(&self, path: &Path) -> Result<SubjectMetadata, ExtractionError> {
        let obj = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|e| ExtractionError::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        // Absent or unconvertible elements fall through to None.
        let field = |name: &str| {
            obj.element_by_name(name)
                .ok()
                .and_then(|elem| elem.to_str().ok())
                .map(|value| value.into_owned())
        };

        Ok(SubjectMetadata::from_fields(
            field("PatientName"),
            field("PatientID"),
            field("PatientBirthDate"),
            field("PatientSex"),
        ))
    }
}
