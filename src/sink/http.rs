use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Client};
use std::time::Duration;

use super::{Ack, SinkError, UploadSink, UploadUnit};
use crate::error::{DicomwatchError, Result};

/// Multipart POST to an upload endpoint
///
/// Sends the file as part `file` and the identity fields as
/// `patient_name`, `patient_id`, `patient_birth_date` and `patient_sex`.
/// Redirects are not followed: a 3xx reply means the upload was stored.
pub struct HttpSink {
    client: Client,
    url: url::Url,
}

impl HttpSink {
    /// Create the sink. The client is built once and reused for every upload.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url::Url::parse(url)
            .map_err(|e| DicomwatchError::Config(format!("invalid upload url {}: {}", url, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| DicomwatchError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl UploadSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, unit: &UploadUnit) -> std::result::Result<Ack, SinkError> {
        let bytes = unit.read_bytes().await?;
        let file_part = Part::bytes(bytes)
            .file_name(unit.object_name.clone())
            .mime_str("application/dicom")?;

        let form = Form::new()
            .part("file", file_part)
            .text("patient_name", unit.metadata.name.clone())
            .text("patient_id", unit.metadata.id.clone())
            .text("patient_birth_date", unit.metadata.birth_date.clone())
            .text("patient_sex", unit.metadata.sex.clone());

        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(SinkError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(Ack {
            location: format!("{}#{}", self.url, unit.object_name),
        })
    }
}
