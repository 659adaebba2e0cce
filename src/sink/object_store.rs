use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{Ack, SinkError, UploadSink, UploadUnit};
use crate::config::ObjectStoreConfig;
use crate::error::{DicomwatchError, Result};

/// PUT of the raw file into an S3-style bucket with the identity fields as
/// `x-amz-meta-*` object metadata
pub struct ObjectStoreSink {
    client: Client,
    bucket_url: url::Url,
    prefix: String,
}

impl ObjectStoreSink {
    pub fn new(config: &ObjectStoreConfig, timeout: Duration) -> Result<Self> {
        let mut bucket_url = url::Url::parse(&config.endpoint).map_err(|e| {
            DicomwatchError::Config(format!("invalid object store endpoint {}: {}", config.endpoint, e))
        })?;
        // Trailing slash so join() appends instead of replacing the last segment.
        let path = format!("{}/{}/", bucket_url.path().trim_end_matches('/'), config.bucket.trim_matches('/'));
        bucket_url.set_path(&path);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DicomwatchError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bucket_url,
            prefix: config.prefix.trim_start_matches('/').to_string(),
        })
    }

    fn object_url(&self, object_name: &str) -> std::result::Result<url::Url, SinkError> {
        self.bucket_url
            .join(&format!("{}{}", self.prefix, object_name))
            .map_err(|e| SinkError::InvalidName(format!("{}: {}", object_name, e)))
    }
}

/// Header-safe metadata value; anything outside printable ASCII is percent-encoded.
fn header_value(value: &str) -> String {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        value.to_string()
    } else {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }
}

#[async_trait]
impl UploadSink for ObjectStoreSink {
    fn name(&self) -> &str {
        "object_store"
    }

    async fn send(&self, unit: &UploadUnit) -> std::result::Result<Ack, SinkError> {
        let url = self.object_url(&unit.object_name)?;
        let bytes = unit.read_bytes().await?;

        let response = self
            .client
            .put(url.clone())
            .header("Content-Type", "application/dicom")
            .header("x-amz-meta-patient-name", header_value(&unit.metadata.name))
            .header("x-amz-meta-patient-id", header_value(&unit.metadata.id))
            .header("x-amz-meta-patient-birth-date", header_value(&unit.metadata.birth_date))
            .header("x-amz-meta-patient-sex", header_value(&unit.metadata.sex))
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
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
            location: url.to_string(),
        })
    }
}
