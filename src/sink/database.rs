use async_trait::async_trait;

use super::{Ack, SinkError, UploadSink, UploadUnit};
use crate::store::UploadStore;

/// Writes straight into the document store, no network hop
pub struct DatabaseSink {
    store: UploadStore,
}

impl DatabaseSink {
    pub fn new(store: UploadStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UploadSink for DatabaseSink {
    fn name(&self) -> &str {
        "database"
    }

    async fn send(&self, unit: &UploadUnit) -> std::result::Result<Ack, SinkError> {
        let bytes = unit.read_bytes().await?;
        let record = self
            .store
            .save(&unit.object_name, &bytes, &unit.metadata)
            .await
            .map_err(|e| SinkError::Store(e.to_string()))?;
        Ok(Ack {
            location: format!("db:{}", record.id),
        })
    }
}
