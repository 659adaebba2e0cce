use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{migrate, Db};
use crate::error::{DicomwatchError, Result};
use crate::extract::SubjectMetadata;
use crate::sink::secure_file_name;

/// One stored upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub id: String,
    pub file_name: String,
    pub patient_name: String,
    pub patient_id: String,
    pub birth_date: String,
    pub sex: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub received_at: String,
}

impl UploadRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file_name: row.get(1)?,
            patient_name: row.get(2)?,
            patient_id: row.get(3)?,
            birth_date: row.get(4)?,
            sex: row.get(5)?,
            sha256: row.get(6)?,
            size_bytes: row.get(7)?,
            received_at: row.get(8)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, file_name, patient_name, patient_id, birth_date, sex, \
                              sha256, size_bytes, received_at FROM uploads";

/// File bytes on disk plus identity fields in SQLite.
///
/// The stored file and its row change together: a save renames its bytes into
/// place and upserts the row inside one immediate transaction, and a read
/// takes the row and the bytes under the same lock.
#[derive(Debug, Clone)]
pub struct UploadStore {
    db: Db,
    upload_dir: PathBuf,
    writes: Arc<Mutex<()>>,
}

impl UploadStore {
    /// Open the store, creating the upload directory and applying migrations
    pub async fn open(db_path: &Path, upload_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(upload_dir).await?;
        let db = Db::new(db_path);
        db.with_connection(migrate::run_migrations).await?;
        Ok(Self {
            db,
            upload_dir: upload_dir.to_path_buf(),
            writes: Arc::new(Mutex::new(())),
        })
    }

    /// Store bytes and metadata under `file_name`. An existing upload with the
    /// same name is replaced.
    pub async fn save(
        &self,
        file_name: &str,
        bytes: &[u8],
        metadata: &SubjectMetadata,
    ) -> Result<UploadRecord> {
        let file_name = secure_file_name(file_name)
            .ok_or_else(|| DicomwatchError::InvalidInput(format!("unusable file name {:?}", file_name)))?;

        // Partial bytes never sit under the final name
        let part = self.upload_dir.join(format!(".{}.part", Uuid::new_v4()));
        tokio::fs::write(&part, bytes).await?;

        let record = UploadRecord {
            id: Uuid::new_v4().to_string(),
            file_name,
            patient_name: metadata.name.clone(),
            patient_id: metadata.id.clone(),
            birth_date: metadata.birth_date.clone(),
            sex: metadata.sex.clone(),
            sha256: format!("{:x}", Sha256::digest(bytes)),
            size_bytes: bytes.len() as i64,
            received_at: Utc::now().to_rfc3339(),
        };

        let target = self.upload_dir.join(&record.file_name);
        let row = record;
        let staged = part.clone();
        let _guard = self.writes.lock().await;
        let result = self
            .db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    r#"
                    INSERT INTO uploads (
                        id, file_name, patient_name, patient_id, birth_date, sex,
                        sha256, size_bytes, received_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT(file_name) DO UPDATE SET
                        patient_name = excluded.patient_name,
                        patient_id = excluded.patient_id,
                        birth_date = excluded.birth_date,
                        sex = excluded.sex,
                        sha256 = excluded.sha256,
                        size_bytes = excluded.size_bytes,
                        received_at = excluded.received_at
                    "#,
                    params![
                        row.id,
                        row.file_name,
                        row.patient_name,
                        row.patient_id,
                        row.birth_date,
                        row.sex,
                        row.sha256,
                        row.size_bytes,
                        row.received_at
                    ],
                )?;
                // On replace the original id survives; read back what is stored.
                let stored = tx.query_row(
                    &format!("{} WHERE file_name = ?1", SELECT_COLUMNS),
                    [&row.file_name],
                    UploadRecord::from_row,
                )?;
                std::fs::rename(&staged, &target)?;
                tx.commit()?;
                Ok(stored)
            })
            .await;

        let stored = match result {
            Ok(stored) => stored,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    log::debug!("Could not remove {}: {}", part.display(), cleanup);
                }
                return Err(e);
            }
        };

        log::debug!("Stored {} ({} bytes)", stored.file_name, stored.size_bytes);
        Ok(stored)
    }

    /// All uploads ordered by file name
    pub async fn list(&self) -> Result<Vec<UploadRecord>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare(&format!("{} ORDER BY file_name", SELECT_COLUMNS))?;
                let records = stmt
                    .query_map([], UploadRecord::from_row)?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(records)
            })
            .await
    }

    pub async fn get(&self, file_name: &str) -> Result<Option<UploadRecord>> {
        let file_name = file_name.to_string();
        self.db
            .with_connection(move |conn| {
                let record = conn
                    .query_row(
                        &format!("{} WHERE file_name = ?1", SELECT_COLUMNS),
                        [&file_name],
                        UploadRecord::from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await
    }

    /// Record and bytes for a stored upload, or `None` if the name is unknown
    pub async fn read(&self, file_name: &str) -> Result<Option<(UploadRecord, Vec<u8>)>> {
        let file_name = file_name.to_string();
        let upload_dir = self.upload_dir.clone();
        let _guard = self.writes.lock().await;
        self.db
            .with_connection(move |conn| {
                // Holds off saves from other processes while the bytes are read
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let record = tx
                    .query_row(
                        &format!("{} WHERE file_name = ?1", SELECT_COLUMNS),
                        [&file_name],
                        UploadRecord::from_row,
                    )
                    .optional()?;
                let Some(record) = record else {
                    return Ok(None);
                };
                let bytes = std::fs::read(upload_dir.join(&record.file_name))?;
                tx.commit()?;
                Ok(Some((record, bytes)))
            })
            .await
    }
}
