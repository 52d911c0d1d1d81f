use crate::models::{DocumentRecord, SourceDocument};
use crate::traits::DocumentStore;
use crate::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Uploaded files on local disk.
///
/// Layout under `root`:
/// - `users/<owner>/files/<doc_id>` holds the raw bytes
/// - `users/<owner>/records/<doc_id>.json` holds the [`DocumentRecord`]
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn owner_dir(&self, owner_id: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join("users").join(path_segment("owner id", owner_id)?))
    }

    fn file_path(&self, owner_id: &str, doc_id: &str) -> Result<PathBuf, StorageError> {
        Ok(self
            .owner_dir(owner_id)?
            .join("files")
            .join(path_segment("document id", doc_id)?))
    }

    fn record_path(&self, owner_id: &str, doc_id: &str) -> Result<PathBuf, StorageError> {
        let doc_id = path_segment("document id", doc_id)?;
        Ok(self
            .owner_dir(owner_id)?
            .join("records")
            .join(format!("{doc_id}.json")))
    }

    /// Writes the bytes first, then the record that makes the upload visible.
    pub async fn save(
        &self,
        document: &SourceDocument,
        name: &str,
    ) -> Result<DocumentRecord, StorageError> {
        let file_path = self.file_path(&document.owner_id, &document.id)?;
        let record_path = self.record_path(&document.owner_id, &document.id)?;

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file_path, &document.bytes).await?;

        let record = DocumentRecord {
            doc_id: document.id.clone(),
            owner_id: document.owner_id.clone(),
            name: name.to_string(),
            size: document.bytes.len() as u64,
            created_at: Utc::now(),
        };

        if let Some(parent) = record_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&record_path, serde_json::to_vec_pretty(&record)?).await?;

        debug!(doc_id = %record.doc_id, size = record.size, "stored upload");
        Ok(record)
    }

    pub async fn record(&self, owner_id: &str, doc_id: &str) -> Result<DocumentRecord, StorageError> {
        let path = self.record_path(owner_id, doc_id)?;
        let bytes = read_or_not_found(&path, owner_id, doc_id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Records owned by `owner_id`, oldest upload first.
    pub async fn list_records(&self, owner_id: &str) -> Result<Vec<DocumentRecord>, StorageError> {
        let dir = self.owner_dir(owner_id)?.join("records");
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            records.push(serde_json::from_slice::<DocumentRecord>(&bytes)?);
        }

        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }
}

fn path_segment<'a>(label: &str, value: &'a str) -> Result<&'a str, StorageError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\']);
    if invalid {
        return Err(StorageError::InvalidArgument(format!(
            "{label} '{value}' is not a valid path segment"
        )));
    }
    Ok(value)
}

async fn read_or_not_found(path: &Path, owner_id: &str, doc_id: &str) -> Result<Vec<u8>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(error) if error.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(
            format!("document {doc_id} of user {owner_id}"),
        )),
        Err(error) => Err(error.into()),
    }
}

/// Removing something that is already gone counts as success.
async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn load_document(&self, owner_id: &str, doc_id: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.file_path(owner_id, doc_id)?;
        read_or_not_found(&path, owner_id, doc_id).await
    }

    async fn delete_document(&self, owner_id: &str, doc_id: &str) -> Result<(), StorageError> {
        remove_if_present(&self.file_path(owner_id, doc_id)?).await
    }

    async fn delete_record(&self, owner_id: &str, doc_id: &str) -> Result<(), StorageError> {
        remove_if_present(&self.record_path(owner_id, doc_id)?).await
    }
}
