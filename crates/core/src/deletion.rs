use crate::traits::{DocumentStore, VectorIndex};
use crate::IndexError;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionTarget {
    Metadata,
    Storage,
    Vectors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub target: DeletionTarget,
    pub message: String,
    pub retriable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub doc_id: String,
    pub success: bool,
    /// First failure in metadata, storage, vectors order, or a success note.
    pub message: String,
    pub retriable: bool,
    pub failures: Vec<DeletionFailure>,
}

impl DeletionReport {
    fn from_failures(doc_id: &str, failures: Vec<DeletionFailure>) -> Self {
        match failures.first() {
            None => Self {
                doc_id: doc_id.to_string(),
                success: true,
                message: "Document successfully deleted".to_string(),
                retriable: false,
                failures,
            },
            Some(first) => Self {
                doc_id: doc_id.to_string(),
                success: false,
                message: first.message.clone(),
                retriable: first.retriable,
                failures,
            },
        }
    }

    fn rejected(doc_id: &str, message: &str) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            success: false,
            message: message.to_string(),
            retriable: false,
            failures: Vec::new(),
        }
    }
}

/// Removes the metadata record, the stored file and the vector namespace of
/// `doc_id` concurrently. All three are attempted whatever the others do;
/// nothing is rolled back.
pub async fn delete_document(
    owner_id: &str,
    doc_id: &str,
    documents: &dyn DocumentStore,
    index: &dyn VectorIndex,
) -> DeletionReport {
    if owner_id.is_empty() {
        return DeletionReport::rejected(doc_id, "User id is required");
    }
    if doc_id.is_empty() {
        return DeletionReport::rejected(doc_id, "Document ID is required");
    }

    let (metadata, storage, vectors) = tokio::join!(
        documents.delete_record(owner_id, doc_id),
        documents.delete_document(owner_id, doc_id),
        delete_namespace(index, doc_id),
    );

    let mut failures = Vec::new();
    if let Err(error) = metadata {
        failures.push(DeletionFailure {
            target: DeletionTarget::Metadata,
            message: format!("Failed to delete document metadata: {error}"),
            retriable: false,
        });
    }
    if let Err(error) = storage {
        failures.push(DeletionFailure {
            target: DeletionTarget::Storage,
            message: format!("Failed to delete file from storage: {error}"),
            retriable: false,
        });
    }
    if let Err(error) = vectors {
        failures.push(vector_failure(index.index_name(), &error));
    }

    let report = DeletionReport::from_failures(doc_id, failures);
    if report.success {
        info!(doc_id, "document deleted");
    } else {
        warn!(
            doc_id,
            failures = report.failures.len(),
            retriable = report.retriable,
            message = %report.message,
            "document deletion incomplete"
        );
    }
    report
}

/// Deletes only namespaces the stats list. Unreadable stats mean the
/// deletion is attempted anyway.
async fn delete_namespace(index: &dyn VectorIndex, doc_id: &str) -> Result<(), IndexError> {
    match index.describe_stats().await {
        Ok(stats) if stats.namespaces.contains_key(doc_id) => {
            index.delete_all(doc_id).await?;
            info!(doc_id, "deleted vectors for namespace");
        }
        Ok(_) => {
            info!(doc_id, "namespace not in index, nothing to delete");
        }
        Err(error) => {
            warn!(doc_id, error = %error, "namespace stats unavailable, deleting anyway");
            index.delete_all(doc_id).await?;
        }
    }
    Ok(())
}

fn vector_failure(index_name: &str, error: &IndexError) -> DeletionFailure {
    if error.is_transient() {
        DeletionFailure {
            target: DeletionTarget::Vectors,
            message: format!(
                "Vector index '{index_name}' may be temporarily unavailable. Please try again later. Error: {error}"
            ),
            retriable: true,
        }
    } else {
        DeletionFailure {
            target: DeletionTarget::Vectors,
            message: format!("Failed to delete vector embeddings: {error}"),
            retriable: false,
        }
    }
}
