use crate::llm::PromptMessage;
use crate::models::{ChatTurn, HistoryOrder, IndexStats, VectorMatch, VectorRecord};
use crate::{ChatError, IndexError, StorageError};
use async_trait::async_trait;

/// A vector index partitioned into namespaces, one per source document.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn index_name(&self) -> &str;

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError>;

    async fn describe_stats(&self) -> Result<IndexStats, IndexError>;

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, IndexError>;

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError>;

    async fn delete_all(&self, namespace: &str) -> Result<(), IndexError>;
}

/// Append-only chat log per (user, document).
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn append(&self, user_id: &str, doc_id: &str, turn: ChatTurn) -> Result<(), StorageError>;

    async fn list(
        &self,
        user_id: &str,
        doc_id: &str,
        order: HistoryOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ChatTurn>, StorageError>;
}

/// Uploaded file bytes and their metadata record.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_document(&self, owner_id: &str, doc_id: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete_document(&self, owner_id: &str, doc_id: &str) -> Result<(), StorageError>;

    async fn delete_record(&self, owner_id: &str, doc_id: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ChatError>;
}
