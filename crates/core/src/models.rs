use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// `source` value carried by the sentinel page of a failed extraction.
pub const ERROR_SOURCE: &str = "error";

pub const SCANNED_PLACEHOLDER_TEXT: &str =
    "This appears to be a scanned document. The system was able to extract limited text content.";

pub const EXTRACTION_ERROR_TEXT: &str =
    "Error processing PDF document. Please try again with a different file.";

pub const TEXT_METADATA_KEY: &str = "text";

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub owner_id: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    /// A fresh upload gets a random identifier, which also names its namespace.
    pub fn upload(owner_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub is_scanned_document: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedPage {
    pub text: String,
    pub metadata: PageMetadata,
}

impl ExtractedPage {
    pub fn new(text: impl Into<String>, source: impl Into<String>, page: u32) -> Self {
        Self {
            text: text.into(),
            metadata: PageMetadata {
                source: source.into(),
                page: Some(page),
                ..PageMetadata::default()
            },
        }
    }

    pub fn error_marker(message: impl Into<String>) -> Self {
        Self {
            text: EXTRACTION_ERROR_TEXT.to_string(),
            metadata: PageMetadata {
                source: ERROR_SOURCE.to_string(),
                error: Some(message.into()),
                ..PageMetadata::default()
            },
        }
    }

    pub fn scanned_placeholder(source: impl Into<String>) -> Self {
        Self {
            text: SCANNED_PLACEHOLDER_TEXT.to_string(),
            metadata: PageMetadata {
                source: source.into(),
                is_scanned_document: true,
                ..PageMetadata::default()
            },
        }
    }
}

pub fn is_error_sentinel(pages: &[ExtractedPage]) -> bool {
    pages.len() == 1 && pages[0].metadata.source == ERROR_SOURCE
}

pub fn is_scanned_placeholder(pages: &[ExtractedPage]) -> bool {
    pages.len() == 1 && pages[0].metadata.is_scanned_document
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page: Option<u32>,
    pub contains_table: bool,
    pub preserve_structure: bool,
    pub is_scanned_document: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub chunk_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Carries page provenance over; id, doc id and index are stamped later.
    pub fn from_page(page: &ExtractedPage, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            metadata: ChunkMetadata {
                source: page.metadata.source.clone(),
                source_page: page.metadata.page,
                is_scanned_document: page.metadata.is_scanned_document,
                error: page.metadata.error.clone(),
                ..ChunkMetadata::default()
            },
        }
    }

    pub fn is_error_marker(&self) -> bool {
        self.metadata.source == ERROR_SOURCE
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Human,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: ChatRole,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn human(message: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Human,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(message: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOrder {
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NamespaceStats {
    pub record_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub namespaces: HashMap<String, NamespaceStats>,
    pub dimension: Option<usize>,
    pub total_record_count: u64,
}

impl IndexStats {
    pub fn record_count(&self, namespace: &str) -> u64 {
        self.namespaces
            .get(namespace)
            .map(|stats| stats.record_count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

impl VectorRecord {
    /// Flattens chunk metadata next to the chunk text, skipping absent fields.
    pub fn from_chunk(chunk: &Chunk, values: Vec<f32>) -> Result<Self, serde_json::Error> {
        let mut metadata = match serde_json::to_value(&chunk.metadata)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        metadata.insert(
            TEXT_METADATA_KEY.to_string(),
            Value::String(chunk.text.clone()),
        );

        Ok(Self {
            id: chunk.id.clone(),
            values,
            metadata,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedPassage {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

impl From<VectorMatch> for RetrievedPassage {
    fn from(matched: VectorMatch) -> Self {
        let text = matched
            .metadata
            .get(TEXT_METADATA_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let metadata =
            serde_json::from_value(Value::Object(matched.metadata)).unwrap_or_default();

        Self {
            id: matched.id,
            text,
            score: matched.score,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub doc_id: String,
    pub owner_id: String,
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_overlap_chars: usize,
    pub fallback_chunk_chars: usize,
    pub fallback_overlap_chars: usize,
    pub scanned_min_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_overlap_chars: 200,
            fallback_chunk_chars: 1_000,
            fallback_overlap_chars: 200,
            scanned_min_chars: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub index_name: String,
    pub top_k: usize,
    pub upsert_batch_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            index_name: "chat-with-pdf-ai".to_string(),
            top_k: 4,
            upsert_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Most recent turns fed to the model; `None` reads the whole log.
    pub history_limit: Option<usize>,
    pub rewrite_instruction: String,
    pub answer_instruction: String,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            history_limit: Some(20),
            rewrite_instruction: "Given the above conversation, generate a search query to look up in order to get information relevant to the conversation".to_string(),
            answer_instruction: "Answer the user's questions based on the below context:\n\n{context}".to_string(),
        }
    }
}
