pub mod chat;
pub mod chunking;
pub mod deletion;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod history;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod store;
pub mod stores;
pub mod tables;
pub mod traits;

#[cfg(test)]
mod testing;

pub use chat::{ChatFailure, ChatReply, ChatStage, RetrievalChatEngine};
pub use chunking::{chunk_size_for, make_chunk_id, ChunkingConfig, CorpusStats, RecursiveSplitter};
pub use deletion::{delete_document, DeletionFailure, DeletionReport, DeletionTarget};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    OPENAI_EMBEDDING_DIMENSIONS,
};
pub use error::{ChatError, ErrorClass, IndexError, IngestError, StorageError};
pub use extractor::{DocumentExtractor, LopdfExtractor, PdfExtractor};
pub use history::{InMemoryChatHistory, JsonlChatHistory};
pub use index::{EmbeddingIndex, NamespaceRetriever};
pub use ingest::{IngestionPipeline, ProcessingStrategy, StageOutcome};
pub use llm::{OpenAiChatModel, PromptMessage, PromptRole};
pub use models::{
    ChatOptions, ChatRole, ChatTurn, Chunk, ChunkMetadata, DocumentRecord, ExtractedPage,
    HistoryOrder, IndexOptions, IndexStats, IngestionOptions, RetrievedPassage, SourceDocument,
    VectorMatch, VectorRecord,
};
pub use store::LocalDocumentStore;
pub use stores::{MemoryVectorIndex, PineconeStore};
pub use tables::{ClassifiedPages, TableAwareSplitter};
pub use traits::{ChatHistoryStore, DocumentStore, LanguageModel, VectorIndex};
