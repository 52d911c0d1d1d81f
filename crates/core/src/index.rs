use crate::embeddings::Embedder;
use crate::ingest::IngestionPipeline;
use crate::models::{IndexOptions, RetrievedPassage, SourceDocument, VectorRecord};
use crate::traits::{DocumentStore, VectorIndex};
use crate::IndexError;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct NamespaceRetriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    namespace: String,
    top_k: usize,
    reused: bool,
}

impl NamespaceRetriever {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reused_existing(&self) -> bool {
        self.reused
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>, IndexError> {
        let vector = self.embedder.embed_query(query).await?;
        let matches = self.index.query(&self.namespace, &vector, self.top_k).await?;
        debug!(
            namespace = %self.namespace,
            matches = matches.len(),
            "retrieved passages"
        );
        Ok(matches.into_iter().map(RetrievedPassage::from).collect())
    }
}

/// Maps each document to its own namespace and embeds it at most once.
///
/// Existence is checked before writing but nothing is locked: two first
/// uploads of the same document racing each other can both embed it.
pub struct EmbeddingIndex {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    documents: Arc<dyn DocumentStore>,
    pipeline: IngestionPipeline,
    options: IndexOptions,
}

impl EmbeddingIndex {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        documents: Arc<dyn DocumentStore>,
        pipeline: IngestionPipeline,
        options: IndexOptions,
    ) -> Self {
        Self {
            index,
            embedder,
            documents,
            pipeline,
            options,
        }
    }

    pub fn vector_index(&self) -> Arc<dyn VectorIndex> {
        Arc::clone(&self.index)
    }

    /// Fails unless the configured index is provisioned; creating it is an
    /// operator task.
    pub async fn check_index(&self) -> Result<(), IndexError> {
        let name = self.options.index_name.as_str();
        if name != self.index.index_name() {
            warn!(
                configured = name,
                bound = self.index.index_name(),
                "index handle is bound to a different index"
            );
        }

        let indexes = self.index.list_indexes().await?;

        if !indexes.iter().any(|candidate| candidate == name) {
            warn!(index = name, available = ?indexes, "vector index does not exist");
            return Err(IndexError::IndexNotFound(name.to_string()));
        }

        debug!(index = name, "vector index exists");
        Ok(())
    }

    /// Stats OR a zero-vector probe. Either signal failing counts as absent
    /// for that signal only.
    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool, IndexError> {
        if namespace.is_empty() {
            return Err(IndexError::MissingIdentifier("namespace"));
        }

        let in_stats = match self.index.describe_stats().await {
            Ok(stats) => {
                let record_count = stats.record_count(namespace);
                debug!(namespace, record_count, "namespace stats");
                record_count > 0
            }
            Err(error) => {
                warn!(namespace, error = %error, "index stats unavailable");
                false
            }
        };

        let probe = vec![0.0f32; self.embedder.dimensions()];
        let has_vectors = match self.index.query(namespace, &probe, 1).await {
            Ok(matches) => !matches.is_empty(),
            Err(error) => {
                warn!(namespace, error = %error, "namespace probe failed");
                false
            }
        };

        Ok(in_stats || has_vectors)
    }

    /// Returns a retriever over `doc_id`'s namespace, embedding the document
    /// first if the namespace is empty.
    pub async fn ensure_embeddings(
        &self,
        owner_id: &str,
        doc_id: &str,
    ) -> Result<NamespaceRetriever, IndexError> {
        if owner_id.is_empty() {
            return Err(IndexError::MissingIdentifier("owner id"));
        }
        if doc_id.is_empty() {
            return Err(IndexError::MissingIdentifier("document id"));
        }

        self.check_index().await?;

        if self.namespace_exists(doc_id).await? {
            info!(doc_id, "namespace exists, reusing embeddings");
            return Ok(self.retriever(doc_id, true));
        }

        info!(doc_id, "generating embeddings");
        let bytes = self.documents.load_document(owner_id, doc_id).await?;
        self.embed_document(doc_id, &bytes).await?;
        Ok(self.retriever(doc_id, false))
    }

    /// Upload path: the bytes are already in hand, so the store is not read.
    pub async fn index_document(
        &self,
        document: &SourceDocument,
    ) -> Result<NamespaceRetriever, IndexError> {
        if document.id.is_empty() {
            return Err(IndexError::MissingIdentifier("document id"));
        }

        self.check_index().await?;

        if self.namespace_exists(&document.id).await? {
            info!(doc_id = %document.id, "namespace exists, skipping embedding");
            return Ok(self.retriever(&document.id, true));
        }

        self.embed_document(&document.id, &document.bytes).await?;
        Ok(self.retriever(&document.id, false))
    }

    async fn embed_document(&self, doc_id: &str, bytes: &[u8]) -> Result<usize, IndexError> {
        let chunks = self.pipeline.process(bytes, doc_id);
        if chunks.is_empty() {
            return Err(IndexError::Processing(format!(
                "document {doc_id} produced no chunks"
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::Processing(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| VectorRecord::from_chunk(chunk, values))
            .collect::<Result<Vec<_>, _>>()?;

        for batch in records.chunks(self.options.upsert_batch_size.max(1)) {
            self.index.upsert(doc_id, batch).await?;
        }

        info!(
            doc_id,
            index = self.index.index_name(),
            chunk_count = records.len(),
            "stored embeddings in namespace"
        );
        Ok(records.len())
    }

    fn retriever(&self, namespace: &str, reused: bool) -> NamespaceRetriever {
        NamespaceRetriever {
            index: Arc::clone(&self.index),
            embedder: Arc::clone(&self.embedder),
            namespace: namespace.to_string(),
            top_k: self.options.top_k,
            reused,
        }
    }
}
