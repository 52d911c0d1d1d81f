use crate::chunking::{chunk_size_for, make_chunk_id, ChunkingConfig, CorpusStats, RecursiveSplitter};
use crate::extractor::DocumentExtractor;
use crate::models::{
    is_error_sentinel, is_scanned_placeholder, Chunk, ExtractedPage, IngestionOptions,
};
use crate::tables::TableAwareSplitter;
use crate::IngestError;
use tracing::{debug, info, warn};

/// Result of one processing strategy: chunks, or the reason to try the next one.
#[derive(Debug)]
pub enum StageOutcome {
    Ready(Vec<Chunk>),
    Fallback(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    /// Table-aware routing plus corpus-sized chunks.
    Enhanced,
    /// Fixed-size chunks, no table awareness.
    Standard,
}

const STRATEGIES: [ProcessingStrategy; 2] =
    [ProcessingStrategy::Enhanced, ProcessingStrategy::Standard];

pub struct IngestionPipeline {
    extractor: DocumentExtractor,
    options: IngestionOptions,
}

impl Default for IngestionPipeline {
    fn default() -> Self {
        Self::new(DocumentExtractor::default(), IngestionOptions::default())
    }
}

impl IngestionPipeline {
    pub fn new(extractor: DocumentExtractor, options: IngestionOptions) -> Self {
        Self { extractor, options }
    }

    /// Turns one PDF into chunks tagged with `doc_id`. Never fails: the worst
    /// case is a single error-marker chunk.
    pub fn process(&self, bytes: &[u8], doc_id: &str) -> Vec<Chunk> {
        let pages = self.extractor.extract(bytes, doc_id);

        if is_error_sentinel(&pages) || is_scanned_placeholder(&pages) {
            info!(doc_id, "extraction produced a placeholder, passing it through");
            let chunks = pages
                .iter()
                .map(|page| Chunk::from_page(page, page.text.clone()))
                .collect();
            return stamp_chunks(chunks, doc_id);
        }

        self.process_pages(&pages, doc_id)
    }

    pub fn process_pages(&self, pages: &[ExtractedPage], doc_id: &str) -> Vec<Chunk> {
        for strategy in STRATEGIES {
            match self.run(strategy, pages, doc_id) {
                StageOutcome::Ready(chunks) => {
                    info!(
                        doc_id,
                        ?strategy,
                        pages = pages.len(),
                        chunk_count = chunks.len(),
                        "document split"
                    );
                    return stamp_chunks(chunks, doc_id);
                }
                StageOutcome::Fallback(reason) => {
                    warn!(doc_id, ?strategy, reason = %reason, "processing strategy fell back");
                }
            }
        }

        let marker = ExtractedPage::error_marker("every processing strategy failed");
        stamp_chunks(vec![Chunk::from_page(&marker, marker.text.clone())], doc_id)
    }

    fn run(&self, strategy: ProcessingStrategy, pages: &[ExtractedPage], doc_id: &str) -> StageOutcome {
        let result = match strategy {
            ProcessingStrategy::Enhanced => self.enhanced(pages, doc_id),
            ProcessingStrategy::Standard => self.standard(pages),
        };

        match result {
            Ok(chunks) if chunks.is_empty() && has_text(pages) => {
                StageOutcome::Fallback("no chunks produced from non-empty pages".to_string())
            }
            Ok(chunks) => StageOutcome::Ready(chunks),
            Err(error) => StageOutcome::Fallback(error.to_string()),
        }
    }

    fn enhanced(&self, pages: &[ExtractedPage], doc_id: &str) -> Result<Vec<Chunk>, IngestError> {
        let tables = TableAwareSplitter::new()?;
        let classified = tables.classify(pages, doc_id);

        let mut chunks = Vec::new();
        if !classified.regular.is_empty() {
            let chunk_chars = chunk_size_for(CorpusStats::of(&classified.regular));
            debug!(
                doc_id,
                chunk_size = chunk_chars,
                tabular_pages = classified.tabular.len(),
                "using dynamic chunk size"
            );
            let splitter = RecursiveSplitter::new(ChunkingConfig {
                chunk_chars,
                overlap_chars: self.options.chunk_overlap_chars,
            })?;
            chunks = splitter.split_pages(&classified.regular);
        }

        chunks.extend(classified.tabular);
        Ok(chunks)
    }

    fn standard(&self, pages: &[ExtractedPage]) -> Result<Vec<Chunk>, IngestError> {
        let splitter = RecursiveSplitter::new(ChunkingConfig {
            chunk_chars: self.options.fallback_chunk_chars,
            overlap_chars: self.options.fallback_overlap_chars,
        })?;
        Ok(splitter.split_pages(pages))
    }
}

fn has_text(pages: &[ExtractedPage]) -> bool {
    pages.iter().any(|page| !page.text.trim().is_empty())
}

/// Stamps the owning document on every chunk, whatever upstream set.
fn stamp_chunks(mut chunks: Vec<Chunk>, doc_id: &str) -> Vec<Chunk> {
    for (index, chunk) in chunks.iter_mut().enumerate() {
        let index = index as u64;
        chunk.metadata.doc_id = doc_id.to_string();
        chunk.metadata.chunk_index = index;
        chunk.id = make_chunk_id(doc_id, chunk.metadata.source_page, index, &chunk.text);
    }
    chunks
}
