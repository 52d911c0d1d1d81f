use crate::error::IngestError;
use crate::models::{ExtractedPage, IngestionOptions};
use lopdf::Document;
use tracing::{debug, warn};

/// Raw PDF-to-text backend. Failures are reported; [`DocumentExtractor`]
/// turns them into sentinel pages.
pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8], source: &str) -> Result<Vec<ExtractedPage>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8], source: &str) -> Result<Vec<ExtractedPage>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(ExtractedPage::new(text, source, page_no));
        }

        Ok(pages)
    }
}

/// Page extraction that never fails: unreadable input becomes an error
/// sentinel page and near-empty input becomes the scanned placeholder.
pub struct DocumentExtractor {
    backend: Box<dyn PdfExtractor>,
    scanned_min_chars: usize,
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new(LopdfExtractor, &IngestionOptions::default())
    }
}

impl DocumentExtractor {
    pub fn new(backend: impl PdfExtractor + 'static, options: &IngestionOptions) -> Self {
        Self {
            backend: Box::new(backend),
            scanned_min_chars: options.scanned_min_chars,
        }
    }

    pub fn extract(&self, bytes: &[u8], source: &str) -> Vec<ExtractedPage> {
        let pages = match self.backend.extract_pages(bytes, source) {
            Ok(pages) => pages,
            Err(error) => {
                warn!(source, error = %error, "pdf extraction failed");
                return vec![ExtractedPage::error_marker(error.to_string())];
            }
        };

        let readable = readable_chars(&pages);
        if readable < self.scanned_min_chars {
            debug!(
                source,
                pages = pages.len(),
                readable,
                "minimal text extracted, treating as scanned document"
            );
            let placeholder_source = pages
                .first()
                .map(|page| page.metadata.source.clone())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| source.to_string());
            return vec![ExtractedPage::scanned_placeholder(placeholder_source)];
        }

        debug!(source, pages = pages.len(), readable, "pdf extracted");
        pages
    }
}

fn readable_chars(pages: &[ExtractedPage]) -> usize {
    pages
        .iter()
        .map(|page| page.text.trim().chars().count())
        .sum()
}
