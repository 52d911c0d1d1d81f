use crate::error::IngestError;
use crate::models::{Chunk, ExtractedPage};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// Split preference, largest semantic boundary first.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// `(page limit, char limit, chunk size)`: a corpus below either limit gets the size.
const SIZE_BUCKETS: [(usize, usize, usize); 3] = [
    (10, 20_000, 500),
    (50, 100_000, 1_000),
    (200, 500_000, 1_500),
];

const LARGEST_CHUNK_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorpusStats {
    pub page_count: usize,
    pub total_chars: usize,
}

impl CorpusStats {
    pub fn of(pages: &[ExtractedPage]) -> Self {
        Self {
            page_count: pages.len(),
            total_chars: pages.iter().map(|page| page.text.chars().count()).sum(),
        }
    }
}

/// Smaller documents get smaller chunks. Page count and length qualify
/// independently, so a short but many-paged corpus still lands low.
pub fn chunk_size_for(stats: CorpusStats) -> usize {
    SIZE_BUCKETS
        .iter()
        .find(|(page_limit, char_limit, _)| {
            stats.page_count < *page_limit || stats.total_chars < *char_limit
        })
        .map(|(_, _, size)| *size)
        .unwrap_or(LARGEST_CHUNK_CHARS)
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
}

/// Recursive character splitter: splits on the largest separator present,
/// recurses into pieces that are still too long, then merges neighbours back
/// up to `chunk_chars` while carrying up to `overlap_chars` into the next chunk.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    config: ChunkingConfig,
    separators: Vec<&'static str>,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.chunk_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if config.overlap_chars >= config.chunk_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                config.overlap_chars, config.chunk_chars
            )));
        }

        Ok(Self {
            config,
            separators: DEFAULT_SEPARATORS.to_vec(),
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Splits each page on its own so chunks never straddle pages.
    pub fn split_pages(&self, pages: &[ExtractedPage]) -> Vec<Chunk> {
        pages
            .iter()
            .flat_map(|page| {
                self.split_text(&page.text)
                    .into_iter()
                    .map(move |piece| Chunk::from_page(page, piece))
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|piece| !piece.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for piece in pieces {
            if char_len(&piece) < self.config.chunk_chars {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }

        chunks
    }

    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut merged = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            let joined = |total: usize, window: &VecDeque<&str>| {
                total + len + if window.is_empty() { 0 } else { separator_len }
            };

            if joined(total, &window) > self.config.chunk_chars && !window.is_empty() {
                push_joined(&mut merged, &window, separator);

                while total > self.config.overlap_chars
                    || (joined(total, &window) > self.config.chunk_chars && total > 0)
                {
                    let dropped_sep = if window.len() > 1 { separator_len } else { 0 };
                    match window.pop_front() {
                        Some(first) => {
                            total = total.saturating_sub(char_len(first) + dropped_sep);
                        }
                        None => {
                            total = 0;
                            break;
                        }
                    }
                }
            }

            window.push_back(piece);
            total += len + if window.len() > 1 { separator_len } else { 0 };
        }

        push_joined(&mut merged, &window, separator);
        merged
    }
}

fn pick_separator<'a>(
    text: &str,
    separators: &'a [&'static str],
) -> (&'static str, &'a [&'static str]) {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (separator, &separators[position + 1..]);
        }
    }
    ("", &[])
}

fn push_joined(target: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn make_chunk_id(document_id: &str, page: Option<u32>, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.unwrap_or(0).to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(page_count: usize, total_chars: usize) -> CorpusStats {
        CorpusStats {
            page_count,
            total_chars,
        }
    }

    #[test]
    fn chunk_size_follows_buckets() {
        let small = chunk_size_for(stats(5, 5_000));
        let huge = chunk_size_for(stats(300, 600_000));

        assert_eq!(small, 500);
        assert_eq!(huge, 2_000);
        assert!(small <= huge);
        assert_eq!(chunk_size_for(stats(20, 50_000)), 1_000);
        assert_eq!(chunk_size_for(stats(120, 300_000)), 1_500);
    }

    #[test]
    fn either_dimension_qualifies_for_smaller_bucket() {
        assert_eq!(chunk_size_for(stats(3, 900_000)), 500);
        assert_eq!(chunk_size_for(stats(400, 10_000)), 500);
        assert_eq!(chunk_size_for(stats(400, 60_000)), 1_000);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let result = RecursiveSplitter::new(ChunkingConfig {
            chunk_chars: 200,
            overlap_chars: 200,
        });
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }

    #[test]
    fn short_text_stays_whole() {
        let splitter = RecursiveSplitter::new(ChunkingConfig {
            chunk_chars: 100,
            overlap_chars: 10,
        })
        .expect("valid config");

        assert_eq!(splitter.split_text("  one short line  "), vec!["one short line"]);
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let splitter = RecursiveSplitter::new(ChunkingConfig {
            chunk_chars: 30,
            overlap_chars: 0,
        })
        .expect("valid config");

        let chunks = splitter.split_text("first paragraph here\n\nsecond paragraph here");

        assert_eq!(chunks, vec!["first paragraph here", "second paragraph here"]);
    }

    #[test]
    fn long_words_fall_back_to_characters() {
        let splitter = RecursiveSplitter::new(ChunkingConfig {
            chunk_chars: 10,
            overlap_chars: 2,
        })
        .expect("valid config");

        let chunks = splitter.split_text(&"x".repeat(35));

        assert!(chunks.len() >= 4);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
    }

    #[test]
    fn neighbouring_chunks_share_overlap() {
        let splitter = RecursiveSplitter::new(ChunkingConfig {
            chunk_chars: 20,
            overlap_chars: 8,
        })
        .expect("valid config");

        let chunks = splitter.split_text("alpha beta gamma delta epsilon zeta eta theta");

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 20));
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap_or_default();
            assert!(pair[1].split(' ').any(|word| word == last_word), "{pair:?}");
        }
    }

    #[test]
    fn chunk_id_is_stable() {
        let first = make_chunk_id("doc", Some(1), 0, "text");
        let second = make_chunk_id("doc", Some(1), 0, "text");
        assert_eq!(first, second);
        assert_ne!(first, make_chunk_id("doc", Some(2), 0, "text"));
    }
}
