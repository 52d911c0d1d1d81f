use crate::error::IngestError;
use crate::models::{Chunk, ExtractedPage};
use regex::Regex;

/// Minimum number of delimiter-bearing lines before text counts as a table.
const MIN_DELIMITED_LINES: usize = 3;

/// A markdown separator row such as `---|---` or `| :--- | ---: |`.
const SEPARATOR_ROW_REGEX: &str =
    r"(?m)^[ \t]*\|?[ \t]*:?-+:?[ \t]*(?:\|[ \t]*:?-+:?[ \t]*)+\|?[ \t]*$";

/// Pages routed around size-based splitting.
#[derive(Debug, Default)]
pub struct ClassifiedPages {
    pub regular: Vec<ExtractedPage>,
    pub tabular: Vec<Chunk>,
}

pub struct TableAwareSplitter {
    separator_row: Regex,
}

impl TableAwareSplitter {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            separator_row: Regex::new(SEPARATOR_ROW_REGEX)?,
        })
    }

    pub fn is_tabular(&self, text: &str) -> bool {
        delimited_lines(text, '|') >= MIN_DELIMITED_LINES
            || delimited_lines(text, '\t') >= MIN_DELIMITED_LINES
            || self.separator_row.is_match(text)
    }

    /// Tabular pages become whole chunks tagged to keep their structure;
    /// everything else is handed back for splitting.
    pub fn classify(&self, pages: &[ExtractedPage], doc_id: &str) -> ClassifiedPages {
        let mut classified = ClassifiedPages::default();

        for page in pages {
            if self.is_tabular(&page.text) {
                let mut chunk = Chunk::from_page(page, page.text.clone());
                chunk.metadata.doc_id = doc_id.to_string();
                chunk.metadata.contains_table = true;
                chunk.metadata.preserve_structure = true;
                classified.tabular.push(chunk);
            } else {
                classified.regular.push(page.clone());
            }
        }

        classified
    }
}

fn delimited_lines(text: &str, delimiter: char) -> usize {
    if !text.contains(delimiter) {
        return 0;
    }
    text.lines().filter(|line| line.contains(delimiter)).count()
}
