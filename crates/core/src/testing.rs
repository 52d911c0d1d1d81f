use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::extractor::{DocumentExtractor, PdfExtractor};
use crate::ingest::IngestionPipeline;
use crate::llm::{PromptMessage, PromptRole};
use crate::models::{
    ChatOptions, ExtractedPage, IndexStats, IngestionOptions, VectorMatch, VectorRecord,
};
use crate::stores::MemoryVectorIndex;
use crate::traits::{DocumentStore, LanguageModel, VectorIndex};
use crate::{ChatError, IndexError, IngestError, StorageError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const WORDS: [&str; 18] = [
    "hydraulic",
    "systems",
    "rely",
    "on",
    "incompressible",
    "fluid",
    "to",
    "transmit",
    "force",
    "across",
    "pistons",
    "valves",
    "and",
    "hoses",
    "while",
    "pressure",
    "stays",
    "constant",
];

pub(crate) fn prose(chars: usize) -> String {
    let mut text = String::new();
    for word in WORDS.iter().cycle() {
        let separator = usize::from(!text.is_empty());
        if text.len() + separator + word.len() > chars {
            break;
        }
        if separator == 1 {
            text.push(' ');
        }
        text.push_str(word);
    }
    text
}

pub(crate) struct StaticExtractor {
    pages: Vec<String>,
    failure: Option<String>,
}

impl StaticExtractor {
    pub(crate) fn pages(texts: &[&str]) -> Self {
        Self {
            pages: texts.iter().map(|text| text.to_string()).collect(),
            failure: None,
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            pages: Vec::new(),
            failure: Some(message.to_string()),
        }
    }
}

impl PdfExtractor for StaticExtractor {
    fn extract_pages(&self, _bytes: &[u8], source: &str) -> Result<Vec<ExtractedPage>, IngestError> {
        if let Some(message) = &self.failure {
            return Err(IngestError::PdfParse(message.clone()));
        }

        Ok(self
            .pages
            .iter()
            .enumerate()
            .map(|(index, text)| ExtractedPage::new(text.clone(), source, index as u32 + 1))
            .collect())
    }
}

pub(crate) fn pipeline_over(texts: &[&str]) -> IngestionPipeline {
    let options = IngestionOptions::default();
    IngestionPipeline::new(
        DocumentExtractor::new(StaticExtractor::pages(texts), &options),
        options,
    )
}

#[derive(Default)]
pub(crate) struct CountingEmbedder {
    inner: CharacterNgramEmbedder,
    document_calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
    failure: Option<String>,
}

impl CountingEmbedder {
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        if let Some(message) = &self.failure {
            return Err(IndexError::Request(message.clone()));
        }
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        if let Some(message) = &self.failure {
            return Err(IndexError::Request(message.clone()));
        }
        self.queries.lock().unwrap().push(text.to_string());
        Ok(self.inner.embed_text(text))
    }
}

pub(crate) struct FlakyIndex {
    inner: MemoryVectorIndex,
    fail_stats: bool,
    fail_query: Option<String>,
    fail_delete: Option<String>,
    delete_calls: AtomicUsize,
}

impl FlakyIndex {
    pub(crate) fn new(inner: MemoryVectorIndex) -> Self {
        Self {
            inner,
            fail_stats: false,
            fail_query: None,
            fail_delete: None,
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_stats(mut self) -> Self {
        self.fail_stats = true;
        self
    }

    pub(crate) fn failing_query(mut self, message: &str) -> Self {
        self.fail_query = Some(message.to_string());
        self
    }

    pub(crate) fn failing_delete(mut self, message: &str) -> Self {
        self.fail_delete = Some(message.to_string());
        self
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn inner(&self) -> &MemoryVectorIndex {
        &self.inner
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    fn index_name(&self) -> &str {
        self.inner.index_name()
    }

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        self.inner.list_indexes().await
    }

    async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
        if self.fail_stats {
            return Err(IndexError::BackendResponse {
                backend: "fake".to_string(),
                status: 400,
                details: "stats rejected".to_string(),
            });
        }
        self.inner.describe_stats().await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, IndexError> {
        if let Some(message) = &self.fail_query {
            return Err(IndexError::Request(message.clone()));
        }
        self.inner.query(namespace, vector, top_k).await
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError> {
        self.inner.upsert(namespace, records).await
    }

    async fn delete_all(&self, namespace: &str) -> Result<(), IndexError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_delete {
            return Err(IndexError::Request(message.clone()));
        }
        self.inner.delete_all(namespace).await
    }
}

#[derive(Default)]
pub(crate) struct MemoryDocumentStore {
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    records: Mutex<HashSet<(String, String)>>,
    fail_file_delete: Option<String>,
    fail_record_delete: Option<String>,
}

impl MemoryDocumentStore {
    pub(crate) fn insert(&self, owner_id: &str, doc_id: &str, bytes: Vec<u8>) {
        let key = (owner_id.to_string(), doc_id.to_string());
        self.files.lock().unwrap().insert(key.clone(), bytes);
        self.records.lock().unwrap().insert(key);
    }

    pub(crate) fn failing_file_delete(mut self, message: &str) -> Self {
        self.fail_file_delete = Some(message.to_string());
        self
    }

    pub(crate) fn failing_record_delete(mut self, message: &str) -> Self {
        self.fail_record_delete = Some(message.to_string());
        self
    }

    pub(crate) fn has_file(&self, owner_id: &str, doc_id: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .contains_key(&(owner_id.to_string(), doc_id.to_string()))
    }

    pub(crate) fn has_record(&self, owner_id: &str, doc_id: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .contains(&(owner_id.to_string(), doc_id.to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load_document(&self, owner_id: &str, doc_id: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(&(owner_id.to_string(), doc_id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{owner_id}/{doc_id}")))
    }

    async fn delete_document(&self, owner_id: &str, doc_id: &str) -> Result<(), StorageError> {
        if let Some(message) = &self.fail_file_delete {
            return Err(StorageError::Backend(message.clone()));
        }
        self.files
            .lock()
            .unwrap()
            .remove(&(owner_id.to_string(), doc_id.to_string()));
        Ok(())
    }

    async fn delete_record(&self, owner_id: &str, doc_id: &str) -> Result<(), StorageError> {
        if let Some(message) = &self.fail_record_delete {
            return Err(StorageError::Backend(message.clone()));
        }
        self.records
            .lock()
            .unwrap()
            .remove(&(owner_id.to_string(), doc_id.to_string()));
        Ok(())
    }
}

pub(crate) struct ScriptedModel {
    rewrite_instruction: String,
    answer: String,
    failure: Option<String>,
    rewrite_failure: Option<String>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedModel {
    pub(crate) fn answering(answer: &str) -> Self {
        Self {
            rewrite_instruction: ChatOptions::default().rewrite_instruction,
            answer: answer.to_string(),
            failure: None,
            rewrite_failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::answering("")
        }
    }

    pub(crate) fn failing_rewrite(message: &str) -> Self {
        Self {
            rewrite_failure: Some(message.to_string()),
            ..Self::answering("unused")
        }
    }

    pub(crate) fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().unwrap().clone()
    }

    fn is_rewrite(&self, messages: &[PromptMessage]) -> bool {
        messages
            .last()
            .is_some_and(|message| message.content == self.rewrite_instruction)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ChatError> {
        self.prompts.lock().unwrap().push(messages.to_vec());

        if let Some(message) = &self.failure {
            return Err(ChatError::BackendResponse {
                backend: "scripted".to_string(),
                status: 503,
                details: message.clone(),
            });
        }

        if self.is_rewrite(messages) {
            if let Some(message) = &self.rewrite_failure {
                return Err(ChatError::BackendResponse {
                    backend: "scripted".to_string(),
                    status: 400,
                    details: message.clone(),
                });
            }
            let question = messages
                .iter()
                .rev()
                .filter(|message| message.role == PromptRole::User)
                .nth(1)
                .map(|message| message.content.clone())
                .unwrap_or_default();
            return Ok(format!("standalone: {question}"));
        }

        Ok(self.answer.clone())
    }
}
