use crate::error::ErrorClass;
use crate::index::EmbeddingIndex;
use crate::llm::PromptMessage;
use crate::models::{ChatOptions, ChatTurn, HistoryOrder, RetrievedPassage};
use crate::traits::{ChatHistoryStore, LanguageModel};
use crate::ChatError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Steps of one chat turn, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStage {
    Init,
    RetrieverReady,
    HistoryLoaded,
    QueryRewritten,
    ContextRetrieved,
    Answered,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub answer: String,
    /// Query sent to the retriever; equals the question when there was no history.
    pub search_query: String,
    pub passages: Vec<RetrievedPassage>,
    pub reused_embeddings: bool,
}

/// A turn that stopped before [`ChatStage::Answered`]. `stage` is the stage
/// that could not be reached.
#[derive(Debug, Error)]
#[error("chat turn failed at {stage:?}: {error}")]
pub struct ChatFailure {
    pub stage: ChatStage,
    #[source]
    pub error: ChatError,
}

impl ChatFailure {
    fn at(stage: ChatStage) -> impl FnOnce(ChatError) -> Self {
        move |error| Self { stage, error }
    }

    fn at_index(stage: ChatStage) -> impl FnOnce(crate::IndexError) -> Self {
        move |error| Self {
            stage,
            error: error.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }

    pub fn user_message(&self) -> String {
        let transient = self.class() == ErrorClass::Transient;
        match (self.stage, transient) {
            (ChatStage::RetrieverReady, true) => format!(
                "Error: The vector store is currently unavailable. Please try again later. {}",
                self.error
            ),
            (ChatStage::RetrieverReady, false) => format!(
                "Error: Unable to access the document's AI embeddings. {}",
                self.error
            ),
            (_, true) => format!(
                "Sorry, I encountered an error while processing your question. {} Please try again later.",
                self.error
            ),
            (_, false) => format!(
                "Sorry, I encountered an error while processing your question. {}",
                self.error
            ),
        }
    }
}

/// History-aware retrieval chat over one document at a time.
///
/// Holds no per-conversation state; every call reads history afresh and
/// leaves persisting the new turn to the caller.
pub struct RetrievalChatEngine {
    index: Arc<EmbeddingIndex>,
    history: Arc<dyn ChatHistoryStore>,
    model: Arc<dyn LanguageModel>,
    options: ChatOptions,
}

impl RetrievalChatEngine {
    pub fn new(
        index: Arc<EmbeddingIndex>,
        history: Arc<dyn ChatHistoryStore>,
        model: Arc<dyn LanguageModel>,
        options: ChatOptions,
    ) -> Self {
        Self {
            index,
            history,
            model,
            options,
        }
    }

    /// Always yields something to show: the answer, or a readable failure.
    pub async fn answer(&self, user_id: &str, doc_id: &str, question: &str) -> String {
        match self.respond(user_id, doc_id, question).await {
            Ok(reply) => reply.answer,
            Err(failure) => {
                warn!(
                    doc_id,
                    stage = ?failure.stage,
                    class = ?failure.class(),
                    error = %failure.error,
                    "chat turn failed"
                );
                failure.user_message()
            }
        }
    }

    pub async fn respond(
        &self,
        user_id: &str,
        doc_id: &str,
        question: &str,
    ) -> Result<ChatReply, ChatFailure> {
        if question.trim().is_empty() {
            return Err(ChatFailure {
                stage: ChatStage::Init,
                error: ChatError::InvalidArgument("question is empty".to_string()),
            });
        }

        let retriever = self
            .index
            .ensure_embeddings(user_id, doc_id)
            .await
            .map_err(ChatFailure::at_index(ChatStage::RetrieverReady))?;
        debug!(doc_id, stage = ?ChatStage::RetrieverReady, reused = retriever.reused_existing(), "retriever ready");

        let history = self
            .load_history(user_id, doc_id)
            .await
            .map_err(ChatFailure::at(ChatStage::HistoryLoaded))?;
        debug!(doc_id, stage = ?ChatStage::HistoryLoaded, turns = history.len(), "history loaded");

        let search_query = self
            .search_query(&history, question)
            .await
            .map_err(ChatFailure::at(ChatStage::QueryRewritten))?;
        debug!(doc_id, stage = ?ChatStage::QueryRewritten, search_query = %search_query, "search query ready");

        let passages = retriever
            .retrieve(&search_query)
            .await
            .map_err(ChatFailure::at_index(ChatStage::ContextRetrieved))?;
        debug!(doc_id, stage = ?ChatStage::ContextRetrieved, passages = passages.len(), "context retrieved");

        let prompt = self.answer_prompt(&passages, &history, question);
        let answer = self
            .model
            .complete(&prompt)
            .await
            .map_err(ChatFailure::at(ChatStage::Answered))?;
        info!(doc_id, stage = ?ChatStage::Answered, "answered question");

        Ok(ChatReply {
            answer,
            search_query,
            passages,
            reused_embeddings: retriever.reused_existing(),
        })
    }

    /// Most recent turns up to the cap, oldest first.
    async fn load_history(&self, user_id: &str, doc_id: &str) -> Result<Vec<ChatTurn>, ChatError> {
        let mut turns = self
            .history
            .list(
                user_id,
                doc_id,
                HistoryOrder::NewestFirst,
                self.options.history_limit,
            )
            .await?;
        turns.reverse();
        Ok(turns)
    }

    async fn search_query(&self, history: &[ChatTurn], question: &str) -> Result<String, ChatError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let mut prompt: Vec<PromptMessage> = history.iter().map(PromptMessage::from).collect();
        prompt.push(PromptMessage::user(question));
        prompt.push(PromptMessage::user(self.options.rewrite_instruction.clone()));

        self.model.complete(&prompt).await
    }

    fn answer_prompt(
        &self,
        passages: &[RetrievedPassage],
        history: &[ChatTurn],
        question: &str,
    ) -> Vec<PromptMessage> {
        let context = passages
            .iter()
            .map(|passage| passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut prompt = Vec::with_capacity(history.len() + 2);
        prompt.push(PromptMessage::system(
            self.options.answer_instruction.replace("{context}", &context),
        ));
        prompt.extend(history.iter().map(PromptMessage::from));
        prompt.push(PromptMessage::user(question));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryChatHistory;
    use crate::llm::PromptRole;
    use crate::models::IndexOptions;
    use crate::stores::MemoryVectorIndex;
    use crate::testing::{
        pipeline_over, prose, CountingEmbedder, FlakyIndex, MemoryDocumentStore, ScriptedModel,
    };
    use crate::traits::VectorIndex;

    struct Harness {
        engine: RetrievalChatEngine,
        history: Arc<InMemoryChatHistory>,
        model: Arc<ScriptedModel>,
        embedder: Arc<CountingEmbedder>,
    }

    fn harness_with(index: Arc<dyn VectorIndex>, model: ScriptedModel, options: ChatOptions) -> Harness {
        let documents = MemoryDocumentStore::default();
        documents.insert("user-1", "doc-1", b"%PDF-fake".to_vec());
        let embedder = Arc::new(CountingEmbedder::default());
        let body = prose(1_800);
        let embeddings = EmbeddingIndex::new(
            index,
            embedder.clone(),
            Arc::new(documents),
            pipeline_over(&[&body]),
            IndexOptions::default(),
        );
        let history = Arc::new(InMemoryChatHistory::new());
        let model = Arc::new(model);

        Harness {
            engine: RetrievalChatEngine::new(
                Arc::new(embeddings),
                history.clone(),
                model.clone(),
                options,
            ),
            history,
            model,
            embedder,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Arc::new(MemoryVectorIndex::new("chat-with-pdf-ai")),
            ScriptedModel::answering("Valves regulate pressure."),
            ChatOptions::default(),
        )
    }

    async fn seed_history(history: &InMemoryChatHistory, exchanges: &[(&str, &str)]) {
        for (question, answer) in exchanges {
            history
                .append("user-1", "doc-1", ChatTurn::human(*question))
                .await
                .expect("append");
            history
                .append("user-1", "doc-1", ChatTurn::assistant(*answer))
                .await
                .expect("append");
        }
    }

    #[tokio::test]
    async fn first_question_is_used_verbatim_as_query() {
        let harness = harness();

        let reply = harness
            .engine
            .respond("user-1", "doc-1", "What transmits force?")
            .await
            .expect("answered");

        assert_eq!(reply.answer, "Valves regulate pressure.");
        assert_eq!(reply.search_query, "What transmits force?");
        assert_eq!(harness.embedder.queries(), vec!["What transmits force?"]);
        assert_eq!(harness.model.prompts().len(), 1);
        assert!(!reply.passages.is_empty());
    }

    #[tokio::test]
    async fn follow_up_is_rewritten_before_retrieval() {
        let harness = harness();
        seed_history(&harness.history, &[("What transmits force?", "Fluid does.")]).await;

        let reply = harness
            .engine
            .respond("user-1", "doc-1", "And what about valves?")
            .await
            .expect("answered");

        assert_ne!(reply.search_query, "And what about valves?");
        assert_eq!(harness.embedder.queries(), vec![reply.search_query.clone()]);

        let prompts = harness.model.prompts();
        assert_eq!(prompts.len(), 2);
        let rewrite = &prompts[0];
        assert_eq!(rewrite[0].content, "What transmits force?");
        assert_eq!(rewrite[rewrite.len() - 2].content, "And what about valves?");
        assert_eq!(
            rewrite[rewrite.len() - 1].content,
            ChatOptions::default().rewrite_instruction
        );
    }

    #[tokio::test]
    async fn answer_prompt_has_context_then_chronological_history() {
        let harness = harness();
        seed_history(&harness.history, &[("q1", "a1"), ("q2", "a2")]).await;

        let reply = harness
            .engine
            .respond("user-1", "doc-1", "q3")
            .await
            .expect("answered");

        let prompts = harness.model.prompts();
        let answer_prompt = prompts.last().expect("answer prompt");
        let system = &answer_prompt[0];
        assert_eq!(system.role, PromptRole::System);
        assert!(system
            .content
            .starts_with("Answer the user's questions based on the below context:\n\n"));
        assert!(system.content.contains(&reply.passages[0].text));

        let rest: Vec<&str> = answer_prompt[1..]
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(rest, vec!["q1", "a1", "q2", "a2", "q3"]);
    }

    #[tokio::test]
    async fn history_cap_keeps_only_recent_turns() {
        let harness = harness_with(
            Arc::new(MemoryVectorIndex::new("chat-with-pdf-ai")),
            ScriptedModel::answering("ok"),
            ChatOptions {
                history_limit: Some(2),
                ..ChatOptions::default()
            },
        );
        seed_history(&harness.history, &[("q1", "a1"), ("q2", "a2"), ("q3", "a3")]).await;

        harness
            .engine
            .respond("user-1", "doc-1", "q4")
            .await
            .expect("answered");

        let prompts = harness.model.prompts();
        let answer_prompt = prompts.last().expect("answer prompt");
        let rest: Vec<&str> = answer_prompt[1..]
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(rest, vec!["q3", "a3", "q4"]);
    }

    #[tokio::test]
    async fn missing_index_reports_embedding_access_failure() {
        let harness = harness_with(
            Arc::new(MemoryVectorIndex::unprovisioned("chat-with-pdf-ai")),
            ScriptedModel::answering("unused"),
            ChatOptions::default(),
        );

        let message = harness.engine.answer("user-1", "doc-1", "Anything?").await;

        assert!(message.starts_with("Error: Unable to access the document's AI embeddings."));
        assert!(message.contains("chat-with-pdf-ai"));
        assert!(harness.model.prompts().is_empty());
    }

    #[tokio::test]
    async fn unavailable_model_suggests_retrying() {
        let harness = harness_with(
            Arc::new(MemoryVectorIndex::new("chat-with-pdf-ai")),
            ScriptedModel::failing("upstream overloaded"),
            ChatOptions::default(),
        );

        let failure = harness
            .engine
            .respond("user-1", "doc-1", "Anything?")
            .await
            .expect_err("model is down");
        assert_eq!(failure.stage, ChatStage::Answered);
        assert_eq!(failure.class(), ErrorClass::Transient);

        let message = harness.engine.answer("user-1", "doc-1", "Anything?").await;
        assert!(message.starts_with("Sorry, I encountered an error while processing your question."));
        assert!(message.contains("upstream overloaded"));
        assert!(message.contains("try again later"));
    }

    #[tokio::test]
    async fn failed_rewrite_returns_apology() {
        let harness = harness_with(
            Arc::new(MemoryVectorIndex::new("chat-with-pdf-ai")),
            ScriptedModel::failing_rewrite("rewrite rejected"),
            ChatOptions::default(),
        );
        seed_history(&harness.history, &[("What is this about?", "Fluid dynamics.")]).await;

        let failure = harness
            .engine
            .respond("user-1", "doc-1", "And the pressure?")
            .await
            .expect_err("rewrite fails");
        assert_eq!(failure.stage, ChatStage::QueryRewritten);
        assert_eq!(failure.class(), ErrorClass::Processing);
        assert!(harness.embedder.queries().is_empty());

        let message = harness.engine.answer("user-1", "doc-1", "And the pressure?").await;
        assert!(message.starts_with("Sorry, I encountered an error while processing your question."));
        assert!(message.contains("rewrite rejected"));
        assert!(!message.contains("try again later"));
    }

    #[tokio::test]
    async fn failed_search_stops_before_answering() {
        let index = FlakyIndex::new(MemoryVectorIndex::new("chat-with-pdf-ai"))
            .failing_query("index rejected query");
        let harness = harness_with(
            Arc::new(index),
            ScriptedModel::answering("never sent"),
            ChatOptions::default(),
        );

        let failure = harness
            .engine
            .respond("user-1", "doc-1", "What is this about?")
            .await
            .expect_err("search fails");
        assert_eq!(failure.stage, ChatStage::ContextRetrieved);

        let message = harness.engine.answer("user-1", "doc-1", "What is this about?").await;
        assert!(message.starts_with("Sorry, I encountered an error while processing your question."));
        assert!(message.contains("index rejected query"));
        assert!(harness.model.prompts().is_empty());
    }

    #[tokio::test]
    async fn blank_question_fails_before_touching_the_index() {
        let harness = harness();

        let failure = harness
            .engine
            .respond("user-1", "doc-1", "   ")
            .await
            .expect_err("blank question");

        assert_eq!(failure.stage, ChatStage::Init);
        assert_eq!(harness.embedder.document_calls(), 0);
    }
}
