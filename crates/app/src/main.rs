use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_chat_core::{
    delete_document, CharacterNgramEmbedder, ChatHistoryStore, ChatOptions, ChatRole, ChatTurn,
    Embedder, EmbeddingIndex, HistoryOrder, IndexOptions, IngestionPipeline, JsonlChatHistory,
    LanguageModel, LocalDocumentStore, MemoryVectorIndex, OpenAiChatModel, OpenAiEmbedder,
    PineconeStore, RetrievalChatEngine, SourceDocument, VectorIndex,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding uploaded files, records and chat logs.
    #[arg(long, env = "PDF_CHAT_DATA_DIR", default_value = ".pdf-chat")]
    data_dir: PathBuf,

    /// Owner of uploads and conversations.
    #[arg(long, env = "PDF_CHAT_USER", default_value = "local")]
    user: String,

    #[command(flatten)]
    backends: BackendArgs,

    /// Most recent turns fed to the model, 0 for the whole conversation.
    #[arg(long, default_value = "20")]
    history_limit: usize,
}

#[derive(Args)]
struct BackendArgs {
    /// OpenAI API key; without it embeddings are computed offline.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// Chat completion model.
    #[arg(long, default_value = "gpt-4o")]
    chat_model: String,

    /// Pinecone API key; without it vectors live in memory for this run.
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Data-plane host of the Pinecone index.
    #[arg(long, env = "PINECONE_INDEX_HOST")]
    pinecone_index_host: Option<String>,

    /// Control-plane URL used to list indexes.
    #[arg(long, env = "PINECONE_CONTROL_URL", default_value = "https://api.pinecone.io")]
    pinecone_control_url: String,

    /// Vector index name.
    #[arg(long, env = "PINECONE_INDEX", default_value = "chat-with-pdf-ai")]
    index_name: String,
}

#[derive(Subcommand)]
enum Command {
    /// Store a PDF and embed it into its own namespace.
    Upload {
        /// Path to the PDF file.
        path: PathBuf,
        /// Display name, defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },
    /// List uploaded documents.
    List,
    /// Ask one question about a document.
    Ask {
        doc_id: String,
        question: String,
    },
    /// Interactive conversation with a document; an empty line or `exit` quits.
    Chat { doc_id: String },
    /// Print the conversation kept for a document.
    History {
        doc_id: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = false)]
        newest_first: bool,
    },
    /// Remove a document's file, record and vectors.
    Delete { doc_id: String },
    /// Verify that the configured vector index exists.
    CheckIndex,
}

impl BackendArgs {
    fn vector_index(&self) -> anyhow::Result<Arc<dyn VectorIndex>> {
        match (&self.pinecone_api_key, &self.pinecone_index_host) {
            (Some(key), Some(host)) => Ok(Arc::new(
                PineconeStore::new(key.as_str(), self.index_name.as_str(), host.as_str())
                    .with_control_url(self.pinecone_control_url.as_str()),
            )),
            (Some(_), None) => bail!("PINECONE_INDEX_HOST is required when PINECONE_API_KEY is set"),
            _ => {
                warn!("no Pinecone credentials, using an in-memory index for this run");
                Ok(Arc::new(MemoryVectorIndex::new(self.index_name.as_str())))
            }
        }
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        match &self.openai_api_key {
            Some(key) => Arc::new(
                OpenAiEmbedder::new(key.as_str()).with_base_url(self.openai_base_url.as_str()),
            ),
            None => {
                warn!("no OpenAI key, using offline character n-gram embeddings");
                Arc::new(CharacterNgramEmbedder::default())
            }
        }
    }

    fn language_model(&self) -> anyhow::Result<Arc<dyn LanguageModel>> {
        let key = self
            .openai_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required to chat with a document"))?;
        Ok(Arc::new(
            OpenAiChatModel::new(key)
                .with_base_url(self.openai_base_url.as_str())
                .with_model(self.chat_model.as_str()),
        ))
    }
}

struct Services {
    documents: Arc<LocalDocumentStore>,
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingIndex>,
    history: Arc<JsonlChatHistory>,
    dimensions: usize,
}

impl Services {
    fn build(cli: &Cli) -> anyhow::Result<Self> {
        let documents = Arc::new(LocalDocumentStore::new(cli.data_dir.clone()));
        let index = cli.backends.vector_index()?;
        let embedder = cli.backends.embedder();
        let dimensions = embedder.dimensions();
        let options = IndexOptions {
            index_name: cli.backends.index_name.clone(),
            ..IndexOptions::default()
        };
        let embeddings = Arc::new(EmbeddingIndex::new(
            Arc::clone(&index),
            embedder,
            documents.clone(),
            IngestionPipeline::default(),
            options,
        ));

        Ok(Self {
            documents,
            index,
            embeddings,
            history: Arc::new(JsonlChatHistory::new(cli.data_dir.clone())),
            dimensions,
        })
    }

    fn engine(&self, cli: &Cli) -> anyhow::Result<RetrievalChatEngine> {
        let options = ChatOptions {
            history_limit: (cli.history_limit > 0).then_some(cli.history_limit),
            ..ChatOptions::default()
        };
        Ok(RetrievalChatEngine::new(
            Arc::clone(&self.embeddings),
            self.history.clone(),
            cli.backends.language_model()?,
            options,
        ))
    }

    /// Answers, then records the question and the reply in that order.
    async fn ask(
        &self,
        engine: &RetrievalChatEngine,
        user: &str,
        doc_id: &str,
        question: &str,
    ) -> anyhow::Result<String> {
        let reply = engine.answer(user, doc_id, question).await;
        self.history
            .append(user, doc_id, ChatTurn::human(question))
            .await
            .context("saving question")?;
        self.history
            .append(user, doc_id, ChatTurn::assistant(reply.clone()))
            .await
            .context("saving answer")?;
        Ok(reply)
    }
}

fn display_name(path: &Path, name: Option<String>) -> String {
    name.or_else(|| {
        path.file_name()
            .map(|file_name| file_name.to_string_lossy().into_owned())
    })
    .unwrap_or_else(|| "document.pdf".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let services = Services::build(&cli)?;
    info!(
        version = app_version,
        index = %cli.backends.index_name,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat boot"
    );

    match &cli.command {
        Command::Upload { path, name } => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let upload = SourceDocument::upload(cli.user.as_str(), bytes);
            let record = services
                .documents
                .save(&upload, &display_name(path, name.clone()))
                .await?;

            let retriever = services.embeddings.index_document(&upload).await?;
            println!(
                "uploaded {} as {} ({} bytes, namespace={}, reused={})",
                record.name,
                record.doc_id,
                record.size,
                retriever.namespace(),
                retriever.reused_existing()
            );
        }
        Command::List => {
            let records = services.documents.list_records(&cli.user).await?;
            if records.is_empty() {
                println!("no documents uploaded");
            }
            for record in records {
                println!(
                    "{} {} {} bytes uploaded_at={}",
                    record.doc_id,
                    record.name,
                    record.size,
                    record.created_at.to_rfc3339()
                );
            }
        }
        Command::Ask { doc_id, question } => {
            let engine = services.engine(&cli)?;
            let reply = services.ask(&engine, &cli.user, doc_id, question).await?;
            println!("{reply}");
        }
        Command::Chat { doc_id } => {
            let engine = services.engine(&cli)?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdout = tokio::io::stdout();

            loop {
                stdout.write_all(b"> ").await?;
                stdout.flush().await?;

                let Some(line) = lines.next_line().await? else {
                    break;
                };
                let question = line.trim();
                if question.is_empty() || question == "exit" || question == "quit" {
                    break;
                }

                let reply = services.ask(&engine, &cli.user, doc_id, question).await?;
                stdout.write_all(format!("{reply}\n\n").as_bytes()).await?;
            }
        }
        Command::History {
            doc_id,
            limit,
            newest_first,
        } => {
            let order = if *newest_first {
                HistoryOrder::NewestFirst
            } else {
                HistoryOrder::OldestFirst
            };
            let turns = services
                .history
                .list(&cli.user, doc_id, order, *limit)
                .await?;

            for turn in turns {
                let speaker = match turn.role {
                    ChatRole::Human => "you",
                    ChatRole::Assistant => "assistant",
                };
                println!(
                    "[{}] {speaker}: {}",
                    turn.created_at.to_rfc3339(),
                    turn.message
                );
            }
        }
        Command::Delete { doc_id } => {
            let report = delete_document(
                &cli.user,
                doc_id,
                services.documents.as_ref(),
                services.index.as_ref(),
            )
            .await;

            println!("{}", report.message);
            if !report.success {
                for failure in &report.failures {
                    warn!(target_store = ?failure.target, retriable = failure.retriable, "{}", failure.message);
                }
                bail!("deletion of {doc_id} incomplete");
            }
        }
        Command::CheckIndex => match services.embeddings.check_index().await {
            Ok(()) => println!("index '{}' exists", cli.backends.index_name),
            Err(error) => {
                println!("{error}");
                println!(
                    "create it with dimension {} and cosine metric before uploading",
                    services.dimensions
                );
                bail!("index check failed");
            }
        },
    }

    Ok(())
}
