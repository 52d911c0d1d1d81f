use crate::models::{ChatTurn, HistoryOrder};
use crate::traits::ChatHistoryStore;
use crate::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// Keeps the `limit` most recent turns of a chronological log, then orders them.
fn project(mut log: Vec<ChatTurn>, order: HistoryOrder, limit: Option<usize>) -> Vec<ChatTurn> {
    if let Some(limit) = limit {
        let skip = log.len().saturating_sub(limit);
        log.drain(..skip);
    }
    if order == HistoryOrder::NewestFirst {
        log.reverse();
    }
    log
}

fn require_ids(user_id: &str, doc_id: &str) -> Result<(), StorageError> {
    if user_id.is_empty() || doc_id.is_empty() {
        return Err(StorageError::InvalidArgument(
            "chat history needs both a user id and a document id".to_string(),
        ));
    }
    Ok(())
}

#[derive(Default)]
pub struct InMemoryChatHistory {
    logs: RwLock<HashMap<(String, String), Vec<ChatTurn>>>,
}

impl InMemoryChatHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryChatHistory {
    async fn append(&self, user_id: &str, doc_id: &str, turn: ChatTurn) -> Result<(), StorageError> {
        require_ids(user_id, doc_id)?;
        self.logs
            .write()
            .await
            .entry((user_id.to_string(), doc_id.to_string()))
            .or_default()
            .push(turn);
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        doc_id: &str,
        order: HistoryOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ChatTurn>, StorageError> {
        require_ids(user_id, doc_id)?;
        let log = self
            .logs
            .read()
            .await
            .get(&(user_id.to_string(), doc_id.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(project(log, order, limit))
    }
}

/// One JSON-lines file per (user, document) under
/// `root/users/<user>/chats/<doc>.jsonl`.
pub struct JsonlChatHistory {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlChatHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn log_path(&self, user_id: &str, doc_id: &str) -> Result<PathBuf, StorageError> {
        require_ids(user_id, doc_id)?;
        for segment in [user_id, doc_id] {
            if segment == ".." || segment.contains(['/', '\\']) {
                return Err(StorageError::InvalidArgument(format!(
                    "'{segment}' is not a valid path segment"
                )));
            }
        }
        Ok(self
            .root
            .join("users")
            .join(user_id)
            .join("chats")
            .join(format!("{doc_id}.jsonl")))
    }
}

#[async_trait]
impl ChatHistoryStore for JsonlChatHistory {
    async fn append(&self, user_id: &str, doc_id: &str, turn: ChatTurn) -> Result<(), StorageError> {
        let path = self.log_path(user_id, doc_id)?;
        let mut line = serde_json::to_vec(&turn)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        doc_id: &str,
        order: HistoryOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ChatTurn>, StorageError> {
        let path = self.log_path(user_id, doc_id)?;
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut log = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatTurn>(line) {
                Ok(turn) => log.push(turn),
                Err(error) => {
                    warn!(path = %path.display(), line = line_no + 1, error = %error, "skipping unreadable chat turn");
                }
            }
        }

        log.sort_by_key(|turn| turn.created_at);
        Ok(project(log, order, limit))
    }
}
