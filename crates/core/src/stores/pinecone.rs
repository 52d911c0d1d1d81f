use crate::models::{IndexStats, NamespaceStats, VectorMatch, VectorRecord};
use crate::traits::VectorIndex;
use crate::IndexError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

const API_VERSION: &str = "2024-07";
const BACKEND: &str = "pinecone";

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceSummary>,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSummary {
    #[serde(default)]
    vector_count: u64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

/// Pinecone REST client bound to one index. Namespaces map 1:1 to documents.
pub struct PineconeStore {
    client: Client,
    api_key: String,
    index_name: String,
    index_host: String,
    control_url: String,
}

impl PineconeStore {
    pub fn new(
        api_key: impl Into<String>,
        index_name: impl Into<String>,
        index_host: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            index_name: index_name.into(),
            index_host: normalize_host(index_host.into()),
            control_url: "https://api.pinecone.io".to_string(),
        }
    }

    pub fn with_control_url(mut self, control_url: impl Into<String>) -> Self {
        self.control_url = control_url.into().trim_end_matches('/').to_string();
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    fn control_endpoint(&self, path: &str) -> Result<Url, IndexError> {
        Ok(Url::parse(&self.control_url)?.join(path)?)
    }

    fn data_url(&self, path: &str) -> Result<Url, IndexError> {
        Ok(Url::parse(&self.index_host)?.join(path)?)
    }

    async fn post_data(&self, path: &str, body: Value) -> Result<reqwest::Response, IndexError> {
        let url = self.data_url(path)?;
        let response = self
            .authorized(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        Ok(response)
    }
}

fn normalize_host(host: String) -> String {
    let host = host.trim_end_matches('/').to_string();
    if host.starts_with("http://") || host.starts_with("https://") {
        host
    } else {
        format!("https://{host}")
    }
}

async fn backend_error(response: reqwest::Response) -> IndexError {
    let status = response.status().as_u16();
    let details = response.text().await.unwrap_or_default();
    IndexError::BackendResponse {
        backend: BACKEND.to_string(),
        status,
        details,
    }
}

#[async_trait]
impl VectorIndex for PineconeStore {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        let url = self.control_endpoint("/indexes")?;
        let response = self.authorized(self.client.get(url)).send().await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: IndexList = response.json().await?;
        Ok(parsed.indexes.into_iter().map(|index| index.name).collect())
    }

    async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
        let response = self.post_data("/describe_index_stats", json!({})).await?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: StatsResponse = response.json().await?;
        Ok(IndexStats {
            namespaces: parsed
                .namespaces
                .into_iter()
                .map(|(name, summary)| {
                    (
                        name,
                        NamespaceStats {
                            record_count: summary.vector_count,
                        },
                    )
                })
                .collect(),
            dimension: parsed.dimension,
            total_record_count: parsed.total_vector_count,
        })
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, IndexError> {
        let response = self
            .post_data(
                "/query",
                json!({
                    "namespace": namespace,
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                    "includeValues": false,
                }),
            )
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: QueryResponse = response.json().await?;
        Ok(parsed.matches)
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }

        let response = self
            .post_data(
                "/vectors/upsert",
                json!({
                    "namespace": namespace,
                    "vectors": records,
                }),
            )
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        debug!(namespace, records = records.len(), "upserted vectors");
        Ok(())
    }

    async fn delete_all(&self, namespace: &str) -> Result<(), IndexError> {
        let response = self
            .post_data(
                "/vectors/delete",
                json!({
                    "namespace": namespace,
                    "deleteAll": true,
                }),
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(namespace, "namespace already absent");
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        Ok(())
    }
}
