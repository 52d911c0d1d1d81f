use crate::models::{IndexStats, NamespaceStats, VectorMatch, VectorRecord};
use crate::traits::VectorIndex;
use crate::IndexError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct MemoryVectorIndex {
    name: String,
    provisioned: bool,
    namespaces: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl MemoryVectorIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provisioned: true,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// A handle whose index was never created, so `list_indexes` omits it.
    pub fn unprovisioned(name: impl Into<String>) -> Self {
        Self {
            provisioned: false,
            ..Self::new(name)
        }
    }

    pub async fn record_count(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn index_name(&self) -> &str {
        &self.name
    }

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        if self.provisioned {
            Ok(vec![self.name.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
        let namespaces = self.namespaces.read().await;
        let mut stats = IndexStats::default();

        for (name, records) in namespaces.iter().filter(|(_, records)| !records.is_empty()) {
            stats.namespaces.insert(
                name.clone(),
                NamespaceStats {
                    record_count: records.len() as u64,
                },
            );
            stats.total_record_count += records.len() as u64;
            if stats.dimension.is_none() {
                stats.dimension = records.first().map(|record| record.values.len());
            }
        }

        Ok(stats)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, IndexError> {
        let namespaces = self.namespaces.read().await;
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = records
            .iter()
            .map(|record| VectorMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.values),
                metadata: record.metadata.clone(),
            })
            .collect();

        matches.sort_by(|left, right| right.score.total_cmp(&left.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError> {
        let mut namespaces = self.namespaces.write().await;
        let stored = namespaces.entry(namespace.to_string()).or_default();

        for record in records {
            stored.retain(|existing| existing.id != record.id);
            stored.push(record.clone());
        }

        Ok(())
    }

    async fn delete_all(&self, namespace: &str) -> Result<(), IndexError> {
        self.namespaces.write().await.remove(namespace);
        Ok(())
    }
}
