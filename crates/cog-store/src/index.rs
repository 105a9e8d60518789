//! The vector similarity collaborator.
//!
//! Embeddings and nearest-neighbor search live behind [`VectorIndex`]. The
//! engine only ever hands it text plus a flat metadata payload and reads back
//! scored ids.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IndexError;

/// One document to store: the index embeds `content` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    /// Memory set the record belongs to. Queries never cross namespaces.
    pub namespace: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub text: String,
    pub namespace: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    /// Similarity, higher is closer.
    pub score: f32,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Insert or replace records by id.
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError>;

    /// Nearest neighbors of `query.text` inside `query.namespace`, best first.
    async fn query(&self, query: IndexQuery) -> Result<Vec<IndexHit>, IndexError>;

    /// Replace the metadata payload of an existing record.
    async fn update_metadata(&self, id: &str, metadata: Map<String, Value>)
    -> Result<(), IndexError>;

    /// Remove records. Returns how many existed.
    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError>;
}
