//! Embedded vector index on SQLite.
//!
//! Embeddings are hashed bag-of-words vectors: each token is hashed with
//! SHA-256 into one of `dimensions` buckets with a sign bit, weighted by
//! `1 + ln(count)`, then L2-normalized. Scoring is cosine similarity over
//! every vector in the namespace. Good enough for small sets and tests; use
//! a hosted index for anything larger.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use cog_core::term_counts;

use crate::error::IndexError;
use crate::index::{IndexHit, IndexQuery, IndexRecord, VectorIndex};

pub const DEFAULT_DIMENSIONS: usize = 256;

pub struct LocalIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl LocalIndex {
    pub fn open(path: &Path, dimensions: usize) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, dimensions)
    }

    pub fn open_in_memory(dimensions: usize) -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, dimensions)
    }

    fn with_connection(conn: Connection, dimensions: usize) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::Backend("dimensions must be > 0".into()));
        }
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vectors (
                id        TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                content   TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata  TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_vectors_namespace ON vectors(namespace);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        hashed_embedding(text, self.dimensions)
    }

    pub fn len(&self) -> Result<usize, IndexError> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO vectors (id, namespace, content, embedding, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in &records {
                let embedding = encode_embedding(&self.embed(&record.content));
                let metadata = serde_json::to_string(&record.metadata)
                    .map_err(|e| IndexError::Decode(e.to_string()))?;
                stmt.execute(params![
                    record.id,
                    record.namespace,
                    record.content,
                    embedding,
                    metadata
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn query(&self, query: IndexQuery) -> Result<Vec<IndexHit>, IndexError> {
        let probe = self.embed(&query.text);
        let rows: Vec<(String, String, Vec<u8>, String)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare(
                "SELECT id, content, embedding, metadata FROM vectors WHERE namespace = ?1",
            )?;
            stmt.query_map([&query.namespace], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<_, _>>()?
        };

        let mut hits = Vec::with_capacity(rows.len());
        for (id, content, blob, metadata) in rows {
            let vector = decode_embedding(&blob)?;
            let metadata: Map<String, Value> = serde_json::from_str(&metadata)
                .map_err(|e| IndexError::Decode(format!("metadata of {id}: {e}")))?;
            hits.push(IndexHit {
                score: cosine_similarity(&probe, &vector),
                id,
                content: Some(content),
                metadata,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(query.top_k);
        Ok(hits)
    }

    async fn update_metadata(
        &self,
        id: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        let metadata =
            serde_json::to_string(&metadata).map_err(|e| IndexError::Decode(e.to_string()))?;
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE vectors SET metadata = ?2 WHERE id = ?1",
            params![id, metadata],
        )?;
        if updated == 0 {
            return Err(IndexError::Backend(format!("no vector with id {id}")));
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM vectors WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }
}

/// Signed feature-hashing embedding, L2-normalized. Empty text maps to the
/// zero vector.
pub fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    if dimensions == 0 {
        return vector;
    }
    for (term, count) in term_counts(text) {
        let digest = Sha256::digest(term.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * (1.0 + (count as f32).ln());
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, IndexError> {
    if blob.len() % 4 != 0 {
        return Err(IndexError::Decode(format!(
            "embedding blob of {} bytes is not a whole number of f32s",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
